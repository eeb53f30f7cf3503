use std::net::{Ipv4Addr, SocketAddr};
use tokio::time::Duration;

#[tokio::main]
async fn main() {
    let addrs: Vec<SocketAddr> = (0..3)
        .map(|i| SocketAddr::from((Ipv4Addr::LOCALHOST, 2021 + i)))
        .collect();
    let dir = tempfile::TempDir::new().expect("temp dir");

    let mut cell = Vec::new();
    for self_id in 0..addrs.len() {
        let accumulator = accumulator_impl::Accumulator::setup(self_id, &addrs, dir.path())
            .await
            .expect("peer setup");
        cell.push(accumulator);
    }

    // No real election here: peer 0 leads a fixed epoch.
    let epoch = meta_state::Epoch::new_random();
    for accumulator in &cell {
        accumulator.manager.start().await.unwrap();
    }
    cell[0].manager.on_start_leading(epoch).await.unwrap();
    cell[0].wait_for(meta_state::PeerState::Leading).await;
    for accumulator in &cell[1..] {
        accumulator
            .manager
            .on_start_following(meta_state::PeerId(0), epoch)
            .await
            .unwrap();
        accumulator.wait_for(meta_state::PeerState::Following).await;
    }

    let leader = &cell[0];
    leader.add_with_retries("k1", 100).await.unwrap();
    leader.add_with_retries("k2", 100).await.unwrap();
    leader.add_with_retries("k1", -101).await.unwrap();

    // Followers apply asynchronously.
    tokio::time::sleep(Duration::from_millis(200)).await;
    for accumulator in &cell {
        assert_eq!(-1, accumulator.get("k1"));
        assert_eq!(100, accumulator.get("k2"));
    }

    let snapshot = leader.manager.build_snapshot().await.unwrap();
    println!("{:?}", snapshot);
}

mod accumulator_impl {
    use bytes::{Buf, BufMut, Bytes, BytesMut};
    use meta_state::{
        CellConfig, CommitMode, CommitResult, ElectionManager, MetaState, MetaStateConfig, MetaStateManager,
        MetaStateOptions, PeerChannel, PeerId, PeerState, RpcServerShutdownHandle,
    };
    use std::collections::BTreeMap;
    use std::error::Error;
    use std::io::{self, Read, Write};
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tokio::time::Duration;

    type Sums = Arc<Mutex<BTreeMap<String, i64>>>;

    pub struct Accumulator {
        pub manager: MetaStateManager,
        sums: Sums,
        _server: RpcServerShutdownHandle,
    }

    impl Accumulator {
        pub async fn setup(self_id: usize, addrs: &[SocketAddr], dir: &Path) -> Result<Self, Box<dyn Error>> {
            let logger = meta_state::create_root_logger_for_stdout(self_id as u32);
            let peers = addrs
                .iter()
                .enumerate()
                .map(|(i, addr)| {
                    if i == self_id {
                        PeerChannel::Me
                    } else {
                        PeerChannel::Remote(*addr)
                    }
                })
                .collect();
            let sums = Sums::default();

            let manager = meta_state::create_meta_state_manager(MetaStateConfig {
                logger,
                cell: CellConfig {
                    self_id: PeerId(self_id as u32),
                    peers,
                },
                changelog_directory: dir.join(format!("peer_{}", self_id)).join("changelogs"),
                snapshot_directory: dir.join(format!("peer_{}", self_id)).join("snapshots"),
                meta_state: Box::new(SumState { sums: sums.clone() }),
                election: Arc::new(FixedElection),
                options: MetaStateOptions::default(),
            })
            .await?;
            let server = meta_state::serve_rpc(&manager, addrs[self_id]);

            Ok(Accumulator {
                manager,
                sums,
                _server: server,
            })
        }

        pub async fn wait_for(&self, state: PeerState) {
            let mut listener = self.manager.state_listener();
            listener.wait_for(state).await;
        }

        /// The leader only counts followers after their first ping, so the very first commits
        /// may bounce.
        pub async fn add_with_retries(&self, key: &str, delta: i64) -> Result<(), CommitResult> {
            let mut last = CommitResult::NotCommitted;
            for _ in 0..10 {
                last = self.manager.commit_change(encode(key, delta), CommitMode::MayFail).await;
                match last {
                    CommitResult::Committed => return Ok(()),
                    CommitResult::NotCommitted => tokio::time::sleep(Duration::from_millis(100)).await,
                    _ => break,
                }
            }
            Err(last)
        }

        pub fn get(&self, key: &str) -> i64 {
            self.sums.lock().unwrap().get(key).copied().unwrap_or(0)
        }
    }

    fn encode(key: &str, delta: i64) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + key.len() + 8);
        buf.put_u32(key.len() as u32);
        buf.put_slice(key.as_bytes());
        buf.put_i64(delta);
        buf.freeze()
    }

    fn decode(mut change: &[u8]) -> Option<(String, i64)> {
        if change.remaining() < 4 {
            return None;
        }
        let key_len = change.get_u32() as usize;
        if change.remaining() != key_len + 8 {
            return None;
        }
        let key = String::from_utf8(change[..key_len].to_vec()).ok()?;
        change.advance(key_len);
        Some((key, change.get_i64()))
    }

    struct SumState {
        sums: Sums,
    }

    impl MetaState for SumState {
        fn apply_change(&mut self, change: &[u8]) {
            if let Some((key, delta)) = decode(change) {
                *self.sums.lock().unwrap().entry(key).or_insert(0) += delta;
            }
        }

        fn save(&self, output: &mut dyn Write) -> io::Result<()> {
            for (key, sum) in self.sums.lock().unwrap().iter() {
                output.write_all(&encode(key, *sum))?;
            }
            Ok(())
        }

        fn load(&mut self, input: &mut dyn Read) -> io::Result<()> {
            let mut data = Vec::new();
            input.read_to_end(&mut data)?;

            let mut sums = self.sums.lock().unwrap();
            sums.clear();
            let mut rest = &data[..];
            while rest.remaining() >= 4 {
                let entry_len = 4 + (&rest[..4]).get_u32() as usize + 8;
                if rest.remaining() < entry_len {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated entry"));
                }
                let (key, sum) = decode(&rest[..entry_len])
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad entry"))?;
                sums.insert(key, sum);
                rest.advance(entry_len);
            }
            Ok(())
        }

        fn clear(&mut self) {
            self.sums.lock().unwrap().clear();
        }
    }

    struct FixedElection;

    impl ElectionManager for FixedElection {
        fn start(&self) {}

        fn restart(&self) {
            println!("Peer asked for a new election; this demo doesn't run one.");
        }
    }
}
