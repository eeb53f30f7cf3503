use bytes::Bytes;
use meta_state::{
    AdvanceSegmentInput, AdvanceSegmentOutput, ApplyChangesInput, ApplyChangesOutput, CellConfig, ChangeLogInfo,
    CommitMode, CommitResult, ElectionManager, Epoch, MetaState, MetaStateConfig, MetaStateError, MetaStateManager,
    MetaStateOptions, MetaStateService, MetaVersion, MutationId, PeerChannel, PeerId, PeerState, PingLeaderInput,
    ReadChangeLogInput, ReadSnapshotInput, SnapshotInfo, SyncOutput,
};
use std::error::Error;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tempfile::TempDir;
use tokio::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn three_peers_commit() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    let epoch = cell.elect(PeerId(0)).await;

    let result = cell.manager(0).commit_change(Bytes::from("hello"), CommitMode::MayFail).await;
    assert_eq!(result, CommitResult::Committed);

    cell.wait_for_versions(&[0, 1, 2], MetaVersion::new(0, 1)).await;
    cell.assert_same_state(&[0, 1, 2]);

    let info = cell.manager(0).monitoring_info().await?;
    assert_eq!(info.state, PeerState::Leading);
    assert_eq!(info.epoch, Some(epoch));
    assert_eq!(info.leader_id, Some(PeerId(0)));
    assert_eq!(info.has_quorum, Some(true));

    let info = cell.manager(2).monitoring_info().await?;
    assert_eq!(info.state, PeerState::Following);
    assert_eq!(info.leader_id, Some(PeerId(0)));
    assert_eq!(info.has_quorum, None);

    Ok(())
}

#[tokio::test]
async fn single_peer_cell_commits_alone() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(1).await?;
    cell.manager(0).start().await?;
    cell.manager(0).on_start_leading(Epoch::new_random()).await?;
    cell.wait_for_state(0, PeerState::Leading).await;

    for i in 0..5 {
        let result = cell.manager(0).commit_change(change(i), CommitMode::MayFail).await;
        assert_eq!(result, CommitResult::Committed);
    }
    assert_eq!(cell.manager(0).version().await?, MetaVersion::new(0, 5));

    Ok(())
}

#[tokio::test]
async fn commit_without_quorum_may_fail() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    cell.elect(PeerId(0)).await;

    // Followers can no longer ping the leader.
    cell.cut(1, 0);
    cell.cut(2, 0);
    cell.wait_for_quorum(0, false).await;

    let result = cell.manager(0).commit_change(Bytes::from("lost"), CommitMode::MayFail).await;
    assert_eq!(result, CommitResult::NotCommitted);
    assert_eq!(cell.manager(0).version().await?, MetaVersion::new(0, 0));

    Ok(())
}

#[tokio::test]
async fn never_fails_commit_waits_for_quorum() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    cell.elect(PeerId(0)).await;

    cell.cut(1, 0);
    cell.cut(2, 0);
    cell.wait_for_quorum(0, false).await;

    let pending = cell.manager(0).commit_change_async(Bytes::from("eventually"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cell.manager(0).version().await?, MetaVersion::new(0, 0));

    cell.heal(1, 0);
    let result = tokio::time::timeout(WAIT, pending).await??;
    assert_eq!(result, CommitResult::Committed);
    assert_eq!(cell.manager(0).version().await?, MetaVersion::new(0, 1));

    Ok(())
}

#[tokio::test]
async fn unacknowledged_commit_is_in_doubt() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    cell.elect(PeerId(0)).await;

    // The leader still hears pings, but its changes go nowhere.
    cell.cut(0, 1);
    cell.cut(0, 2);

    let result = cell.manager(0).commit_change(Bytes::from("limbo"), CommitMode::MayFail).await;
    assert_eq!(result, CommitResult::MaybeCommitted);

    cell.wait_for_state(0, PeerState::Elections).await;
    assert!(cell.elections[0].restarts() >= 1);

    Ok(())
}

#[tokio::test]
async fn stale_epoch_is_fenced() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    let epoch = cell.elect(PeerId(0)).await;

    let stale = Epoch::new_random();
    let result = cell
        .manager(1)
        .local_service()
        .apply_changes(ApplyChangesInput {
            epoch: stale,
            version: MetaVersion::new(0, 0),
            changes: vec![Bytes::from("forged")],
        })
        .await;
    assert_eq!(
        result,
        Err(MetaStateError::InvalidEpoch {
            expected: epoch,
            received: stale,
        })
    );

    cell.wait_for_state(1, PeerState::Elections).await;
    assert_eq!(cell.elections[1].restarts(), 1);
    assert_eq!(cell.manager(1).version().await?, MetaVersion::new(0, 0));

    Ok(())
}

#[tokio::test]
async fn out_of_order_changes_restart_follower() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    let epoch = cell.elect(PeerId(0)).await;

    let result = cell
        .manager(1)
        .local_service()
        .apply_changes(ApplyChangesInput {
            epoch,
            version: MetaVersion::new(0, 5),
            changes: vec![Bytes::from("gap")],
        })
        .await;
    assert_eq!(
        result,
        Err(MetaStateError::InvalidVersion {
            expected: MetaVersion::new(0, 0),
            received: MetaVersion::new(0, 5),
        })
    );

    cell.wait_for_state(1, PeerState::Elections).await;
    assert_eq!(cell.elections[1].restarts(), 1);
    assert_eq!(cell.manager(1).version().await?, MetaVersion::new(0, 0));

    Ok(())
}

#[tokio::test]
async fn distributed_snapshot_checksums_match() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    cell.elect(PeerId(0)).await;

    for i in 0..20 {
        assert_eq!(
            cell.manager(0).commit_change(change(i), CommitMode::MayFail).await,
            CommitResult::Committed
        );
    }

    let snapshot = cell.manager(0).build_snapshot().await?;
    assert_eq!(snapshot.snapshot_id, 1);
    assert_eq!(snapshot.confirmations, vec![PeerId(1), PeerId(2)]);
    assert!(snapshot.mismatches.is_empty());

    let info = cell.manager(0).local_service().get_snapshot_info(1).await?;
    assert_eq!(info.prev_record_count, 20);
    assert_eq!(info.checksum, snapshot.checksum);
    for peer in 1..3 {
        let remote = cell.manager(peer).local_service().get_snapshot_info(1).await?;
        assert_eq!(remote, info);
    }

    // Changes continue in the new segment.
    assert_eq!(
        cell.manager(0).commit_change(change(20), CommitMode::MayFail).await,
        CommitResult::Committed
    );
    cell.wait_for_versions(&[0, 1, 2], MetaVersion::new(1, 1)).await;
    cell.assert_same_state(&[0, 1, 2]);

    Ok(())
}

#[tokio::test]
async fn snapshot_is_built_automatically() -> Result<(), Box<dyn Error>> {
    let options = MetaStateOptions {
        max_changes_between_snapshots: Some(10),
        ..test_options()
    };
    let cell = TestCell::create_with_options(3, options).await?;
    cell.elect(PeerId(0)).await;

    for i in 0..15 {
        assert_eq!(
            cell.manager(0).commit_change(change(i), CommitMode::MayFail).await,
            CommitResult::Committed
        );
    }

    cell.wait_for_versions(&[0, 1, 2], MetaVersion::new(1, 5)).await;
    let info = cell.manager(1).local_service().get_snapshot_info(1).await?;
    assert_eq!(info.prev_record_count, 10);

    Ok(())
}

#[tokio::test]
async fn lagging_follower_recovers() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    // Peer 2 sits out the first part.
    let epoch = cell.elect_among(PeerId(0), &[1]).await;

    for i in 0..10 {
        assert_eq!(
            cell.manager(0).commit_change(change(i), CommitMode::MayFail).await,
            CommitResult::Committed
        );
    }
    let snapshot = cell.manager(0).build_snapshot().await?;
    assert_eq!(snapshot.confirmations, vec![PeerId(1)]);
    for i in 10..15 {
        assert_eq!(
            cell.manager(0).commit_change(change(i), CommitMode::MayFail).await,
            CommitResult::Committed
        );
    }

    cell.manager(2).start().await?;
    cell.manager(2).on_start_following(PeerId(0), epoch).await?;
    cell.wait_for_state(2, PeerState::Following).await;

    cell.wait_for_versions(&[0, 1, 2], MetaVersion::new(1, 5)).await;
    cell.assert_same_state(&[0, 1, 2]);
    assert_eq!(cell.manager(2).priority().await?, cell.manager(0).priority().await?);

    // And keeps up from there.
    assert_eq!(
        cell.manager(0).commit_change(change(15), CommitMode::MayFail).await,
        CommitResult::Committed
    );
    cell.wait_for_versions(&[2], MetaVersion::new(1, 6)).await;
    cell.assert_same_state(&[0, 2]);

    Ok(())
}

#[tokio::test]
async fn new_leader_keeps_committed_changes() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    cell.elect(PeerId(0)).await;
    for i in 0..5 {
        assert_eq!(
            cell.manager(0).commit_change(change(i), CommitMode::MayFail).await,
            CommitResult::Committed
        );
    }
    cell.wait_for_versions(&[1, 2], MetaVersion::new(0, 5)).await;

    // Peer 0 drops out; peer 1 takes over in a fresh epoch.
    for peer in 0..3 {
        cell.manager(peer).restart().await?;
        cell.wait_for_state(peer, PeerState::Elections).await;
    }
    for peer in 0..3 {
        cell.cut(0, peer);
        cell.cut(peer, 0);
    }
    let epoch = Epoch::new_random();
    cell.manager(1).on_start_leading(epoch).await?;
    cell.wait_for_state(1, PeerState::Leading).await;
    cell.manager(2).on_start_following(PeerId(1), epoch).await?;
    cell.wait_for_state(2, PeerState::Following).await;
    cell.wait_for_quorum(1, true).await;

    assert_eq!(
        cell.manager(1).commit_change(change(5), CommitMode::MayFail).await,
        CommitResult::Committed
    );
    cell.wait_for_versions(&[1, 2], MetaVersion::new(1, 1)).await;
    cell.assert_same_state(&[1, 2]);
    assert_eq!(cell.states[1].count(), 6);

    Ok(())
}

#[tokio::test]
async fn leader_adopts_change_it_missed() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    cell.elect(PeerId(0)).await;

    // Committed by peers 0 and 1; peer 2 never sees it.
    cell.cut(0, 2);
    cell.commit_all(0, 0..1).await;
    cell.wait_for_versions(&[1], MetaVersion::new(0, 1)).await;

    for peer in 0..3 {
        cell.manager(peer).restart().await?;
        cell.wait_for_state(peer, PeerState::Elections).await;
    }
    for peer in 0..3 {
        cell.cut(0, peer);
        cell.cut(peer, 0);
    }

    // Peer 2 can't reach anyone at first, so it can't settle its history.
    cell.cut(2, 1);
    let epoch = Epoch::new_random();
    cell.manager(2).on_start_leading(epoch).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cell.manager(2).monitoring_info().await?.state, PeerState::LeaderRecovery);

    cell.heal(2, 1);
    cell.wait_for_state(2, PeerState::Leading).await;
    assert_eq!(cell.states[2].count(), 1);

    cell.manager(1).on_start_following(PeerId(2), epoch).await?;
    cell.wait_for_state(1, PeerState::Following).await;
    cell.wait_for_quorum(2, true).await;
    assert_eq!(cell.states[1].count(), 1);

    cell.commit_all(2, 1..2).await;
    cell.wait_for_versions(&[1, 2], MetaVersion::new(1, 1)).await;
    cell.assert_same_state(&[1, 2]);
    assert_eq!(cell.states[2].count(), 2);

    Ok(())
}

#[tokio::test]
async fn sync_waits_for_leader_recovery() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    cell.elect(PeerId(0)).await;
    cell.commit_all(0, 0..2).await;
    cell.wait_for_versions(&[1, 2], MetaVersion::new(0, 2)).await;

    for peer in 0..3 {
        cell.manager(peer).restart().await?;
        cell.wait_for_state(peer, PeerState::Elections).await;
    }
    cell.cut(1, 0);
    cell.cut(1, 2);
    let epoch = Epoch::new_random();
    cell.manager(1).on_start_leading(epoch).await?;
    cell.wait_for_state(1, PeerState::LeaderRecovery).await;

    let service = cell.manager(1).local_service();
    let mut sync = tokio::spawn(async move { service.sync().await });
    assert!(tokio::time::timeout(Duration::from_millis(100), &mut sync).await.is_err());

    cell.heal(1, 2);
    let output = tokio::time::timeout(WAIT, sync).await???;
    assert_eq!(output.epoch, epoch);
    assert_eq!(output.version, MetaVersion::new(1, 0));
    assert_eq!(cell.manager(1).monitoring_info().await?.state, PeerState::Leading);

    Ok(())
}

#[tokio::test]
async fn stuck_follower_is_left_out_of_snapshot() -> Result<(), Box<dyn Error>> {
    let options = MetaStateOptions {
        snapshot_timeout: Some(Duration::from_millis(300)),
        ..test_options()
    };
    let cell = TestCell::create_with_options(3, options).await?;
    cell.elect(PeerId(0)).await;
    cell.commit_all(0, 0..5).await;
    cell.wait_for_versions(&[1, 2], MetaVersion::new(0, 5)).await;

    cell.stall_advance(0, 2);
    let snapshot = tokio::time::timeout(WAIT, cell.manager(0).build_snapshot()).await??;
    assert_eq!(snapshot.snapshot_id, 1);
    assert_eq!(snapshot.confirmations, vec![PeerId(1)]);
    assert!(snapshot.mismatches.is_empty());
    assert_eq!(cell.manager(0).monitoring_info().await?.state, PeerState::Leading);

    cell.commit_all(0, 5..6).await;
    cell.wait_for_versions(&[0, 1], MetaVersion::new(1, 1)).await;
    cell.assert_same_state(&[0, 1]);

    Ok(())
}

#[tokio::test]
async fn follower_with_stale_history_catches_up() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    let epoch = cell.elect(PeerId(0)).await;
    cell.commit_all(0, 0..5).await;
    cell.manager(0).build_snapshot().await?;
    cell.commit_all(0, 5..8).await;
    cell.wait_for_versions(&[1, 2], MetaVersion::new(1, 3)).await;

    // Peer 2 drops out holding snapshot 1 and the first 3 records of changelog 1.
    cell.cut(0, 2);
    cell.cut(2, 0);
    cell.manager(2).restart().await?;
    cell.wait_for_state(2, PeerState::Elections).await;

    cell.commit_all(0, 8..12).await;
    assert_eq!(cell.manager(0).build_snapshot().await?.snapshot_id, 2);
    cell.commit_all(0, 12..15).await;
    let snapshot = cell.manager(0).build_snapshot().await?;
    assert_eq!(snapshot.snapshot_id, 3);
    assert_eq!(snapshot.confirmations, vec![PeerId(1)]);
    cell.commit_all(0, 15..17).await;

    let stale = cell.manager(2).local_service();
    assert_eq!(stale.get_change_log_info(1).await?.record_count, 3);
    assert_eq!(
        stale.get_change_log_info(2).await,
        Err(MetaStateError::NoSuchChangeLog(2))
    );

    cell.heal(0, 2);
    cell.heal(2, 0);
    cell.manager(2).on_start_following(PeerId(0), epoch).await?;
    cell.wait_for_state(2, PeerState::Following).await;

    cell.wait_for_versions(&[0, 1, 2], MetaVersion::new(3, 2)).await;
    cell.assert_same_state(&[0, 1, 2]);
    assert_eq!(cell.states[2].count(), 17);
    assert_eq!(
        stale.get_snapshot_info(3).await?,
        cell.manager(0).local_service().get_snapshot_info(3).await?
    );

    cell.commit_all(0, 17..18).await;
    cell.wait_for_versions(&[0, 1, 2], MetaVersion::new(3, 3)).await;
    cell.assert_same_state(&[0, 1, 2]);

    Ok(())
}

#[tokio::test]
async fn retried_mutation_applies_once() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    cell.elect(PeerId(0)).await;

    let mutation_id = MutationId::new_random();
    for _ in 0..2 {
        let result = cell
            .manager(0)
            .commit_change_with_id(Bytes::from("once"), CommitMode::MayFail, mutation_id)
            .await;
        assert_eq!(result, CommitResult::Committed);
    }
    assert_eq!(cell.manager(0).version().await?, MetaVersion::new(0, 1));

    Ok(())
}

#[tokio::test]
async fn followers_reject_commits() -> Result<(), Box<dyn Error>> {
    let cell = TestCell::create(3).await?;
    cell.elect(PeerId(0)).await;

    let result = cell.manager(1).commit_change(Bytes::from("nope"), CommitMode::MayFail).await;
    assert_eq!(result, CommitResult::InvalidState);
    assert_eq!(
        cell.manager(1).build_snapshot().await,
        Err(MetaStateError::InvalidState(PeerState::Following))
    );
    assert!(matches!(
        cell.manager(1).local_service().sync().await,
        Err(MetaStateError::InvalidState(PeerState::Following))
    ));

    Ok(())
}

#[tokio::test]
async fn grpc_cell_commits() -> Result<(), Box<dyn Error>> {
    let addrs: Vec<SocketAddr> = (0..3).map(|_| free_local_addr()).collect::<Result<_, _>>()?;
    let mut dirs = Vec::new();
    let mut managers = Vec::new();
    let mut states = Vec::new();
    let mut servers = Vec::new();
    for self_id in 0..3 {
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
        let state = SharedHashState::default();
        let dir = TempDir::new()?;
        let manager = meta_state::create_meta_state_manager(MetaStateConfig {
            logger: meta_state::discard_logger(),
            cell: CellConfig {
                self_id: PeerId(self_id as u32),
                peers,
            },
            changelog_directory: dir.path().join("changelogs"),
            snapshot_directory: dir.path().join("snapshots"),
            meta_state: Box::new(state.clone()),
            election: Arc::new(ManualElection::default()),
            options: test_options(),
        })
        .await?;
        servers.push(meta_state::serve_rpc(&manager, addrs[self_id]));
        managers.push(manager);
        states.push(state);
        dirs.push(dir);
    }

    let epoch = Epoch::new_random();
    for manager in &managers {
        manager.start().await?;
    }
    managers[0].on_start_leading(epoch).await?;
    wait_for(&managers[0], PeerState::Leading).await;
    for manager in &managers[1..] {
        manager.on_start_following(PeerId(0), epoch).await?;
        wait_for(manager, PeerState::Following).await;
    }
    let leader = &managers[0];
    wait_until(|| async move { leader.monitoring_info().await.ok().and_then(|i| i.has_quorum) == Some(true) }).await;

    for i in 0..3 {
        assert_eq!(
            managers[0].commit_change(change(i), CommitMode::MayFail).await,
            CommitResult::Committed
        );
    }
    let snapshot = managers[0].build_snapshot().await?;
    assert_eq!(snapshot.confirmations, vec![PeerId(1), PeerId(2)]);

    for manager in &managers {
        wait_until(|| async move { manager.version().await.ok() == Some(MetaVersion::new(1, 0)) }).await;
    }
    assert_eq!(states[0].fingerprint(), states[1].fingerprint());
    assert_eq!(states[0].fingerprint(), states[2].fingerprint());

    drop(servers);
    Ok(())
}

// ------- Test cell --------

struct TestCell {
    managers: Vec<MetaStateManager>,
    // links[from][to]
    links: Vec<Vec<Arc<Link>>>,
    elections: Vec<Arc<ManualElection>>,
    states: Vec<SharedHashState>,
    _dirs: Vec<TempDir>,
}

impl TestCell {
    async fn create(peer_count: usize) -> Result<Self, Box<dyn Error>> {
        Self::create_with_options(peer_count, test_options()).await
    }

    async fn create_with_options(peer_count: usize, options: MetaStateOptions) -> Result<Self, Box<dyn Error>> {
        let links: Vec<Vec<Arc<Link>>> = (0..peer_count)
            .map(|_| (0..peer_count).map(|_| Arc::new(Link::default())).collect())
            .collect();

        let mut managers = Vec::with_capacity(peer_count);
        let mut elections = Vec::with_capacity(peer_count);
        let mut states = Vec::with_capacity(peer_count);
        let mut dirs = Vec::with_capacity(peer_count);
        for self_id in 0..peer_count {
            let peers = (0..peer_count)
                .map(|i| {
                    if i == self_id {
                        PeerChannel::Me
                    } else {
                        PeerChannel::Service(links[self_id][i].clone())
                    }
                })
                .collect();
            let election = Arc::new(ManualElection::default());
            let state = SharedHashState::default();
            let dir = TempDir::new()?;

            let manager = meta_state::create_meta_state_manager(MetaStateConfig {
                logger: meta_state::discard_logger(),
                cell: CellConfig {
                    self_id: PeerId(self_id as u32),
                    peers,
                },
                changelog_directory: dir.path().join("changelogs"),
                snapshot_directory: dir.path().join("snapshots"),
                meta_state: Box::new(state.clone()),
                election: election.clone(),
                options: options.clone(),
            })
            .await?;

            managers.push(manager);
            elections.push(election);
            states.push(state);
            dirs.push(dir);
        }

        for from in 0..peer_count {
            for to in 0..peer_count {
                links[from][to].bind(managers[to].local_service());
            }
        }

        Ok(TestCell {
            managers,
            links,
            elections,
            states,
            _dirs: dirs,
        })
    }

    fn manager(&self, peer: usize) -> &MetaStateManager {
        &self.managers[peer]
    }

    /// Elects `leader` with every other peer following, and waits for the leader to see a quorum.
    async fn elect(&self, leader: PeerId) -> Epoch {
        let followers: Vec<usize> = (0..self.managers.len())
            .filter(|peer| *peer != leader.0 as usize)
            .collect();
        self.elect_among(leader, &followers).await
    }

    async fn elect_among(&self, leader: PeerId, followers: &[usize]) -> Epoch {
        let epoch = Epoch::new_random();
        let leader_index = leader.0 as usize;

        self.manager(leader_index).start().await.unwrap();
        self.manager(leader_index).on_start_leading(epoch).await.unwrap();
        self.wait_for_state(leader_index, PeerState::Leading).await;

        for follower in followers {
            self.manager(*follower).start().await.unwrap();
            self.manager(*follower).on_start_following(leader, epoch).await.unwrap();
            self.wait_for_state(*follower, PeerState::Following).await;
        }
        self.wait_for_quorum(leader_index, true).await;

        epoch
    }

    fn cut(&self, from: usize, to: usize) {
        self.links[from][to].connected.store(false, Ordering::SeqCst);
    }

    fn heal(&self, from: usize, to: usize) {
        self.links[from][to].connected.store(true, Ordering::SeqCst);
    }

    fn stall_advance(&self, from: usize, to: usize) {
        self.links[from][to].advance_stalled.store(true, Ordering::SeqCst);
    }

    async fn commit_all(&self, leader: usize, changes: std::ops::Range<u32>) {
        for i in changes {
            assert_eq!(
                self.manager(leader).commit_change(change(i), CommitMode::MayFail).await,
                CommitResult::Committed
            );
        }
    }

    async fn wait_for_state(&self, peer: usize, state: PeerState) {
        wait_for(self.manager(peer), state).await;
    }

    async fn wait_for_quorum(&self, leader: usize, has_quorum: bool) {
        let manager = self.manager(leader);
        wait_until(|| async move {
            manager.monitoring_info().await.ok().and_then(|info| info.has_quorum) == Some(has_quorum)
        })
        .await;
    }

    async fn wait_for_versions(&self, peers: &[usize], version: MetaVersion) {
        for peer in peers {
            let manager = self.manager(*peer);
            wait_until(|| async move { manager.version().await.ok() == Some(version) }).await;
        }
    }

    fn assert_same_state(&self, peers: &[usize]) {
        let expected = self.states[peers[0]].fingerprint();
        for peer in &peers[1..] {
            assert_eq!(self.states[*peer].fingerprint(), expected, "Peer {} diverged", peer);
        }
    }
}

fn test_options() -> MetaStateOptions {
    MetaStateOptions {
        ping_interval: Some(Duration::from_millis(20)),
        follower_liveness_timeout: Some(Duration::from_millis(200)),
        rpc_timeout: Some(Duration::from_millis(100)),
        commit_timeout: Some(Duration::from_millis(400)),
        recovery_retry_backoff: Some(Duration::from_millis(20)),
        recovery_max_attempts: Some(20),
        ..MetaStateOptions::default()
    }
}

async fn wait_for(manager: &MetaStateManager, state: PeerState) {
    let mut listener = manager.state_listener();
    let reached = tokio::time::timeout(WAIT, listener.wait_for(state)).await;
    assert!(
        reached.is_ok(),
        "Timed out waiting for {:?}, in {:?}",
        state,
        listener.current()
    );
}

async fn wait_until<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + WAIT;
    while !condition().await {
        assert!(Instant::now() < deadline, "Timed out waiting for condition");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn free_local_addr() -> io::Result<SocketAddr> {
    TcpListener::bind("127.0.0.1:0")?.local_addr()
}

fn change(i: u32) -> Bytes {
    Bytes::from(format!("change-{}", i))
}

// ------- Test doubles --------

/// Directed connection from one peer to another that the test can cut.
struct Link {
    target: RwLock<Option<Arc<dyn MetaStateService>>>,
    connected: AtomicBool,
    // AdvanceSegment calls never return, like a follower stuck writing its snapshot.
    advance_stalled: AtomicBool,
}

impl Default for Link {
    fn default() -> Self {
        Link {
            target: RwLock::new(None),
            connected: AtomicBool::new(true),
            advance_stalled: AtomicBool::new(false),
        }
    }
}

impl Link {
    fn bind(&self, target: Arc<dyn MetaStateService>) {
        *self.target.write().unwrap() = Some(target);
    }

    fn target(&self) -> Result<Arc<dyn MetaStateService>, MetaStateError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MetaStateError::Unavailable("link cut".to_string()));
        }
        self.target
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| MetaStateError::Unavailable("link not bound".to_string()))
    }
}

#[async_trait::async_trait]
impl MetaStateService for Link {
    async fn sync(&self) -> Result<SyncOutput, MetaStateError> {
        self.target()?.sync().await
    }

    async fn get_snapshot_info(&self, snapshot_id: u32) -> Result<SnapshotInfo, MetaStateError> {
        self.target()?.get_snapshot_info(snapshot_id).await
    }

    async fn read_snapshot(&self, input: ReadSnapshotInput) -> Result<Bytes, MetaStateError> {
        self.target()?.read_snapshot(input).await
    }

    async fn get_change_log_info(&self, change_log_id: u32) -> Result<ChangeLogInfo, MetaStateError> {
        self.target()?.get_change_log_info(change_log_id).await
    }

    async fn read_change_log(&self, input: ReadChangeLogInput) -> Result<Vec<Bytes>, MetaStateError> {
        self.target()?.read_change_log(input).await
    }

    async fn apply_changes(&self, input: ApplyChangesInput) -> Result<ApplyChangesOutput, MetaStateError> {
        self.target()?.apply_changes(input).await
    }

    async fn advance_segment(&self, input: AdvanceSegmentInput) -> Result<AdvanceSegmentOutput, MetaStateError> {
        if self.advance_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.target()?.advance_segment(input).await
    }

    async fn ping_leader(&self, input: PingLeaderInput) -> Result<(), MetaStateError> {
        self.target()?.ping_leader(input).await
    }
}

/// Election that only records what the peer asked of it. Tests make the decisions.
#[derive(Default)]
struct ManualElection {
    starts: AtomicUsize,
    restarts: AtomicUsize,
}

impl ManualElection {
    fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl ElectionManager for ManualElection {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct HashState {
    count: u64,
    hash: u32,
}

/// Folds every change into a running checksum. The test keeps a clone to inspect the state the
/// peer has built.
#[derive(Clone, Default)]
struct SharedHashState(Arc<Mutex<HashState>>);

impl SharedHashState {
    fn fingerprint(&self) -> (u64, u32) {
        let state = self.0.lock().unwrap();
        (state.count, state.hash)
    }

    fn count(&self) -> u64 {
        self.fingerprint().0
    }
}

impl MetaState for SharedHashState {
    fn apply_change(&mut self, change: &[u8]) {
        let mut state = self.0.lock().unwrap();
        let mut hasher = crc32fast::Hasher::new_with_initial(state.hash);
        hasher.update(change);
        state.hash = hasher.finalize();
        state.count += 1;
    }

    fn save(&self, output: &mut dyn Write) -> io::Result<()> {
        let state = self.0.lock().unwrap();
        output.write_all(&state.count.to_be_bytes())?;
        output.write_all(&state.hash.to_be_bytes())
    }

    fn load(&mut self, input: &mut dyn Read) -> io::Result<()> {
        let mut count = [0u8; 8];
        let mut hash = [0u8; 4];
        input.read_exact(&mut count)?;
        input.read_exact(&mut hash)?;

        let mut state = self.0.lock().unwrap();
        state.count = u64::from_be_bytes(count);
        state.hash = u32::from_be_bytes(hash);
        Ok(())
    }

    fn clear(&mut self) {
        *self.0.lock().unwrap() = HashState::default();
    }
}
