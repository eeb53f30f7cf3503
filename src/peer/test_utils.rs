use crate::actor::Event;
use crate::api::MetaState;
use crate::peer::cell::CellManager;
use crate::peer::rpc_api::{
    AdvanceSegmentInput, AdvanceSegmentOutput, ApplyChangesInput, ApplyChangesOutput, ChangeLogInfo, MetaStateError,
    MetaStateService, PingLeaderInput, ReadChangeLogInput, ReadSnapshotInput, SyncOutput,
};
use crate::peer::types::{PeerId, SegmentId};
use crate::snapshot::SnapshotInfo;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) struct TestUtilReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T: Debug> TestUtilReceiver<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        TestUtilReceiver { rx }
    }

    pub(crate) async fn recv(&mut self) -> T {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
            .expect("Expected value")
    }

    pub(crate) async fn recv_assert_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .expect_err("Expected timeout");
    }
}

/// Stands in for the peer actor and lets tests assert on what gets sent to it.
pub(crate) struct TestUtilActor {
    rx: mpsc::Receiver<Event>,
    timeout: Duration,
}

impl TestUtilActor {
    pub(crate) fn new(rx: mpsc::Receiver<Event>) -> Self {
        TestUtilActor {
            rx,
            timeout: Duration::from_millis(10),
        }
    }

    pub(crate) async fn recv(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
            .expect("Expected event")
    }

    pub(crate) async fn assert_no_event(&mut self) {
        tokio::time::timeout(self.timeout, self.rx.recv())
            .await
            .expect_err("Expected timeout");
    }
}

fn unreachable<T>() -> Result<T, MetaStateError> {
    Err(MetaStateError::Unavailable("unreachable in test".to_string()))
}

/// A peer that never answers successfully.
pub(crate) struct UnreachableService;

#[async_trait::async_trait]
impl MetaStateService for UnreachableService {
    async fn sync(&self) -> Result<SyncOutput, MetaStateError> {
        unreachable()
    }

    async fn get_snapshot_info(&self, _: SegmentId) -> Result<SnapshotInfo, MetaStateError> {
        unreachable()
    }

    async fn read_snapshot(&self, _: ReadSnapshotInput) -> Result<Bytes, MetaStateError> {
        unreachable()
    }

    async fn get_change_log_info(&self, _: SegmentId) -> Result<ChangeLogInfo, MetaStateError> {
        unreachable()
    }

    async fn read_change_log(&self, _: ReadChangeLogInput) -> Result<Vec<Bytes>, MetaStateError> {
        unreachable()
    }

    async fn apply_changes(&self, _: ApplyChangesInput) -> Result<ApplyChangesOutput, MetaStateError> {
        unreachable()
    }

    async fn advance_segment(&self, _: AdvanceSegmentInput) -> Result<AdvanceSegmentOutput, MetaStateError> {
        unreachable()
    }

    async fn ping_leader(&self, _: PingLeaderInput) -> Result<(), MetaStateError> {
        unreachable()
    }
}

pub(crate) fn unreachable_cell(self_id: PeerId, peer_count: u32) -> Arc<CellManager> {
    let others: BTreeMap<PeerId, Arc<dyn MetaStateService>> = (0..peer_count)
        .map(PeerId)
        .filter(|id| *id != self_id)
        .map(|id| (id, Arc::new(UnreachableService) as Arc<dyn MetaStateService>))
        .collect();

    Arc::new(CellManager::new(self_id, others))
}

/// A leader that only accepts pings, and hands them to the test.
pub(crate) struct PingRecorder {
    tx: mpsc::UnboundedSender<PingLeaderInput>,
}

impl PingRecorder {
    pub(crate) fn new() -> (Self, TestUtilReceiver<PingLeaderInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PingRecorder { tx }, TestUtilReceiver::new(rx))
    }
}

#[async_trait::async_trait]
impl MetaStateService for PingRecorder {
    async fn sync(&self) -> Result<SyncOutput, MetaStateError> {
        unreachable()
    }

    async fn get_snapshot_info(&self, _: SegmentId) -> Result<SnapshotInfo, MetaStateError> {
        unreachable()
    }

    async fn read_snapshot(&self, _: ReadSnapshotInput) -> Result<Bytes, MetaStateError> {
        unreachable()
    }

    async fn get_change_log_info(&self, _: SegmentId) -> Result<ChangeLogInfo, MetaStateError> {
        unreachable()
    }

    async fn read_change_log(&self, _: ReadChangeLogInput) -> Result<Vec<Bytes>, MetaStateError> {
        unreachable()
    }

    async fn apply_changes(&self, _: ApplyChangesInput) -> Result<ApplyChangesOutput, MetaStateError> {
        unreachable()
    }

    async fn advance_segment(&self, _: AdvanceSegmentInput) -> Result<AdvanceSegmentOutput, MetaStateError> {
        unreachable()
    }

    async fn ping_leader(&self, input: PingLeaderInput) -> Result<(), MetaStateError> {
        let _ = self.tx.send(input);
        Ok(())
    }
}

/// Deterministic state that folds every change into a running checksum.
#[derive(Default)]
pub(crate) struct HashingState {
    count: u64,
    hash: u32,
}

impl MetaState for HashingState {
    fn apply_change(&mut self, change: &[u8]) {
        let mut hasher = crc32fast::Hasher::new_with_initial(self.hash);
        hasher.update(change);
        self.hash = hasher.finalize();
        self.count += 1;
    }

    fn save(&self, output: &mut dyn Write) -> io::Result<()> {
        output.write_all(&self.count.to_be_bytes())?;
        output.write_all(&self.hash.to_be_bytes())
    }

    fn load(&mut self, input: &mut dyn Read) -> io::Result<()> {
        let mut count = [0u8; 8];
        let mut hash = [0u8; 4];
        input.read_exact(&mut count)?;
        input.read_exact(&mut hash)?;
        self.count = u64::from_be_bytes(count);
        self.hash = u32::from_be_bytes(hash);
        Ok(())
    }

    fn clear(&mut self) {
        *self = HashingState::default();
    }
}

pub(crate) fn change(i: u32) -> Bytes {
    Bytes::from(format!("change-{}", i))
}

pub(crate) fn changes(range: std::ops::Range<u32>) -> Vec<Bytes> {
    range.map(change).collect()
}
