use crate::changelog::ChangeLogError;
use crate::peer::types::{Checksum, Epoch, MetaVersion, PeerId, PeerState, SegmentId};
use crate::snapshot::{SnapshotError, SnapshotInfo};
use bytes::Bytes;
use std::future::Future;
use tokio::time::Duration;

/// The peer-to-peer surface. Implemented by the local peer, by the gRPC client to a remote peer,
/// and by anything tests want to put in between.
#[async_trait::async_trait]
pub trait MetaStateService: Send + Sync {
    /// Leader only. Reports the version followers should recover to. A leader that is still
    /// recovering answers once that version is settled.
    async fn sync(&self) -> Result<SyncOutput, MetaStateError>;

    async fn get_snapshot_info(&self, snapshot_id: SegmentId) -> Result<SnapshotInfo, MetaStateError>;

    async fn read_snapshot(&self, input: ReadSnapshotInput) -> Result<Bytes, MetaStateError>;

    async fn get_change_log_info(&self, change_log_id: SegmentId) -> Result<ChangeLogInfo, MetaStateError>;

    async fn read_change_log(&self, input: ReadChangeLogInput) -> Result<Vec<Bytes>, MetaStateError>;

    async fn apply_changes(&self, input: ApplyChangesInput) -> Result<ApplyChangesOutput, MetaStateError>;

    async fn advance_segment(&self, input: AdvanceSegmentInput) -> Result<AdvanceSegmentOutput, MetaStateError>;

    async fn ping_leader(&self, input: PingLeaderInput) -> Result<(), MetaStateError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RpcMethod {
    Sync,
    GetSnapshotInfo,
    ReadSnapshot,
    GetChangeLogInfo,
    ReadChangeLog,
    ApplyChanges,
    AdvanceSegment,
    PingLeader,
}

impl RpcMethod {
    pub fn name(self) -> &'static str {
        match self {
            RpcMethod::Sync => "Sync",
            RpcMethod::GetSnapshotInfo => "GetSnapshotInfo",
            RpcMethod::ReadSnapshot => "ReadSnapshot",
            RpcMethod::GetChangeLogInfo => "GetChangeLogInfo",
            RpcMethod::ReadChangeLog => "ReadChangeLog",
            RpcMethod::ApplyChanges => "ApplyChanges",
            RpcMethod::AdvanceSegment => "AdvanceSegment",
            RpcMethod::PingLeader => "PingLeader",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MetaStateError {
    #[error("Peer is in state {0:?}")]
    InvalidState(PeerState),
    #[error("Epoch mismatch: expected {expected}, received {received}")]
    InvalidEpoch { expected: Epoch, received: Epoch },
    #[error("Version mismatch: expected {expected}, received {received}")]
    InvalidVersion {
        expected: MetaVersion,
        received: MetaVersion,
    },
    #[error("No changelog {0}")]
    NoSuchChangeLog(SegmentId),
    #[error("No snapshot {0}")]
    InvalidSegmentId(SegmentId),
    #[error("IO failure: {0}")]
    IoError(String),
    #[error("Peer unavailable: {0}")]
    Unavailable(String),
    #[error("Local actor has exited")]
    ActorExited,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SyncOutput {
    pub version: MetaVersion,
    pub epoch: Epoch,
    pub max_snapshot_id: Option<SegmentId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadSnapshotInput {
    pub snapshot_id: SegmentId,
    pub offset: u64,
    pub length: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChangeLogInfo {
    pub record_count: u32,
    pub prev_record_count: u32,
    /// Epoch of the leader that started this segment. Two segments with the same id and epoch
    /// hold the same records up to the shorter one's length.
    pub epoch: Epoch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadChangeLogInput {
    pub change_log_id: SegmentId,
    pub start_record_id: u32,
    pub record_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyChangesInput {
    pub epoch: Epoch,
    /// Version of the first change in `changes`.
    pub version: MetaVersion,
    pub changes: Vec<Bytes>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ApplyChangesOutput {
    /// False when the follower is still recovering and only queued the changes.
    pub committed: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AdvanceSegmentInput {
    pub epoch: Epoch,
    pub version: MetaVersion,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AdvanceSegmentOutput {
    pub checksum: Checksum,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PingLeaderInput {
    pub follower_id: PeerId,
    pub epoch: Epoch,
    pub state: PeerState,
}

/// Bounds a peer call by `timeout`, reporting expiry as `Unavailable`.
pub(crate) async fn call_with_timeout<T, F>(method: RpcMethod, timeout: Duration, call: F) -> Result<T, MetaStateError>
where
    F: Future<Output = Result<T, MetaStateError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(MetaStateError::Unavailable(format!(
            "{} timed out after {}ms",
            method.name(),
            timeout.as_millis()
        ))),
    }
}

impl From<ChangeLogError> for MetaStateError {
    fn from(e: ChangeLogError) -> Self {
        match e {
            ChangeLogError::NoSuchChangeLog(id) => MetaStateError::NoSuchChangeLog(id),
            other => MetaStateError::IoError(other.to_string()),
        }
    }
}

impl From<SnapshotError> for MetaStateError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::NoSuchSnapshot(id) => MetaStateError::InvalidSegmentId(id),
            other => MetaStateError::IoError(other.to_string()),
        }
    }
}
