mod cell;
mod decorated;
mod follower_tracker;
mod leader_committer;
mod peer;
mod peer_client;
mod recovery;
mod rpc_api;
mod snapshot_creator;
mod state_change_listener;
mod state_invoker;
#[cfg(test)]
pub(crate) mod test_utils;
mod timers;
mod types;

pub(crate) use cell::CellManager;
pub(crate) use decorated::DecoratedMetaState;
pub(crate) use leader_committer::{CommitChangeInput, CommitTimeout, LocalCommitComplete, ReplicationReply};
pub use peer::MonitoringInfo;
pub(crate) use peer::Peer;
pub use peer_client::ConnectError;
pub(crate) use peer_client::GrpcPeerClient;
pub(crate) use recovery::RecoveryComplete;
pub use rpc_api::{
    AdvanceSegmentInput, AdvanceSegmentOutput, ApplyChangesInput, ApplyChangesOutput, ChangeLogInfo, MetaStateError,
    MetaStateService, PingLeaderInput, ReadChangeLogInput, ReadSnapshotInput, RpcMethod, SyncOutput,
};
pub use snapshot_creator::SnapshotOutput;
pub(crate) use snapshot_creator::LocalSnapshotComplete;
pub use state_change_listener::PeerStateListener;
pub(crate) use state_change_listener::new as state_change_channel;
pub(crate) use state_invoker::StateInvoker;
pub use types::{
    Checksum, CommitMode, CommitResult, Epoch, InvalidEpochBytes, MetaVersion, MutationId, PeerId, PeerState,
    SegmentId,
};
