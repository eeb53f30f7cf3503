mod actor;
mod api;
mod changelog;
mod fs_util;
mod logging;
mod peer;
mod server;
mod snapshot;
mod grpc {
    include!("../generated/meta_state.rs");
}

pub use api::create_meta_state_manager;
pub use api::serve_rpc;
pub use api::CellConfig;
pub use api::CreationError;
pub use api::ElectionManager;
pub use api::MetaState;
pub use api::MetaStateConfig;
pub use api::MetaStateManager;
pub use api::MetaStateOptions;
pub use api::PeerChannel;
pub use logging::create_root_logger_for_file;
pub use logging::create_root_logger_for_stdout;
pub use logging::discard_logger;
pub use peer::AdvanceSegmentInput;
pub use peer::AdvanceSegmentOutput;
pub use peer::ApplyChangesInput;
pub use peer::ApplyChangesOutput;
pub use peer::ChangeLogInfo;
pub use peer::Checksum;
pub use peer::CommitMode;
pub use peer::CommitResult;
pub use peer::ConnectError;
pub use peer::Epoch;
pub use peer::InvalidEpochBytes;
pub use peer::MetaStateError;
pub use peer::MetaStateService;
pub use peer::MetaVersion;
pub use peer::MonitoringInfo;
pub use peer::MutationId;
pub use peer::PeerId;
pub use peer::PeerState;
pub use peer::PeerStateListener;
pub use peer::PingLeaderInput;
pub use peer::ReadChangeLogInput;
pub use peer::ReadSnapshotInput;
pub use peer::RpcMethod;
pub use peer::SegmentId;
pub use peer::SnapshotOutput;
pub use peer::SyncOutput;
pub use server::RpcServerShutdownHandle;
pub use snapshot::SnapshotInfo;
