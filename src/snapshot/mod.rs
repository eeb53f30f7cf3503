mod store;

pub use store::SnapshotInfo;
pub(crate) use store::SnapshotError;
pub(crate) use store::SnapshotStore;
