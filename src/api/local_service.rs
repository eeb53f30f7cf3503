use crate::actor::WeakActorClient;
use crate::changelog::ChangeLogCache;
use crate::peer::{
    AdvanceSegmentInput, AdvanceSegmentOutput, ApplyChangesInput, ApplyChangesOutput, ChangeLogInfo, MetaStateError,
    MetaStateService, PingLeaderInput, ReadChangeLogInput, ReadSnapshotInput, SegmentId, SyncOutput,
};
use crate::snapshot::{SnapshotInfo, SnapshotStore};
use bytes::Bytes;
use std::sync::Arc;

/// The local peer as seen by other peers. Role-dependent calls go through the control task;
/// history reads are served straight from storage on the blocking pool, so they never queue
/// behind the state context.
///
/// Holds the control task weakly: serving RPCs doesn't keep a peer alive.
pub(crate) struct LocalPeerService {
    actor_client: WeakActorClient,
    changelog_cache: Arc<ChangeLogCache>,
    snapshot_store: Arc<SnapshotStore>,
}

impl LocalPeerService {
    pub(crate) fn new(
        actor_client: WeakActorClient,
        changelog_cache: Arc<ChangeLogCache>,
        snapshot_store: Arc<SnapshotStore>,
    ) -> Self {
        LocalPeerService {
            actor_client,
            changelog_cache,
            snapshot_store,
        }
    }

    async fn read_storage<R, F>(&self, read: F) -> Result<R, MetaStateError>
    where
        F: FnOnce(&ChangeLogCache, &SnapshotStore) -> Result<R, MetaStateError> + Send + 'static,
        R: Send + 'static,
    {
        let changelog_cache = self.changelog_cache.clone();
        let snapshot_store = self.snapshot_store.clone();

        tokio::task::spawn_blocking(move || read(&changelog_cache, &snapshot_store))
            .await
            .map_err(|e| MetaStateError::IoError(format!("Storage read task failed: {}", e)))?
    }
}

#[async_trait::async_trait]
impl MetaStateService for LocalPeerService {
    async fn sync(&self) -> Result<SyncOutput, MetaStateError> {
        self.actor_client.upgrade()?.sync().await
    }

    async fn get_snapshot_info(&self, snapshot_id: SegmentId) -> Result<SnapshotInfo, MetaStateError> {
        self.read_storage(move |_, snapshots| Ok(snapshots.info(snapshot_id)?))
            .await
    }

    async fn read_snapshot(&self, input: ReadSnapshotInput) -> Result<Bytes, MetaStateError> {
        self.read_storage(move |_, snapshots| Ok(snapshots.read(input.snapshot_id, input.offset, input.length)?))
            .await
    }

    async fn get_change_log_info(&self, change_log_id: SegmentId) -> Result<ChangeLogInfo, MetaStateError> {
        self.read_storage(move |changelogs, _| Ok(changelogs.get(change_log_id)?.info()))
            .await
    }

    async fn read_change_log(&self, input: ReadChangeLogInput) -> Result<Vec<Bytes>, MetaStateError> {
        self.read_storage(move |changelogs, _| {
            let changelog = changelogs.get(input.change_log_id)?;
            Ok(changelog.read(input.start_record_id, input.record_count)?)
        })
        .await
    }

    async fn apply_changes(&self, input: ApplyChangesInput) -> Result<ApplyChangesOutput, MetaStateError> {
        self.actor_client.upgrade()?.apply_changes(input).await
    }

    async fn advance_segment(&self, input: AdvanceSegmentInput) -> Result<AdvanceSegmentOutput, MetaStateError> {
        self.actor_client.upgrade()?.advance_segment(input).await
    }

    async fn ping_leader(&self, input: PingLeaderInput) -> Result<(), MetaStateError> {
        self.actor_client.upgrade()?.ping_leader(input).await
    }
}
