use crate::actor::ActorClient;
use crate::peer::{
    CommitChangeInput, CommitMode, CommitResult, Epoch, MetaStateError, MetaStateService, MetaVersion,
    MonitoringInfo, MutationId, PeerId, PeerStateListener, SnapshotOutput, StateInvoker,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// MetaStateManager is the handle an application holds on its peer of the replicated meta state.
///
/// Cheap to clone. The peer keeps running for as long as any clone is alive.
#[derive(Clone)]
pub struct MetaStateManager {
    logger: slog::Logger,
    actor_client: ActorClient,
    state_invoker: StateInvoker,
    local_service: Arc<dyn MetaStateService>,
    state_listener: PeerStateListener,
}

impl MetaStateManager {
    pub(crate) fn new(
        logger: slog::Logger,
        actor_client: ActorClient,
        state_invoker: StateInvoker,
        local_service: Arc<dyn MetaStateService>,
        state_listener: PeerStateListener,
    ) -> Self {
        MetaStateManager {
            logger,
            actor_client,
            state_invoker,
            local_service,
            state_listener,
        }
    }

    /// Joins elections. Only has an effect on a stopped peer.
    pub async fn start(&self) -> Result<(), MetaStateError> {
        self.actor_client.start().await
    }

    /// Replicates `data` and waits for the outcome. Only the leader accepts changes.
    pub async fn commit_change(&self, data: Bytes, mode: CommitMode) -> CommitResult {
        self.commit(CommitChangeInput {
            data,
            mode,
            mutation_id: None,
        })
        .await
    }

    /// Like `commit_change`, but a retry carrying the same `mutation_id` within the same epoch is
    /// answered from memory instead of being applied twice.
    pub async fn commit_change_with_id(&self, data: Bytes, mode: CommitMode, mutation_id: MutationId) -> CommitResult {
        self.commit(CommitChangeInput {
            data,
            mode,
            mutation_id: Some(mutation_id),
        })
        .await
    }

    /// Fire-and-forget commit that keeps retrying until the epoch ends.
    pub fn commit_change_async(&self, data: Bytes) -> JoinHandle<CommitResult> {
        let manager = self.clone();
        tokio::spawn(async move { manager.commit_change(data, CommitMode::NeverFails).await })
    }

    async fn commit(&self, input: CommitChangeInput) -> CommitResult {
        let result = self.actor_client.commit_change(input).await;
        if result != CommitResult::Committed {
            slog::debug!(self.logger, "Commit resolved as {:?}", result);
        }

        result
    }

    /// Leader only. Snapshots the state on every peer at the current version and compares
    /// checksums.
    pub async fn build_snapshot(&self) -> Result<SnapshotOutput, MetaStateError> {
        self.actor_client.build_snapshot().await
    }

    /// Drops the current epoch and asks the election for a new one.
    pub async fn restart(&self) -> Result<(), MetaStateError> {
        self.actor_client.restart().await
    }

    pub async fn on_start_leading(&self, epoch: Epoch) -> Result<(), MetaStateError> {
        self.actor_client.start_leading(epoch).await
    }

    pub async fn on_start_following(&self, leader_id: PeerId, epoch: Epoch) -> Result<(), MetaStateError> {
        self.actor_client.start_following(leader_id, epoch).await
    }

    pub async fn on_stop_leading(&self) -> Result<(), MetaStateError> {
        self.actor_client.stop_leading().await
    }

    pub async fn on_stop_following(&self) -> Result<(), MetaStateError> {
        self.actor_client.stop_following().await
    }

    pub async fn monitoring_info(&self) -> Result<MonitoringInfo, MetaStateError> {
        self.actor_client.monitoring_info().await
    }

    /// Election priority: the furthest version local history can reach, packed so that a
    /// larger number means a more up-to-date peer.
    pub async fn priority(&self) -> Result<u64, MetaStateError> {
        self.state_invoker
            .invoke(|state| state.reachable_version().priority())
            .await
    }

    /// Version of the applied state.
    pub async fn version(&self) -> Result<MetaVersion, MetaStateError> {
        self.state_invoker.invoke(|state| state.version()).await
    }

    pub(crate) fn logger(&self) -> &slog::Logger {
        &self.logger
    }

    pub fn state_listener(&self) -> PeerStateListener {
        self.state_listener.clone()
    }

    /// This peer's side of the peer-to-peer protocol, for wiring peers together in process.
    pub fn local_service(&self) -> Arc<dyn MetaStateService> {
        self.local_service.clone()
    }
}
