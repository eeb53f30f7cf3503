use crate::actor::WeakActorClient;
use crate::peer::cell::CellManager;
use crate::peer::rpc_api::{
    call_with_timeout, AdvanceSegmentInput, AdvanceSegmentOutput, ApplyChangesInput, ApplyChangesOutput,
    MetaStateError, MetaStateService, RpcMethod,
};
use crate::peer::state_invoker::StateInvoker;
use crate::peer::types::{CommitMode, CommitResult, Epoch, MetaVersion, MutationId, PeerId};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const RECENT_MUTATIONS_CAPACITY: usize = 4096;

#[derive(Debug)]
pub(crate) struct CommitChangeInput {
    pub(crate) data: Bytes,
    pub(crate) mode: CommitMode,
    pub(crate) mutation_id: Option<MutationId>,
}

#[derive(Debug)]
pub(crate) struct LocalCommitComplete {
    pub(crate) epoch: Epoch,
    pub(crate) version: MetaVersion,
    pub(crate) result: Result<MetaVersion, MetaStateError>,
}

#[derive(Debug)]
pub(crate) struct CommitTimeout {
    pub(crate) epoch: Epoch,
    pub(crate) version: MetaVersion,
}

#[derive(Debug)]
pub(crate) struct ReplicationReply {
    pub(crate) epoch: Epoch,
    pub(crate) peer_id: PeerId,
    pub(crate) outcome: ReplicationOutcome,
}

#[derive(Debug)]
pub(crate) enum ReplicationOutcome {
    Changes {
        version: MetaVersion,
        count: u32,
        result: Result<ApplyChangesOutput, MetaStateError>,
    },
    SegmentAdvance {
        version: MetaVersion,
        result: Result<AdvanceSegmentOutput, MetaStateError>,
    },
}

#[derive(Clone, Debug)]
enum ReplicationItem {
    Change(MetaVersion, Bytes),
    AdvanceSegment(MetaVersion),
}

struct PendingCommit {
    applied_locally: bool,
    mutation_id: Option<MutationId>,
    callback: oneshot::Sender<CommitResult>,
}

/// Leader side of the commit protocol for one epoch.
///
/// Every change gets the next version, goes to the state context for the local append, and to
/// one replicator task per follower. A change resolves `Committed` once the leader and enough
/// followers to form a quorum have it durably. Followers acknowledge prefixes, so an ack for
/// version `v` covers everything before it.
pub(crate) struct LeaderCommitter {
    logger: slog::Logger,
    epoch: Epoch,
    cell: Arc<CellManager>,
    state_invoker: StateInvoker,
    actor_client: WeakActorClient,
    cancel: CancellationToken,
    commit_timeout: Duration,
    next_version: MetaVersion,
    replicators: Vec<mpsc::UnboundedSender<ReplicationItem>>,
    // Next version each follower is known to hold durably.
    acked: HashMap<PeerId, MetaVersion>,
    pending: BTreeMap<MetaVersion, PendingCommit>,
    recent_mutations: RecentMutations,
}

pub(crate) struct LeaderCommitterConfig {
    pub(crate) commit_timeout: Duration,
    pub(crate) rpc_timeout: Duration,
    pub(crate) snapshot_timeout: Duration,
    pub(crate) max_batch_size: usize,
}

impl LeaderCommitter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        logger: slog::Logger,
        epoch: Epoch,
        version: MetaVersion,
        cell: Arc<CellManager>,
        state_invoker: StateInvoker,
        actor_client: WeakActorClient,
        cancel: CancellationToken,
        config: LeaderCommitterConfig,
    ) -> Self {
        let mut replicators = Vec::new();
        for (peer_id, channel) in cell.others() {
            let (tx, rx) = mpsc::unbounded_channel();
            let task = ReplicatorTask {
                logger: logger.new(slog::o!("Follower" => peer_id.0)),
                epoch,
                peer_id,
                channel: channel.clone(),
                receiver: rx,
                lookahead: None,
                actor_client: actor_client.clone(),
                cancel: cancel.clone(),
                rpc_timeout: config.rpc_timeout,
                snapshot_timeout: config.snapshot_timeout,
                max_batch_size: config.max_batch_size,
            };
            tokio::task::spawn(task.run());
            replicators.push(tx);
        }

        LeaderCommitter {
            logger,
            epoch,
            cell,
            state_invoker,
            actor_client,
            cancel,
            commit_timeout: config.commit_timeout,
            next_version: version,
            replicators,
            acked: HashMap::new(),
            pending: BTreeMap::new(),
            recent_mutations: RecentMutations::new(RECENT_MUTATIONS_CAPACITY),
        }
    }

    /// Version the next change will be assigned.
    pub(crate) fn next_version(&self) -> MetaVersion {
        self.next_version
    }

    pub(crate) fn is_recently_committed(&self, mutation_id: MutationId) -> bool {
        self.recent_mutations.contains(&mutation_id)
    }

    pub(crate) fn is_pending(&self, version: MetaVersion) -> bool {
        self.pending.contains_key(&version)
    }

    pub(crate) fn commit(&mut self, input: CommitChangeInput, callback: oneshot::Sender<CommitResult>) -> MetaVersion {
        let version = self.next_version;
        self.next_version = version.next();

        let data = input.data.clone();
        let local_commit = self
            .state_invoker
            .try_invoke(move |state| state.apply_changes(version, &[data]));
        let actor_client = self.actor_client.clone();
        let epoch = self.epoch;
        tokio::task::spawn(async move {
            let result = local_commit.await;
            actor_client
                .local_commit_complete(LocalCommitComplete { epoch, version, result })
                .await;
        });

        self.replicate(ReplicationItem::Change(version, input.data));
        self.schedule_timeout(version);

        self.pending.insert(
            version,
            PendingCommit {
                applied_locally: false,
                mutation_id: input.mutation_id,
                callback,
            },
        );
        version
    }

    /// Closes the current segment on every follower. Returns the version the segment closes at.
    pub(crate) fn advance_segment(&mut self) -> MetaVersion {
        let version = self.next_version;
        self.next_version = version.next_segment();
        self.replicate(ReplicationItem::AdvanceSegment(version));
        version
    }

    pub(crate) fn on_local_commit(&mut self, version: MetaVersion) {
        if let Some(pending) = self.pending.get_mut(&version) {
            pending.applied_locally = true;
        }
        self.resolve_committed();
    }

    /// `next` is the version after the last one the follower holds.
    pub(crate) fn on_follower_ack(&mut self, follower_id: PeerId, next: MetaVersion) {
        let acked = self.acked.entry(follower_id).or_default();
        if next > *acked {
            *acked = next;
        }
        self.resolve_committed();
    }

    /// Pending changes become `MaybeCommitted`: they're out, but nobody can say where.
    pub(crate) fn abort(&mut self) {
        for (version, pending) in std::mem::take(&mut self.pending) {
            slog::warn!(self.logger, "Change {} is in doubt", version);
            let _ = pending.callback.send(CommitResult::MaybeCommitted);
        }
    }

    fn resolve_committed(&mut self) {
        let quorum = self.cell.quorum();
        // Acks are prefix acks, so committed versions form a prefix of the pending ones.
        let committed: Vec<MetaVersion> = self
            .pending
            .iter()
            .take_while(|(version, pending)| self.ack_count(**version, pending) >= quorum)
            .map(|(version, _)| *version)
            .collect();

        for version in committed {
            if let Some(pending) = self.pending.remove(&version) {
                slog::debug!(self.logger, "Change {} committed", version);
                if let Some(mutation_id) = pending.mutation_id {
                    self.recent_mutations.insert(mutation_id);
                }
                let _ = pending.callback.send(CommitResult::Committed);
            }
        }
    }

    fn ack_count(&self, version: MetaVersion, pending: &PendingCommit) -> usize {
        let remote = self.acked.values().filter(|next| **next > version).count();
        remote + pending.applied_locally as usize
    }

    fn replicate(&self, item: ReplicationItem) {
        for replicator in &self.replicators {
            let _ = replicator.send(item.clone());
        }
    }

    fn schedule_timeout(&self, version: MetaVersion) {
        let actor_client = self.actor_client.clone();
        let cancel = self.cancel.clone();
        let epoch = self.epoch;
        let timeout = self.commit_timeout;
        tokio::task::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    actor_client.commit_timeout(CommitTimeout { epoch, version }).await;
                }
            }
        });
    }
}

/// Sends one follower its share of the epoch's traffic, in order, one call at a time.
struct ReplicatorTask {
    logger: slog::Logger,
    epoch: Epoch,
    peer_id: PeerId,
    channel: Arc<dyn MetaStateService>,
    receiver: mpsc::UnboundedReceiver<ReplicationItem>,
    lookahead: Option<ReplicationItem>,
    actor_client: WeakActorClient,
    cancel: CancellationToken,
    rpc_timeout: Duration,
    snapshot_timeout: Duration,
    max_batch_size: usize,
}

impl ReplicatorTask {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.replicate() => {}
        }
    }

    async fn replicate(&mut self) {
        while let Some(item) = self.next_item().await {
            let outcome = match item {
                ReplicationItem::Change(version, data) => self.send_changes(version, data).await,
                ReplicationItem::AdvanceSegment(version) => self.send_segment_advance(version).await,
            };
            self.actor_client
                .replication_reply(ReplicationReply {
                    epoch: self.epoch,
                    peer_id: self.peer_id,
                    outcome,
                })
                .await;
        }
    }

    async fn next_item(&mut self) -> Option<ReplicationItem> {
        match self.lookahead.take() {
            Some(item) => Some(item),
            None => self.receiver.recv().await,
        }
    }

    async fn send_changes(&mut self, version: MetaVersion, first: Bytes) -> ReplicationOutcome {
        let mut changes = vec![first];
        while changes.len() < self.max_batch_size {
            match self.receiver.try_recv() {
                Ok(ReplicationItem::Change(next, data)) if next == version.advance(changes.len() as u32) => {
                    changes.push(data)
                }
                Ok(other) => {
                    self.lookahead = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        let count = changes.len() as u32;
        let input = ApplyChangesInput {
            epoch: self.epoch,
            version,
            changes,
        };
        slog::debug!(self.logger, "ClientWire - ApplyChanges {} x{}", version, count);
        let result = call_with_timeout(
            RpcMethod::ApplyChanges,
            self.rpc_timeout,
            self.channel.apply_changes(input),
        )
        .await;
        if let Err(e) = &result {
            slog::debug!(self.logger, "ApplyChanges {} failed: {}", version, e);
        }

        ReplicationOutcome::Changes { version, count, result }
    }

    async fn send_segment_advance(&mut self, version: MetaVersion) -> ReplicationOutcome {
        let input = AdvanceSegmentInput {
            epoch: self.epoch,
            version,
        };
        slog::debug!(self.logger, "ClientWire - AdvanceSegment {}", version);
        // Followers snapshot before replying, which can take much longer than a plain call.
        let result = call_with_timeout(
            RpcMethod::AdvanceSegment,
            self.snapshot_timeout,
            self.channel.advance_segment(input),
        )
        .await;
        if let Err(e) = &result {
            slog::debug!(self.logger, "AdvanceSegment {} failed: {}", version, e);
        }

        ReplicationOutcome::SegmentAdvance { version, result }
    }
}

/// Bounded set of mutation ids committed in this epoch, forgetting the oldest first.
struct RecentMutations {
    capacity: usize,
    ids: HashSet<MutationId>,
    order: VecDeque<MutationId>,
}

impl RecentMutations {
    fn new(capacity: usize) -> Self {
        RecentMutations {
            capacity,
            ids: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn contains(&self, id: &MutationId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: MutationId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor;
    use crate::changelog::ChangeLogCache;
    use crate::logging::discard_logger;
    use crate::peer::decorated::DecoratedMetaState;
    use crate::peer::test_utils::{change, unreachable_cell, HashingState, TestUtilActor};
    use crate::snapshot::SnapshotStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        committer: LeaderCommitter,
        actor: TestUtilActor,
        _actor_client: actor::ActorClient,
        epoch: Epoch,
    }

    async fn fixture(peer_count: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let logger = discard_logger();
        let cache = ChangeLogCache::new(logger.clone(), dir.path().join("changelogs"), 4).unwrap();
        let store = SnapshotStore::new(logger.clone(), dir.path().join("snapshots")).unwrap();
        let state = DecoratedMetaState::new(
            logger.clone(),
            Box::new(HashingState::default()),
            Arc::new(cache),
            Arc::new(store),
        )
        .unwrap();
        let state_invoker = StateInvoker::spawn(logger.clone(), state).unwrap();
        let epoch = Epoch::new_random();
        let version = state_invoker
            .try_invoke(move |state| state.start_epoch_segment(epoch))
            .await
            .unwrap();

        let (actor_client, rx) = actor::create(16);
        let committer = LeaderCommitter::new(
            logger,
            epoch,
            version,
            unreachable_cell(PeerId(0), peer_count),
            state_invoker,
            actor_client.weak(),
            CancellationToken::new(),
            LeaderCommitterConfig {
                commit_timeout: Duration::from_secs(60),
                rpc_timeout: Duration::from_millis(10),
                snapshot_timeout: Duration::from_millis(50),
                max_batch_size: 10,
            },
        );

        Fixture {
            _dir: dir,
            committer,
            actor: TestUtilActor::new(rx),
            _actor_client: actor_client,
            epoch,
        }
    }

    fn input(i: u32) -> CommitChangeInput {
        CommitChangeInput {
            data: change(i),
            mode: CommitMode::MayFail,
            mutation_id: None,
        }
    }

    #[tokio::test]
    async fn single_peer_commits_on_local_append() {
        let mut f = fixture(1).await;
        let (tx, mut rx) = oneshot::channel();
        let version = f.committer.commit(input(0), tx);
        assert_eq!(version, MetaVersion::new(0, 0));
        assert_eq!(f.committer.next_version(), MetaVersion::new(0, 1));

        match f.actor.recv().await {
            actor::Event::LocalCommitComplete(complete) => {
                assert_eq!(complete.epoch, f.epoch);
                assert_eq!(complete.result.unwrap(), MetaVersion::new(0, 1));
                f.committer.on_local_commit(complete.version);
            }
            other => panic!("Unexpected event {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap(), CommitResult::Committed);
    }

    #[tokio::test]
    async fn quorum_of_three_needs_one_follower() {
        let mut f = fixture(3).await;
        let (tx, mut rx) = oneshot::channel();
        let version = f.committer.commit(input(0), tx);

        f.committer.on_local_commit(version);
        assert!(rx.try_recv().is_err());
        assert!(f.committer.is_pending(version));

        f.committer.on_follower_ack(PeerId(2), version.next());
        assert_eq!(rx.try_recv().unwrap(), CommitResult::Committed);
        assert!(!f.committer.is_pending(version));
    }

    #[tokio::test]
    async fn follower_ack_covers_prefix() {
        let mut f = fixture(3).await;
        let (tx0, mut rx0) = oneshot::channel();
        let (tx1, mut rx1) = oneshot::channel();
        let v0 = f.committer.commit(input(0), tx0);
        let v1 = f.committer.commit(input(1), tx1);

        f.committer.on_follower_ack(PeerId(1), v1.next());
        assert!(rx0.try_recv().is_err());

        // A later change can't commit ahead of an earlier one.
        f.committer.on_local_commit(v1);
        assert!(rx1.try_recv().is_err());

        f.committer.on_local_commit(v0);
        assert_eq!(rx0.try_recv().unwrap(), CommitResult::Committed);
        assert_eq!(rx1.try_recv().unwrap(), CommitResult::Committed);
    }

    #[tokio::test]
    async fn abort_leaves_pending_in_doubt() {
        let mut f = fixture(3).await;
        let (tx, mut rx) = oneshot::channel();
        let version = f.committer.commit(input(0), tx);
        f.committer.on_local_commit(version);

        f.committer.abort();
        assert_eq!(rx.try_recv().unwrap(), CommitResult::MaybeCommitted);
        assert!(!f.committer.is_pending(version));
    }

    #[tokio::test]
    async fn remembers_committed_mutations() {
        let mut f = fixture(1).await;
        let mutation_id = MutationId::new_random();
        let (tx, _rx) = oneshot::channel();
        let version = f.committer.commit(
            CommitChangeInput {
                data: change(0),
                mode: CommitMode::NeverFails,
                mutation_id: Some(mutation_id),
            },
            tx,
        );
        assert!(!f.committer.is_recently_committed(mutation_id));

        f.committer.on_local_commit(version);
        assert!(f.committer.is_recently_committed(mutation_id));
    }

    #[tokio::test]
    async fn segment_advance_moves_next_version() {
        let mut f = fixture(3).await;
        let (tx, _rx) = oneshot::channel();
        f.committer.commit(input(0), tx);

        assert_eq!(f.committer.advance_segment(), MetaVersion::new(0, 1));
        assert_eq!(f.committer.next_version(), MetaVersion::new(1, 0));
    }

    #[test]
    fn recent_mutations_forget_oldest() {
        let mut recent = RecentMutations::new(2);
        let ids: Vec<MutationId> = (0..3).map(|_| MutationId::new_random()).collect();
        for id in &ids {
            recent.insert(*id);
        }

        assert!(!recent.contains(&ids[0]));
        assert!(recent.contains(&ids[1]));
        assert!(recent.contains(&ids[2]));
    }
}
