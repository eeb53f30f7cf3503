use crate::actor::{Callback, WeakActorClient};
use crate::api::{ElectionManager, MetaStateOptionsValidated};
use crate::peer::cell::CellManager;
use crate::peer::follower_tracker::FollowerTracker;
use crate::peer::leader_committer::{
    CommitChangeInput, CommitTimeout, LeaderCommitter, LeaderCommitterConfig, LocalCommitComplete, ReplicationOutcome,
    ReplicationReply,
};
use crate::peer::recovery::{apply_postponed, PostponedChanges, Recovery, RecoveryComplete, RecoveryConfig};
use crate::peer::rpc_api::{
    AdvanceSegmentInput, AdvanceSegmentOutput, ApplyChangesInput, ApplyChangesOutput, MetaStateError,
    PingLeaderInput, SyncOutput,
};
use crate::peer::snapshot_creator::{self, LocalSnapshotComplete, SnapshotCreator, SnapshotOutput};
use crate::peer::state_change_listener::PeerStateChangeNotifier;
use crate::peer::state_invoker::StateInvoker;
use crate::peer::timers::LeaderPingerHandle;
use crate::peer::types::{CommitMode, CommitResult, Epoch, MetaVersion, PeerId, PeerState};
use crate::snapshot::SnapshotStore;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of a peer, for operators and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitoringInfo {
    pub state: PeerState,
    pub epoch: Option<Epoch>,
    pub leader_id: Option<PeerId>,
    /// Version of the applied state.
    pub version: MetaVersion,
    /// Furthest version local history could replay to.
    pub reachable_version: MetaVersion,
    /// Leader only: followers currently counted towards the quorum.
    pub active_followers: Vec<PeerId>,
    /// Leader only.
    pub has_quorum: Option<bool>,
}

/// Everything that exists for one epoch. Dropping it cancels every task the epoch spawned.
struct EpochContext {
    epoch: Epoch,
    cancel: CancellationToken,
    role: Role,
}

impl Drop for EpochContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Role {
    LeaderRecovery {
        // Followers asking where to recover to before this peer knows.
        pending_syncs: Vec<Callback<SyncOutput, MetaStateError>>,
    },
    Leading(LeaderContext),
    FollowerRecovery {
        leader_id: PeerId,
        postponed: PostponedChanges,
    },
    Following {
        leader_id: PeerId,
        _pinger: LeaderPingerHandle,
    },
}

struct LeaderContext {
    committer: LeaderCommitter,
    tracker: FollowerTracker,
    snapshot_creator: SnapshotCreator,
}

/// The peer state machine. Lives on the control context: every method runs on the actor and
/// must return promptly, handing disk work to the state context and network work to tasks.
pub(crate) struct Peer {
    logger: slog::Logger,
    cell: Arc<CellManager>,
    election: Arc<dyn ElectionManager>,
    state_invoker: StateInvoker,
    snapshot_store: Arc<SnapshotStore>,
    actor_client: WeakActorClient,
    options: MetaStateOptionsValidated,
    state: PeerState,
    state_notifier: PeerStateChangeNotifier,
    epoch: Option<EpochContext>,
}

impl Peer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        logger: slog::Logger,
        cell: Arc<CellManager>,
        election: Arc<dyn ElectionManager>,
        state_invoker: StateInvoker,
        snapshot_store: Arc<SnapshotStore>,
        actor_client: WeakActorClient,
        options: MetaStateOptionsValidated,
        state_notifier: PeerStateChangeNotifier,
    ) -> Self {
        Peer {
            logger,
            cell,
            election,
            state_invoker,
            snapshot_store,
            actor_client,
            options,
            state: PeerState::Stopped,
            state_notifier,
            epoch: None,
        }
    }

    pub(crate) fn start(&mut self) {
        if self.state != PeerState::Stopped {
            slog::warn!(self.logger, "Ignoring start in state {:?}", self.state);
            return;
        }

        self.set_state(PeerState::Elections);
        let _ = self.state_invoker.invoke(|state| state.clear());
        self.election.start();
    }

    pub(crate) fn on_start_leading(&mut self, epoch: Epoch) {
        if self.state != PeerState::Elections {
            slog::warn!(self.logger, "Ignoring StartLeading({}) in state {:?}", epoch, self.state);
            return;
        }

        let cancel = self.begin_epoch(epoch, Role::LeaderRecovery { pending_syncs: Vec::new() });
        self.set_state(PeerState::LeaderRecovery);
        self.recovery(epoch, cancel).spawn_leader_recovery();
    }

    pub(crate) fn on_start_following(&mut self, leader_id: PeerId, epoch: Epoch) {
        if self.state != PeerState::Elections {
            slog::warn!(
                self.logger,
                "Ignoring StartFollowing({}, {}) in state {:?}",
                leader_id,
                epoch,
                self.state
            );
            return;
        }
        let leader = match self.cell.channel(leader_id) {
            Some(leader) => leader,
            None => {
                slog::error!(self.logger, "Elected leader {} is not in the cell", leader_id);
                self.election.restart();
                return;
            }
        };

        let cancel = self.begin_epoch(
            epoch,
            Role::FollowerRecovery {
                leader_id,
                postponed: PostponedChanges::new(),
            },
        );
        self.set_state(PeerState::FollowerRecovery);
        self.recovery(epoch, cancel).spawn_follower_recovery(leader);
    }

    pub(crate) fn on_stop_leading(&mut self) {
        match self.state {
            PeerState::LeaderRecovery | PeerState::Leading => self.stop_epoch(),
            state => slog::debug!(self.logger, "Ignoring StopLeading in state {:?}", state),
        }
    }

    pub(crate) fn on_stop_following(&mut self) {
        match self.state {
            PeerState::FollowerRecovery | PeerState::Following => self.stop_epoch(),
            state => slog::debug!(self.logger, "Ignoring StopFollowing in state {:?}", state),
        }
    }

    /// Abandons the current epoch and asks the election for a new one.
    pub(crate) fn restart(&mut self, reason: &str) {
        match self.state {
            PeerState::Stopped => return,
            PeerState::Elections => slog::info!(self.logger, "Restarting elections: {}", reason),
            _ => {
                slog::warn!(self.logger, "Restarting: {}", reason);
                self.stop_epoch();
            }
        }
        self.election.restart();
    }

    pub(crate) fn shut_down(&mut self) {
        self.abort_epoch();
        self.set_state(PeerState::Stopped);
    }

    pub(crate) fn commit_change(&mut self, input: CommitChangeInput, callback: oneshot::Sender<CommitResult>) {
        let epoch = match &self.epoch {
            Some(ctx) if self.state == PeerState::Leading => ctx.epoch,
            _ => {
                let _ = callback.send(CommitResult::InvalidState);
                return;
            }
        };
        let max_changes = self.options.max_changes_between_snapshots;
        let retry_delay = self.options.ping_interval;
        let actor_client = self.actor_client.clone();
        let leader = match self.leader_mut() {
            Some(leader) => leader,
            None => {
                let _ = callback.send(CommitResult::InvalidState);
                return;
            }
        };

        if let Some(mutation_id) = input.mutation_id {
            if leader.committer.is_recently_committed(mutation_id) {
                let _ = callback.send(CommitResult::Committed);
                return;
            }
        }

        if !leader.tracker.has_active_quorum() {
            match input.mode {
                CommitMode::MayFail => {
                    let _ = callback.send(CommitResult::NotCommitted);
                }
                CommitMode::NeverFails => {
                    tokio::task::spawn(async move {
                        tokio::time::sleep(retry_delay).await;
                        actor_client.retry_commit(epoch, input, callback).await;
                    });
                }
            }
            return;
        }

        let LeaderContext {
            committer,
            snapshot_creator,
            ..
        } = leader;
        committer.commit(input, callback);

        if let Some(max_changes) = max_changes {
            if committer.next_version().record_count >= max_changes {
                snapshot_creator.create_distributed(committer, None);
            }
        }
    }

    pub(crate) fn retry_commit(
        &mut self,
        epoch: Epoch,
        input: CommitChangeInput,
        callback: oneshot::Sender<CommitResult>,
    ) {
        if !self.is_current(epoch) {
            let _ = callback.send(CommitResult::NotCommitted);
            return;
        }
        self.commit_change(input, callback);
    }

    pub(crate) fn build_snapshot(&mut self, callback: Callback<SnapshotOutput, MetaStateError>) {
        let state = self.state;
        match self.leader_mut() {
            Some(leader) if state == PeerState::Leading => {
                leader
                    .snapshot_creator
                    .create_distributed(&mut leader.committer, Some(callback));
            }
            _ => callback.send(Err(MetaStateError::InvalidState(state))),
        }
    }

    pub(crate) fn monitoring_info(&self, callback: oneshot::Sender<MonitoringInfo>) {
        let mut info = MonitoringInfo {
            state: self.state,
            epoch: self.epoch.as_ref().map(|ctx| ctx.epoch),
            leader_id: None,
            version: MetaVersion::default(),
            reachable_version: MetaVersion::default(),
            active_followers: Vec::new(),
            has_quorum: None,
        };
        if let Some(ctx) = &self.epoch {
            match &ctx.role {
                Role::LeaderRecovery { .. } => info.leader_id = Some(self.cell.self_id()),
                Role::Leading(leader) => {
                    info.leader_id = Some(self.cell.self_id());
                    info.active_followers = self
                        .cell
                        .other_ids()
                        .filter(|id| leader.tracker.is_follower_active(*id))
                        .collect();
                    info.has_quorum = Some(leader.tracker.has_active_quorum());
                }
                Role::FollowerRecovery { leader_id, .. } | Role::Following { leader_id, .. } => {
                    info.leader_id = Some(*leader_id)
                }
            }
        }

        let versions = self
            .state_invoker
            .invoke(|state| (state.version(), state.reachable_version()));
        tokio::task::spawn(async move {
            let (version, reachable_version) = versions.await.unwrap_or_default();
            info.version = version;
            info.reachable_version = reachable_version;
            let _ = callback.send(info);
        });
    }

    /// Leader only. During leader recovery the answer waits until recovery settles the version.
    pub(crate) fn sync(&mut self, callback: Callback<SyncOutput, MetaStateError>) {
        let ctx = match self.epoch.as_mut() {
            Some(ctx) => ctx,
            None => {
                callback.send(Err(MetaStateError::InvalidState(self.state)));
                return;
            }
        };
        let epoch = match &mut ctx.role {
            Role::Leading(_) => ctx.epoch,
            Role::LeaderRecovery { pending_syncs } => {
                pending_syncs.push(callback);
                return;
            }
            _ => {
                callback.send(Err(MetaStateError::InvalidState(self.state)));
                return;
            }
        };

        // Queued behind every change submitted so far, so the version covers all of them.
        let query = self
            .state_invoker
            .try_invoke(|state| Ok((state.reachable_version(), state.max_snapshot_id()?)));
        tokio::task::spawn(async move {
            let result = query.await.map(|(version, max_snapshot_id)| SyncOutput {
                version,
                epoch,
                max_snapshot_id,
            });
            callback.send(result);
        });
    }

    pub(crate) fn apply_changes(
        &mut self,
        input: ApplyChangesInput,
        callback: Callback<ApplyChangesOutput, MetaStateError>,
    ) {
        let epoch = match self.check_follower_request(input.epoch) {
            Ok(epoch) => epoch,
            Err(e) => {
                callback.send(Err(e));
                return;
            }
        };

        let postponed = match self.epoch.as_mut().map(|ctx| &mut ctx.role) {
            Some(Role::FollowerRecovery { postponed, .. }) => {
                slog::debug!(
                    self.logger,
                    "Postponing {} changes at {}",
                    input.changes.len(),
                    input.version
                );
                postponed.postpone_changes(input.version, input.changes)
            }
            _ => {
                self.commit_follower(epoch, input, callback);
                return;
            }
        };

        match postponed {
            Ok(()) => callback.send(Ok(ApplyChangesOutput { committed: false })),
            Err(e) => {
                callback.send(Err(e.clone()));
                self.restart(&format!("can't postpone changes: {}", e));
            }
        }
    }

    pub(crate) fn advance_segment(
        &mut self,
        input: AdvanceSegmentInput,
        callback: Callback<AdvanceSegmentOutput, MetaStateError>,
    ) {
        let epoch = match self.check_follower_request(input.epoch) {
            Ok(epoch) => epoch,
            Err(e) => {
                callback.send(Err(e));
                return;
            }
        };

        let postponed = match self.epoch.as_mut().map(|ctx| &mut ctx.role) {
            Some(Role::FollowerRecovery { postponed, .. }) => {
                slog::debug!(self.logger, "Postponing segment advance at {}", input.version);
                postponed.postpone_segment_advance(input.version)
            }
            _ => {
                self.snapshot_follower(epoch, input, callback);
                return;
            }
        };

        callback.send(Err(MetaStateError::InvalidState(PeerState::FollowerRecovery)));
        if let Err(e) = postponed {
            self.restart(&format!("can't postpone segment advance: {}", e));
        }
    }

    pub(crate) fn ping_leader(&mut self, input: PingLeaderInput) {
        match &mut self.epoch {
            Some(EpochContext {
                epoch,
                role: Role::Leading(leader),
                ..
            }) if *epoch == input.epoch => {
                leader.tracker.process_ping(input.follower_id, input.state);
            }
            _ => slog::debug!(
                self.logger,
                "Ignoring ping from peer {} in epoch {} ({:?})",
                input.follower_id,
                input.epoch,
                input.state
            ),
        }
    }

    pub(crate) fn recovery_complete(&mut self, complete: RecoveryComplete) {
        if !self.is_current(complete.epoch) {
            return;
        }
        let version = match complete.result {
            Ok(version) => version,
            Err(e) => {
                self.restart(&format!("recovery failed: {}", e));
                return;
            }
        };

        let epoch = complete.epoch;
        let ctx = match self.epoch.as_mut() {
            Some(ctx) => ctx,
            None => return,
        };
        let placeholder = Role::LeaderRecovery { pending_syncs: Vec::new() };
        match std::mem::replace(&mut ctx.role, placeholder) {
            Role::LeaderRecovery { pending_syncs } => {
                let logger = self.logger.new(slog::o!("Epoch" => epoch.to_string()));
                let committer = LeaderCommitter::new(
                    logger.clone(),
                    epoch,
                    version,
                    self.cell.clone(),
                    self.state_invoker.clone(),
                    self.actor_client.clone(),
                    ctx.cancel.child_token(),
                    LeaderCommitterConfig {
                        commit_timeout: self.options.commit_timeout,
                        rpc_timeout: self.options.rpc_timeout,
                        snapshot_timeout: self.options.snapshot_timeout,
                        max_batch_size: self.options.max_batch_size,
                    },
                );
                let snapshot_creator = SnapshotCreator::new(
                    logger,
                    epoch,
                    self.state_invoker.clone(),
                    self.actor_client.clone(),
                    self.cell.other_ids().collect(),
                );
                ctx.role = Role::Leading(LeaderContext {
                    committer,
                    tracker: FollowerTracker::new(self.cell.clone(), self.options.follower_liveness_timeout),
                    snapshot_creator,
                });
                self.set_state(PeerState::Leading);
                for callback in pending_syncs {
                    self.sync(callback);
                }
            }
            Role::FollowerRecovery { leader_id, postponed } => {
                let leader = match self.cell.channel(leader_id) {
                    Some(leader) => leader,
                    None => {
                        ctx.role = Role::FollowerRecovery { leader_id, postponed };
                        return;
                    }
                };

                if !postponed.is_empty() {
                    slog::info!(self.logger, "Applying {} postponed items", postponed.len());
                    let items = postponed.into_items();
                    let drain = self
                        .state_invoker
                        .try_invoke(move |state| apply_postponed(state, epoch, items));
                    let actor_client = self.actor_client.clone();
                    tokio::task::spawn(async move {
                        if let Err(e) = drain.await {
                            actor_client
                                .epoch_failure(epoch, format!("postponed changes don't apply: {}", e))
                                .await;
                        }
                    });
                }

                let pinger = LeaderPingerHandle::spawn_pinger_task(
                    self.logger.new(slog::o!("Leader" => leader_id.0)),
                    leader,
                    PingLeaderInput {
                        follower_id: self.cell.self_id(),
                        epoch,
                        state: PeerState::Following,
                    },
                    self.options.ping_interval,
                    self.options.rpc_timeout,
                );
                ctx.role = Role::Following {
                    leader_id,
                    _pinger: pinger,
                };
                self.set_state(PeerState::Following);
            }
            role => ctx.role = role,
        }
    }

    pub(crate) fn local_commit_complete(&mut self, complete: LocalCommitComplete) {
        if !self.is_current(complete.epoch) {
            return;
        }
        match complete.result {
            Ok(_) => {
                if let Some(leader) = self.leader_mut() {
                    leader.committer.on_local_commit(complete.version);
                }
            }
            Err(e) => self.restart(&format!("local commit at {} failed: {}", complete.version, e)),
        }
    }

    pub(crate) fn replication_reply(&mut self, reply: ReplicationReply) {
        if !self.is_current(reply.epoch) {
            return;
        }
        let logger = self.logger.clone();
        let leader = match self.leader_mut() {
            Some(leader) => leader,
            None => return,
        };

        match reply.outcome {
            ReplicationOutcome::Changes { version, count, result } => match result {
                Ok(output) if output.committed => leader.committer.on_follower_ack(reply.peer_id, version.advance(count)),
                Ok(_) => slog::debug!(logger, "Peer {} postponed changes at {}", reply.peer_id, version),
                Err(MetaStateError::InvalidEpoch { expected, .. }) => {
                    slog::warn!(logger, "Peer {} is in epoch {}", reply.peer_id, expected)
                }
                Err(e) => slog::debug!(logger, "Peer {} rejected changes at {}: {}", reply.peer_id, version, e),
            },
            ReplicationOutcome::SegmentAdvance { version, result } => {
                let acked = result.is_ok();
                leader
                    .snapshot_creator
                    .on_follower_reply(reply.peer_id, version, result.map(|output| output.checksum));
                if acked {
                    leader.committer.on_follower_ack(reply.peer_id, version.next_segment());
                }
            }
        }
    }

    pub(crate) fn commit_timeout(&mut self, timeout: CommitTimeout) {
        if !self.is_current(timeout.epoch) {
            return;
        }
        let pending = self
            .leader_mut()
            .map_or(false, |leader| leader.committer.is_pending(timeout.version));
        if pending {
            self.restart(&format!("change {} wasn't acknowledged by a quorum in time", timeout.version));
        }
    }

    pub(crate) fn local_snapshot_complete(&mut self, complete: LocalSnapshotComplete) {
        if !self.is_current(complete.epoch) {
            return;
        }
        let failed = match self.leader_mut() {
            Some(leader) => leader
                .snapshot_creator
                .on_local_complete(complete.version, complete.result)
                .err(),
            None => None,
        };
        if let Some(e) = failed {
            self.restart(&format!("local snapshot at {} failed: {}", complete.version, e));
        }
    }

    pub(crate) fn epoch_failure(&mut self, epoch: Epoch, reason: &str) {
        if self.is_current(epoch) {
            self.restart(reason);
        }
    }

    fn commit_follower(
        &self,
        epoch: Epoch,
        input: ApplyChangesInput,
        callback: Callback<ApplyChangesOutput, MetaStateError>,
    ) {
        let version = input.version;
        let changes = input.changes;
        let commit = self
            .state_invoker
            .try_invoke(move |state| state.apply_changes(version, &changes));
        let actor_client = self.actor_client.clone();
        let logger = self.logger.clone();
        tokio::task::spawn(async move {
            match commit.await {
                Ok(_) => callback.send(Ok(ApplyChangesOutput { committed: true })),
                Err(e) => {
                    slog::warn!(logger, "Changes at {} are unexpected: {}", version, e);
                    callback.send(Err(e.clone()));
                    actor_client
                        .epoch_failure(epoch, format!("can't apply changes at {}: {}", version, e))
                        .await;
                }
            }
        });
    }

    fn snapshot_follower(
        &self,
        epoch: Epoch,
        input: AdvanceSegmentInput,
        callback: Callback<AdvanceSegmentOutput, MetaStateError>,
    ) {
        let version = input.version;
        let snapshot = snapshot_creator::create_local(&self.state_invoker, version, epoch);
        let actor_client = self.actor_client.clone();
        tokio::task::spawn(async move {
            match snapshot.await {
                Ok(checksum) => callback.send(Ok(AdvanceSegmentOutput { checksum })),
                Err(e) => {
                    callback.send(Err(e.clone()));
                    actor_client
                        .epoch_failure(epoch, format!("can't snapshot at {}: {}", version, e))
                        .await;
                }
            }
        });
    }

    /// Common gate for leader-to-follower calls. A foreign epoch means one of us is stale,
    /// and this side gives up its epoch either way.
    fn check_follower_request(&mut self, received: Epoch) -> Result<Epoch, MetaStateError> {
        let expected = match (&self.epoch, self.state) {
            (Some(ctx), PeerState::FollowerRecovery) | (Some(ctx), PeerState::Following) => ctx.epoch,
            (_, state) => return Err(MetaStateError::InvalidState(state)),
        };
        if received != expected {
            self.restart(&format!("leader call from epoch {}", received));
            return Err(MetaStateError::InvalidEpoch { expected, received });
        }

        Ok(expected)
    }

    fn begin_epoch(&mut self, epoch: Epoch, role: Role) -> CancellationToken {
        slog::info!(self.logger, "Starting epoch {}", epoch);
        let cancel = CancellationToken::new();
        self.epoch = Some(EpochContext {
            epoch,
            cancel: cancel.clone(),
            role,
        });
        cancel.child_token()
    }

    fn stop_epoch(&mut self) {
        self.abort_epoch();
        self.set_state(PeerState::Elections);
    }

    fn abort_epoch(&mut self) {
        if let Some(mut ctx) = self.epoch.take() {
            slog::info!(self.logger, "Leaving epoch {}", ctx.epoch);
            match &mut ctx.role {
                Role::Leading(leader) => {
                    leader.committer.abort();
                    leader.snapshot_creator.abort(PeerState::Elections);
                }
                Role::LeaderRecovery { pending_syncs } => {
                    for callback in pending_syncs.drain(..) {
                        callback.send(Err(MetaStateError::InvalidState(PeerState::Elections)));
                    }
                }
                _ => {}
            }
        }
    }

    fn recovery(&self, epoch: Epoch, cancel: CancellationToken) -> Recovery {
        Recovery::new(
            self.logger.new(slog::o!("Epoch" => epoch.to_string())),
            epoch,
            self.cell.clone(),
            self.state_invoker.clone(),
            self.snapshot_store.clone(),
            self.actor_client.clone(),
            cancel,
            RecoveryConfig {
                rpc_timeout: self.options.rpc_timeout,
                snapshot_block_size: self.options.snapshot_block_size,
                changelog_block_size: self.options.changelog_block_size,
                retry_backoff: self.options.recovery_retry_backoff,
                max_attempts: self.options.recovery_max_attempts,
            },
        )
    }

    fn is_current(&self, epoch: Epoch) -> bool {
        self.epoch.as_ref().map_or(false, |ctx| ctx.epoch == epoch)
    }

    fn leader_mut(&mut self) -> Option<&mut LeaderContext> {
        match self.epoch.as_mut().map(|ctx| &mut ctx.role) {
            Some(Role::Leading(leader)) => Some(leader),
            _ => None,
        }
    }

    fn set_state(&mut self, state: PeerState) {
        if self.state != state {
            slog::info!(self.logger, "State {:?} -> {:?}", self.state, state);
            self.state = state;
            self.state_notifier.notify_new_state(state);
        }
    }
}
