use crate::actor::WeakActorClient;
use crate::peer::cell::CellManager;
use crate::peer::decorated::DecoratedMetaState;
use crate::peer::rpc_api::{
    call_with_timeout, ChangeLogInfo, MetaStateError, MetaStateService, ReadChangeLogInput, ReadSnapshotInput,
    RpcMethod,
};
use crate::peer::state_invoker::StateInvoker;
use crate::peer::types::{Epoch, MetaVersion, PeerId, SegmentId};
use crate::snapshot::SnapshotStore;
use bytes::Bytes;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub(crate) struct RecoveryComplete {
    pub(crate) epoch: Epoch,
    pub(crate) result: Result<MetaVersion, MetaStateError>,
}

#[derive(Clone)]
pub(crate) struct RecoveryConfig {
    pub(crate) rpc_timeout: Duration,
    pub(crate) snapshot_block_size: u32,
    pub(crate) changelog_block_size: u32,
    pub(crate) retry_backoff: Duration,
    pub(crate) max_attempts: u32,
}

/// Everything one epoch's recovery needs. Dropped with the task; cancelled with the epoch.
pub(crate) struct Recovery {
    logger: slog::Logger,
    epoch: Epoch,
    cell: Arc<CellManager>,
    state_invoker: StateInvoker,
    snapshot_store: Arc<SnapshotStore>,
    actor_client: WeakActorClient,
    cancel: CancellationToken,
    config: RecoveryConfig,
}

impl Recovery {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        logger: slog::Logger,
        epoch: Epoch,
        cell: Arc<CellManager>,
        state_invoker: StateInvoker,
        snapshot_store: Arc<SnapshotStore>,
        actor_client: WeakActorClient,
        cancel: CancellationToken,
        config: RecoveryConfig,
    ) -> Self {
        Recovery {
            logger,
            epoch,
            cell,
            state_invoker,
            snapshot_store,
            actor_client,
            cancel,
            config,
        }
    }

    pub(crate) fn spawn_leader_recovery(self) {
        tokio::task::spawn(async move {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.recover_leader() => result,
            };
            self.report(result).await;
        });
    }

    pub(crate) fn spawn_follower_recovery(self, leader: Arc<dyn MetaStateService>) {
        tokio::task::spawn(async move {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.recover_follower(leader) => result,
            };
            self.report(result).await;
        });
    }

    async fn report(&self, result: Result<MetaVersion, MetaStateError>) {
        match &result {
            Ok(version) => slog::info!(self.logger, "Recovered to version {}", version),
            Err(e) => slog::warn!(self.logger, "Recovery failed: {}", e),
        }
        self.actor_client
            .recovery_complete(RecoveryComplete {
                epoch: self.epoch,
                result,
            })
            .await;
    }

    /// Replays local history, then takes over the longest history held by a quorum of the cell,
    /// then opens a segment for the new epoch. A committed change is held by some peer of every
    /// quorum, so it's always among the histories compared.
    async fn recover_leader(&self) -> Result<MetaVersion, MetaStateError> {
        let reachable = self
            .state_invoker
            .try_invoke(|state| state.refresh_reachable_version())
            .await?;
        slog::info!(self.logger, "Leader recovery: local history reaches {}", reachable);
        self.state_invoker
            .try_invoke(move |state| state.restore(reachable))
            .await?;

        let longest = self
            .collect_histories(reachable.segment_id)
            .await?
            .into_iter()
            .filter_map(|history| history.version().map(|version| (version, history)))
            .filter(|(version, _)| *version > reachable)
            .max_by_key(|(version, _)| *version);
        if let Some((version, history)) = longest {
            self.adopt_history(version, history).await?;
        }

        let epoch = self.epoch;
        self.state_invoker
            .try_invoke(move |state| state.start_epoch_segment(epoch))
            .await
    }

    /// Asks every other peer for its segments from `from` on. Returns once enough of them
    /// answered to make a quorum with this peer, and fails if they can't.
    async fn collect_histories(&self, from: SegmentId) -> Result<Vec<PeerHistory>, MetaStateError> {
        let needed = self.cell.quorum() - 1;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut walks = Vec::new();
        for (peer_id, channel) in self.cell.others() {
            let channel = channel.clone();
            let tx = tx.clone();
            let logger = self.logger.clone();
            let config = self.config.clone();
            let cancel = self.cancel.clone();
            walks.push(tokio::task::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = walk_history(&logger, &config, &channel, from) => {
                        let _ = tx.send((peer_id, result));
                    }
                }
            }));
        }
        drop(tx);

        let mut histories = Vec::new();
        while histories.len() < needed {
            match rx.recv().await {
                Some((peer_id, result)) => self.record_history(&mut histories, peer_id, result),
                None => break,
            }
        }
        // Histories that are already in are worth comparing too.
        while let Ok((peer_id, result)) = rx.try_recv() {
            self.record_history(&mut histories, peer_id, result);
        }
        for walk in walks {
            walk.abort();
        }

        if histories.len() < needed {
            return Err(MetaStateError::Unavailable(format!(
                "{} of the {} peers needed for a quorum reported their history",
                histories.len(),
                needed
            )));
        }
        Ok(histories)
    }

    fn record_history(
        &self,
        histories: &mut Vec<PeerHistory>,
        peer_id: PeerId,
        result: Result<Vec<(SegmentId, ChangeLogInfo)>, MetaStateError>,
    ) {
        match result {
            Ok(segments) => histories.push(PeerHistory { peer_id, segments }),
            Err(e) => slog::info!(self.logger, "Peer {} didn't report its history: {}", peer_id, e),
        }
    }

    async fn adopt_history(&self, target: MetaVersion, history: PeerHistory) -> Result<(), MetaStateError> {
        let peer_id = history.peer_id;
        let channel = self
            .cell
            .channel(peer_id)
            .ok_or_else(|| MetaStateError::Unavailable(format!("Peer {} is not in the cell", peer_id)))?;
        slog::info!(self.logger, "Adopting history of peer {} up to {}", peer_id, target);

        // Local history before the first segment compared must be the peer's too.
        if let Some((first_id, first)) = history.segments.first().copied() {
            let local_prev = self
                .state_invoker
                .try_invoke(move |state| {
                    Ok(match state.changelog_info(first_id)? {
                        Some(info) => Some(info.prev_record_count),
                        None => state.snapshot_info(first_id)?.map(|info| info.prev_record_count),
                    })
                })
                .await?;
            if local_prev.map_or(false, |prev| prev != first.prev_record_count) {
                return Err(MetaStateError::IoError(format!(
                    "History of peer {} diverges before changelog {}",
                    peer_id, first_id
                )));
            }
        }

        for (segment_id, remote) in history.segments {
            let record_count = remote.record_count;
            let local_count = self
                .state_invoker
                .try_invoke(move |state| state.reconcile_segment(segment_id, remote, record_count))
                .await?;
            self.download_records(&channel, segment_id, local_count, record_count)
                .await?;
        }

        self.state_invoker
            .try_invoke(move |state| state.restore(target))
            .await
    }

    /// Makes local history a prefix-exact copy of the leader's up to its current version, then
    /// rebuilds the applied state from it.
    async fn recover_follower(&self, leader: Arc<dyn MetaStateService>) -> Result<MetaVersion, MetaStateError> {
        let sync = self.with_retries(RpcMethod::Sync, || leader.sync()).await?;
        if sync.epoch != self.epoch {
            return Err(MetaStateError::InvalidEpoch {
                expected: self.epoch,
                received: sync.epoch,
            });
        }
        let target = sync.version;
        slog::info!(
            self.logger,
            "Follower recovery: leader is at {}, its latest snapshot is {:?}",
            target,
            sync.max_snapshot_id
        );

        let target_segment = target.segment_id;
        self.state_invoker
            .try_invoke(move |state| {
                state.discard_beyond(target_segment)?;
                state.invalidate();
                Ok(())
            })
            .await?;

        let base = self.choose_base_snapshot(&leader, target_segment, sync.max_snapshot_id).await?;

        for segment_id in base..=target_segment {
            let remote = self
                .with_retries(RpcMethod::GetChangeLogInfo, || leader.get_change_log_info(segment_id))
                .await?;
            let wanted = if segment_id == target_segment {
                target.record_count
            } else {
                remote.record_count
            };
            if remote.record_count < wanted {
                return Err(MetaStateError::InvalidVersion {
                    expected: target,
                    received: MetaVersion::new(segment_id, remote.record_count),
                });
            }

            let local_count = self
                .state_invoker
                .try_invoke(move |state| state.reconcile_segment(segment_id, remote, wanted))
                .await?;
            self.download_records(&leader, segment_id, local_count, wanted).await?;
        }

        self.state_invoker
            .try_invoke(move |state| state.restore(target))
            .await?;
        Ok(target)
    }

    /// Settles on the snapshot to rebuild from: the leader's latest, unless a local one the
    /// leader agrees with is at least as new. Returns its id, or 0 for genesis.
    async fn choose_base_snapshot(
        &self,
        leader: &Arc<dyn MetaStateService>,
        target_segment: SegmentId,
        remote_max: Option<SegmentId>,
    ) -> Result<SegmentId, MetaStateError> {
        loop {
            let local = self
                .state_invoker
                .try_invoke(move |state| state.latest_snapshot_id_at_most(target_segment))
                .await?;

            match (local, remote_max) {
                (Some(local_id), Some(remote_id)) if local_id == remote_id => {
                    if self.leader_vouches_for(leader, local_id).await? {
                        return Ok(local_id);
                    }
                    self.discard_snapshot(local_id).await?;
                }
                (local_id, Some(remote_id)) if local_id < Some(remote_id) => {
                    self.download_snapshot(leader, remote_id).await?;
                    return Ok(remote_id);
                }
                (Some(local_id), _) => {
                    if self.leader_vouches_for(leader, local_id).await? {
                        return Ok(local_id);
                    }
                    self.discard_snapshot(local_id).await?;
                }
                (None, _) => return Ok(0),
            }
        }
    }

    async fn leader_vouches_for(
        &self,
        leader: &Arc<dyn MetaStateService>,
        snapshot_id: SegmentId,
    ) -> Result<bool, MetaStateError> {
        let local = self
            .state_invoker
            .try_invoke(move |state| state.snapshot_info(snapshot_id))
            .await?;
        let remote = match self
            .with_retries(RpcMethod::GetSnapshotInfo, || leader.get_snapshot_info(snapshot_id))
            .await
        {
            Ok(info) => info,
            Err(MetaStateError::InvalidSegmentId(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        Ok(local.map_or(false, |local| local == remote))
    }

    async fn discard_snapshot(&self, snapshot_id: SegmentId) -> Result<(), MetaStateError> {
        self.state_invoker
            .try_invoke(move |state| state.discard_snapshot(snapshot_id))
            .await
    }

    async fn download_snapshot(
        &self,
        leader: &Arc<dyn MetaStateService>,
        snapshot_id: SegmentId,
    ) -> Result<(), MetaStateError> {
        let info = self
            .with_retries(RpcMethod::GetSnapshotInfo, || leader.get_snapshot_info(snapshot_id))
            .await?;
        slog::info!(
            self.logger,
            "Downloading snapshot {} ({} bytes) from leader",
            snapshot_id,
            info.length
        );

        let mut writer = self.snapshot_store.writer(snapshot_id, info)?;
        while writer.written() < info.length {
            let offset = writer.written();
            let length = (info.length - offset).min(self.config.snapshot_block_size as u64) as u32;
            let input = ReadSnapshotInput {
                snapshot_id,
                offset,
                length,
            };
            let block = self
                .with_retries(RpcMethod::ReadSnapshot, || leader.read_snapshot(input))
                .await?;
            if block.is_empty() {
                return Err(MetaStateError::IoError(format!(
                    "Snapshot {} ended at {} of {} bytes",
                    snapshot_id, offset, info.length
                )));
            }
            writer.append(&block)?;
        }
        writer.finish()?;

        Ok(())
    }

    /// Fetches records `from..to` of a segment and appends them locally.
    async fn download_records(
        &self,
        channel: &Arc<dyn MetaStateService>,
        segment_id: SegmentId,
        from: u32,
        to: u32,
    ) -> Result<(), MetaStateError> {
        let mut next = from;
        while next < to {
            let input = ReadChangeLogInput {
                change_log_id: segment_id,
                start_record_id: next,
                record_count: (to - next).min(self.config.changelog_block_size),
            };
            let mut records = self
                .with_retries(RpcMethod::ReadChangeLog, || channel.read_change_log(input))
                .await?;
            if records.is_empty() {
                return Err(MetaStateError::IoError(format!(
                    "Changelog {} ended at record {}, expected {}",
                    segment_id, next, to
                )));
            }
            records.truncate((to - next) as usize);

            let start = next;
            next = self
                .state_invoker
                .try_invoke(move |state| state.append_downloaded(segment_id, start, &records))
                .await?;
        }

        Ok(())
    }

    async fn with_retries<T, F, Fut>(&self, method: RpcMethod, call: F) -> Result<T, MetaStateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MetaStateError>>,
    {
        call_with_retries(&self.logger, &self.config, method, call).await
    }
}

/// Segments a peer holds from `from` on, in order, up to the first one it doesn't have.
struct PeerHistory {
    peer_id: PeerId,
    segments: Vec<(SegmentId, ChangeLogInfo)>,
}

impl PeerHistory {
    fn version(&self) -> Option<MetaVersion> {
        self.segments
            .last()
            .map(|(segment_id, info)| MetaVersion::new(*segment_id, info.record_count))
    }
}

async fn walk_history(
    logger: &slog::Logger,
    config: &RecoveryConfig,
    channel: &Arc<dyn MetaStateService>,
    from: SegmentId,
) -> Result<Vec<(SegmentId, ChangeLogInfo)>, MetaStateError> {
    let mut segments = Vec::new();
    let mut segment_id = from;
    loop {
        match call_with_retries(logger, config, RpcMethod::GetChangeLogInfo, || {
            channel.get_change_log_info(segment_id)
        })
        .await
        {
            Ok(info) => segments.push((segment_id, info)),
            Err(MetaStateError::NoSuchChangeLog(_)) | Err(MetaStateError::InvalidSegmentId(_)) => return Ok(segments),
            Err(e) => return Err(e),
        }
        segment_id += 1;
    }
}

/// Retries transport failures and peers that aren't ready yet, backing off exponentially
/// with jitter.
async fn call_with_retries<T, F, Fut>(
    logger: &slog::Logger,
    config: &RecoveryConfig,
    method: RpcMethod,
    mut call: F,
) -> Result<T, MetaStateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MetaStateError>>,
{
    let mut backoff = config.retry_backoff;
    let mut attempt = 1;
    loop {
        match call_with_timeout(method, config.rpc_timeout, call()).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_attempts && is_retryable(&e) => {
                slog::debug!(logger, "{} attempt {} failed: {}", method.name(), attempt, e);
                let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retryable(error: &MetaStateError) -> bool {
    matches!(error, MetaStateError::Unavailable(_) | MetaStateError::InvalidState(_))
}

/// Live traffic a follower receives while it recovers, kept in arrival order.
#[derive(Debug)]
pub(crate) enum Postponed {
    Changes { version: MetaVersion, changes: Vec<Bytes> },
    SegmentAdvance(MetaVersion),
}

#[derive(Debug, Default)]
pub(crate) struct PostponedChanges {
    items: Vec<Postponed>,
    next_version: Option<MetaVersion>,
}

impl PostponedChanges {
    pub(crate) fn new() -> Self {
        PostponedChanges::default()
    }

    pub(crate) fn postpone_changes(&mut self, version: MetaVersion, changes: Vec<Bytes>) -> Result<(), MetaStateError> {
        self.check_contiguous(version)?;
        self.next_version = Some(version.advance(changes.len() as u32));
        self.items.push(Postponed::Changes { version, changes });
        Ok(())
    }

    pub(crate) fn postpone_segment_advance(&mut self, version: MetaVersion) -> Result<(), MetaStateError> {
        self.check_contiguous(version)?;
        self.next_version = Some(version.next_segment());
        self.items.push(Postponed::SegmentAdvance(version));
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn into_items(self) -> Vec<Postponed> {
        self.items
    }

    fn check_contiguous(&self, version: MetaVersion) -> Result<(), MetaStateError> {
        match self.next_version {
            Some(expected) if expected != version => Err(MetaStateError::InvalidVersion {
                expected,
                received: version,
            }),
            _ => Ok(()),
        }
    }
}

/// Applies postponed traffic on top of the recovered state. Anything recovery already
/// covered is skipped; a gap means the follower missed traffic and can't continue.
pub(crate) fn apply_postponed(
    state: &mut DecoratedMetaState,
    epoch: Epoch,
    items: Vec<Postponed>,
) -> Result<MetaVersion, MetaStateError> {
    for item in items {
        let current = state.version();
        match item {
            Postponed::Changes { version, changes } => {
                let end = version.advance(changes.len() as u32);
                if version.segment_id != current.segment_id || version.record_count > current.record_count {
                    if end <= current {
                        continue;
                    }
                    return Err(MetaStateError::InvalidVersion {
                        expected: current,
                        received: version,
                    });
                }
                if end <= current {
                    continue;
                }
                let skip = (current.record_count - version.record_count) as usize;
                state.apply_changes(current, &changes[skip..])?;
            }
            Postponed::SegmentAdvance(version) => {
                if current >= version.next_segment() {
                    continue;
                }
                if current != version {
                    return Err(MetaStateError::InvalidVersion {
                        expected: current,
                        received: version,
                    });
                }
                state.create_snapshot(version, epoch)?;
            }
        }
    }

    Ok(state.version())
}
