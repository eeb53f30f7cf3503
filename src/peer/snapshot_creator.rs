use crate::actor::{Callback, WeakActorClient};
use crate::peer::leader_committer::LeaderCommitter;
use crate::peer::rpc_api::MetaStateError;
use crate::peer::state_invoker::StateInvoker;
use crate::peer::types::{Checksum, Epoch, MetaVersion, PeerId, PeerState, SegmentId};
use std::collections::BTreeMap;
use std::future::Future;

/// Outcome of a distributed snapshot, as seen by the leader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotOutput {
    pub snapshot_id: SegmentId,
    pub checksum: Checksum,
    /// Followers that built the same snapshot.
    pub confirmations: Vec<PeerId>,
    /// Followers whose snapshot came out different.
    pub mismatches: Vec<PeerId>,
}

#[derive(Debug)]
pub(crate) struct LocalSnapshotComplete {
    pub(crate) epoch: Epoch,
    pub(crate) version: MetaVersion,
    pub(crate) result: Result<Checksum, MetaStateError>,
}

struct DistributedSnapshot {
    local: Option<Checksum>,
    replies: BTreeMap<PeerId, Option<Result<Checksum, MetaStateError>>>,
    waiters: Vec<Callback<SnapshotOutput, MetaStateError>>,
}

/// Leader-side bookkeeping for snapshots the whole cell takes at the same version.
///
/// The leader closes the segment through the committer, which sends `AdvanceSegment` to every
/// follower in line with the changes, and snapshots locally through the state context. A
/// snapshot is done when the local one exists and every follower has answered.
pub(crate) struct SnapshotCreator {
    logger: slog::Logger,
    epoch: Epoch,
    state_invoker: StateInvoker,
    actor_client: WeakActorClient,
    follower_ids: Vec<PeerId>,
    in_flight: BTreeMap<MetaVersion, DistributedSnapshot>,
}

impl SnapshotCreator {
    pub(crate) fn new(
        logger: slog::Logger,
        epoch: Epoch,
        state_invoker: StateInvoker,
        actor_client: WeakActorClient,
        follower_ids: Vec<PeerId>,
    ) -> Self {
        SnapshotCreator {
            logger,
            epoch,
            state_invoker,
            actor_client,
            follower_ids,
            in_flight: BTreeMap::new(),
        }
    }

    /// Snapshots the cell at the committer's current version. An empty segment right after
    /// another snapshot joins that one instead.
    pub(crate) fn create_distributed(
        &mut self,
        committer: &mut LeaderCommitter,
        waiter: Option<Callback<SnapshotOutput, MetaStateError>>,
    ) -> MetaVersion {
        let current = committer.next_version();
        if let Some((version, snapshot)) = self.in_flight.iter_mut().next_back() {
            if version.next_segment() == current {
                snapshot.waiters.extend(waiter);
                return *version;
            }
        }

        let version = committer.advance_segment();
        slog::info!(self.logger, "Creating distributed snapshot at {}", version);

        let epoch = self.epoch;
        let local = self
            .state_invoker
            .try_invoke(move |state| state.create_snapshot(version, epoch));
        let actor_client = self.actor_client.clone();
        tokio::task::spawn(async move {
            let result = local.await;
            actor_client
                .local_snapshot_complete(LocalSnapshotComplete { epoch, version, result })
                .await;
        });

        self.in_flight.insert(
            version,
            DistributedSnapshot {
                local: None,
                replies: self.follower_ids.iter().map(|id| (*id, None)).collect(),
                waiters: waiter.into_iter().collect(),
            },
        );
        version
    }

    /// A local failure fails the snapshot and is handed back; the caller decides the epoch's fate.
    pub(crate) fn on_local_complete(
        &mut self,
        version: MetaVersion,
        result: Result<Checksum, MetaStateError>,
    ) -> Result<(), MetaStateError> {
        match result {
            Ok(checksum) => {
                if let Some(snapshot) = self.in_flight.get_mut(&version) {
                    snapshot.local = Some(checksum);
                }
                self.try_finish(version);
                Ok(())
            }
            Err(e) => {
                slog::error!(self.logger, "Local snapshot at {} failed: {}", version, e);
                if let Some(snapshot) = self.in_flight.remove(&version) {
                    for waiter in snapshot.waiters {
                        waiter.send(Err(e.clone()));
                    }
                }
                Err(e)
            }
        }
    }

    pub(crate) fn on_follower_reply(
        &mut self,
        follower_id: PeerId,
        version: MetaVersion,
        result: Result<Checksum, MetaStateError>,
    ) {
        if let Some(snapshot) = self.in_flight.get_mut(&version) {
            if let Some(reply) = snapshot.replies.get_mut(&follower_id) {
                *reply = Some(result);
            }
        }
        self.try_finish(version);
    }

    /// Fails everything still in flight; the epoch is over.
    pub(crate) fn abort(&mut self, state: PeerState) {
        for (_, snapshot) in std::mem::take(&mut self.in_flight) {
            for waiter in snapshot.waiters {
                waiter.send(Err(MetaStateError::InvalidState(state)));
            }
        }
    }

    fn try_finish(&mut self, version: MetaVersion) {
        let done = match self.in_flight.get(&version) {
            Some(snapshot) => snapshot.local.is_some() && snapshot.replies.values().all(Option::is_some),
            None => false,
        };
        if !done {
            return;
        }

        let snapshot = match self.in_flight.remove(&version) {
            Some(snapshot) => snapshot,
            None => return,
        };
        let checksum = snapshot.local.unwrap_or_default();
        let mut output = SnapshotOutput {
            snapshot_id: version.segment_id + 1,
            checksum,
            confirmations: Vec::new(),
            mismatches: Vec::new(),
        };
        for (follower_id, reply) in snapshot.replies {
            match reply {
                Some(Ok(remote)) if remote == checksum => output.confirmations.push(follower_id),
                Some(Ok(remote)) => {
                    slog::error!(
                        self.logger,
                        "Snapshot {} checksum mismatch at peer {}: local {:#010x}, remote {:#010x}",
                        output.snapshot_id,
                        follower_id,
                        checksum,
                        remote
                    );
                    output.mismatches.push(follower_id);
                }
                Some(Err(e)) => {
                    slog::info!(self.logger, "Peer {} didn't build snapshot {}: {}", follower_id, output.snapshot_id, e);
                }
                None => {}
            }
        }

        slog::info!(
            self.logger,
            "Distributed snapshot {} done, confirmed by {:?}",
            output.snapshot_id,
            output.confirmations
        );
        for waiter in snapshot.waiters {
            waiter.send(Ok(output.clone()));
        }
    }
}

/// Follower side: snapshot at exactly `version`, which must be the applied version.
pub(crate) fn create_local(
    state_invoker: &StateInvoker,
    version: MetaVersion,
    epoch: Epoch,
) -> impl Future<Output = Result<Checksum, MetaStateError>> + Send + 'static {
    state_invoker.try_invoke(move |state| state.create_snapshot(version, epoch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor;
    use crate::changelog::ChangeLogCache;
    use crate::logging::discard_logger;
    use crate::peer::decorated::DecoratedMetaState;
    use crate::peer::leader_committer::LeaderCommitterConfig;
    use crate::peer::test_utils::{unreachable_cell, HashingState};
    use crate::snapshot::SnapshotStore;
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tokio::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        _dir: tempfile::TempDir,
        creator: SnapshotCreator,
        committer: LeaderCommitter,
        _actor_client: actor::ActorClient,
    }

    async fn fixture() -> Fixture {
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

        let (actor_client, _rx) = actor::create(16);
        let cell = unreachable_cell(PeerId(0), 3);
        let committer = LeaderCommitter::new(
            logger.clone(),
            epoch,
            version,
            cell.clone(),
            state_invoker.clone(),
            actor_client.weak(),
            CancellationToken::new(),
            LeaderCommitterConfig {
                commit_timeout: Duration::from_secs(60),
                rpc_timeout: Duration::from_millis(10),
                snapshot_timeout: Duration::from_millis(50),
                max_batch_size: 10,
            },
        );
        let creator = SnapshotCreator::new(
            logger,
            epoch,
            state_invoker,
            actor_client.weak(),
            cell.other_ids().collect(),
        );

        Fixture {
            _dir: dir,
            creator,
            committer,
            _actor_client: actor_client,
        }
    }

    #[tokio::test]
    async fn reports_confirmations_and_mismatches() {
        let mut f = fixture().await;
        let (tx, mut rx) = oneshot::channel();
        let version = f.creator.create_distributed(&mut f.committer, Some(Callback(tx)));
        assert_eq!(version, MetaVersion::new(0, 0));
        assert_eq!(f.committer.next_version(), MetaVersion::new(1, 0));

        f.creator.on_follower_reply(PeerId(1), version, Ok(7));
        f.creator.on_local_complete(version, Ok(7)).unwrap();
        assert!(rx.try_recv().is_err());

        f.creator.on_follower_reply(PeerId(2), version, Ok(8));
        let output = rx.try_recv().unwrap().unwrap();
        assert_eq!(
            output,
            SnapshotOutput {
                snapshot_id: 1,
                checksum: 7,
                confirmations: vec![PeerId(1)],
                mismatches: vec![PeerId(2)],
            }
        );
    }

    #[tokio::test]
    async fn follower_errors_still_complete() {
        let mut f = fixture().await;
        let (tx, mut rx) = oneshot::channel();
        let version = f.creator.create_distributed(&mut f.committer, Some(Callback(tx)));

        f.creator.on_local_complete(version, Ok(1)).unwrap();
        f.creator
            .on_follower_reply(PeerId(1), version, Err(MetaStateError::InvalidState(PeerState::FollowerRecovery)));
        f.creator
            .on_follower_reply(PeerId(2), version, Err(MetaStateError::Unavailable("down".to_string())));

        let output = rx.try_recv().unwrap().unwrap();
        assert!(output.confirmations.is_empty());
        assert!(output.mismatches.is_empty());
    }

    #[tokio::test]
    async fn empty_segment_joins_previous_snapshot() {
        let mut f = fixture().await;
        let (tx0, _rx0) = oneshot::channel();
        let (tx1, _rx1) = oneshot::channel();
        let first = f.creator.create_distributed(&mut f.committer, Some(Callback(tx0)));
        let second = f.creator.create_distributed(&mut f.committer, Some(Callback(tx1)));

        assert_eq!(first, second);
        assert_eq!(f.committer.next_version(), MetaVersion::new(1, 0));
    }

    #[tokio::test]
    async fn local_failure_fails_waiters() {
        let mut f = fixture().await;
        let (tx, mut rx) = oneshot::channel();
        let version = f.creator.create_distributed(&mut f.committer, Some(Callback(tx)));

        let failure = MetaStateError::IoError("disk full".to_string());
        assert_eq!(f.creator.on_local_complete(version, Err(failure.clone())), Err(failure.clone()));
        assert_eq!(rx.try_recv().unwrap(), Err(failure));
    }
}
