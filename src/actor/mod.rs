use crate::peer::{
    AdvanceSegmentInput, AdvanceSegmentOutput, ApplyChangesInput, ApplyChangesOutput, CommitChangeInput,
    CommitResult, CommitTimeout, Epoch, LocalCommitComplete, LocalSnapshotComplete, MetaStateError, MonitoringInfo,
    Peer, PeerId, PingLeaderInput, RecoveryComplete, ReplicationReply, SnapshotOutput, SyncOutput,
};
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

// Disk and application work never runs on the actor. It goes to the state context, and the
// outcome comes back here as one of the completion events below.
#[derive(Debug)]
pub(crate) enum Event {
    // Stopped: move to Elections and start the election.
    // Otherwise: discard.
    Start,

    // Election callbacks. Elections: begin recovery for the epoch. Otherwise: restart.
    StartLeading(Epoch),
    StartFollowing(PeerId, Epoch),

    // Matching role: back to Elections. Otherwise: discard.
    StopLeading,
    StopFollowing,

    // Drop the epoch and ask the election for a new one.
    Restart,

    // Leading: assign the next version and replicate. Otherwise: reject.
    CommitChange(CommitChangeInput, oneshot::Sender<CommitResult>),
    BuildSnapshot(Callback<SnapshotOutput, MetaStateError>),
    MonitoringInfo(oneshot::Sender<MonitoringInfo>),

    // Peer RPCs that depend on the role.
    Sync(Callback<SyncOutput, MetaStateError>),
    ApplyChanges(ApplyChangesInput, Callback<ApplyChangesOutput, MetaStateError>),
    AdvanceSegment(AdvanceSegmentInput, Callback<AdvanceSegmentOutput, MetaStateError>),
    PingLeader(PingLeaderInput),

    // Completions of work spawned for an epoch. Dropped if the epoch is gone.
    RecoveryComplete(RecoveryComplete),
    LocalCommitComplete(LocalCommitComplete),
    ReplicationReply(ReplicationReply),
    CommitTimeout(CommitTimeout),
    RetryCommit(Epoch, CommitChangeInput, oneshot::Sender<CommitResult>),
    LocalSnapshotComplete(LocalSnapshotComplete),
    EpochFailure(Epoch, String),
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(pub(crate) oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

pub(crate) fn create(buffer_size: usize) -> (ActorClient, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (ActorClient { sender: tx }, rx)
}

/// Strong handle to the peer actor. The actor runs for as long as one of these exists.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn start(&self) -> Result<(), MetaStateError> {
        self.send(Event::Start).await
    }

    pub(crate) async fn start_leading(&self, epoch: Epoch) -> Result<(), MetaStateError> {
        self.send(Event::StartLeading(epoch)).await
    }

    pub(crate) async fn stop_leading(&self) -> Result<(), MetaStateError> {
        self.send(Event::StopLeading).await
    }

    pub(crate) async fn start_following(&self, leader_id: PeerId, epoch: Epoch) -> Result<(), MetaStateError> {
        self.send(Event::StartFollowing(leader_id, epoch)).await
    }

    pub(crate) async fn stop_following(&self) -> Result<(), MetaStateError> {
        self.send(Event::StopFollowing).await
    }

    pub(crate) async fn restart(&self) -> Result<(), MetaStateError> {
        self.send(Event::Restart).await
    }

    pub(crate) async fn commit_change(&self, input: CommitChangeInput) -> CommitResult {
        let (tx, rx) = oneshot::channel();
        if self.send(Event::CommitChange(input, tx)).await.is_err() {
            return CommitResult::InvalidState;
        }

        // The actor drops pending callbacks only when it exits mid-flight.
        rx.await.unwrap_or(CommitResult::MaybeCommitted)
    }

    pub(crate) async fn build_snapshot(&self) -> Result<SnapshotOutput, MetaStateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::BuildSnapshot(Callback(tx))).await?;
        rx.await.map_err(|_| MetaStateError::ActorExited)?
    }

    pub(crate) async fn monitoring_info(&self) -> Result<MonitoringInfo, MetaStateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::MonitoringInfo(tx)).await?;
        rx.await.map_err(|_| MetaStateError::ActorExited)
    }

    pub(crate) async fn sync(&self) -> Result<SyncOutput, MetaStateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Sync(Callback(tx))).await?;
        rx.await.map_err(|_| MetaStateError::ActorExited)?
    }

    pub(crate) async fn apply_changes(&self, input: ApplyChangesInput) -> Result<ApplyChangesOutput, MetaStateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::ApplyChanges(input, Callback(tx))).await?;
        rx.await.map_err(|_| MetaStateError::ActorExited)?
    }

    pub(crate) async fn advance_segment(
        &self,
        input: AdvanceSegmentInput,
    ) -> Result<AdvanceSegmentOutput, MetaStateError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::AdvanceSegment(input, Callback(tx))).await?;
        rx.await.map_err(|_| MetaStateError::ActorExited)?
    }

    pub(crate) async fn ping_leader(&self, input: PingLeaderInput) -> Result<(), MetaStateError> {
        self.send(Event::PingLeader(input)).await
    }

    async fn send(&self, event: Event) -> Result<(), MetaStateError> {
        self.sender.send(event).await.map_err(|_| MetaStateError::ActorExited)
    }
}

/// Handle for tasks the actor spawns itself. It doesn't keep the actor alive, and every send
/// quietly does nothing once the actor is gone.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl WeakActorClient {
    pub(crate) fn upgrade(&self) -> Result<ActorClient, MetaStateError> {
        self.sender
            .upgrade()
            .map(|sender| ActorClient { sender })
            .ok_or(MetaStateError::ActorExited)
    }

    pub(crate) async fn recovery_complete(&self, input: RecoveryComplete) {
        self.send(Event::RecoveryComplete(input)).await;
    }

    pub(crate) async fn local_commit_complete(&self, input: LocalCommitComplete) {
        self.send(Event::LocalCommitComplete(input)).await;
    }

    pub(crate) async fn replication_reply(&self, input: ReplicationReply) {
        self.send(Event::ReplicationReply(input)).await;
    }

    pub(crate) async fn commit_timeout(&self, input: CommitTimeout) {
        self.send(Event::CommitTimeout(input)).await;
    }

    pub(crate) async fn retry_commit(&self, epoch: Epoch, input: CommitChangeInput, callback: oneshot::Sender<CommitResult>) {
        // If the actor is gone the callback drops with the event, which the caller sees as
        // MaybeCommitted. Nothing was submitted, so say so instead.
        if let Some(sender) = self.sender.upgrade() {
            if let Err(mpsc::error::SendError(Event::RetryCommit(_, _, callback))) =
                sender.send(Event::RetryCommit(epoch, input, callback)).await
            {
                let _ = callback.send(CommitResult::NotCommitted);
            }
        } else {
            let _ = callback.send(CommitResult::NotCommitted);
        }
    }

    pub(crate) async fn local_snapshot_complete(&self, input: LocalSnapshotComplete) {
        self.send(Event::LocalSnapshotComplete(input)).await;
    }

    pub(crate) async fn epoch_failure(&self, epoch: Epoch, reason: String) {
        self.send(Event::EpochFailure(epoch, reason)).await;
    }

    async fn send(&self, event: Event) {
        if let Some(sender) = self.sender.upgrade() {
            let _ = sender.send(event).await;
        }
    }
}

/// PeerActor is the control context: peer logic in actor model.
pub(crate) struct PeerActor {
    receiver: mpsc::Receiver<Event>,
    peer: Peer,
}

impl PeerActor {
    pub(crate) fn new(receiver: mpsc::Receiver<Event>, peer: Peer) -> Self {
        PeerActor { receiver, peer }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }
        self.peer.shut_down();
    }

    // This must NOT be async. Any long running work must be spawned on another task
    // and/or come as a callback to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Start => self.peer.start(),
            Event::StartLeading(epoch) => self.peer.on_start_leading(epoch),
            Event::StartFollowing(leader_id, epoch) => self.peer.on_start_following(leader_id, epoch),
            Event::StopLeading => self.peer.on_stop_leading(),
            Event::StopFollowing => self.peer.on_stop_following(),
            Event::Restart => self.peer.restart("requested by client"),
            Event::CommitChange(input, callback) => self.peer.commit_change(input, callback),
            Event::BuildSnapshot(callback) => self.peer.build_snapshot(callback),
            Event::MonitoringInfo(callback) => self.peer.monitoring_info(callback),
            Event::Sync(callback) => self.peer.sync(callback),
            Event::ApplyChanges(input, callback) => self.peer.apply_changes(input, callback),
            Event::AdvanceSegment(input, callback) => self.peer.advance_segment(input, callback),
            Event::PingLeader(input) => self.peer.ping_leader(input),
            Event::RecoveryComplete(input) => self.peer.recovery_complete(input),
            Event::LocalCommitComplete(input) => self.peer.local_commit_complete(input),
            Event::ReplicationReply(input) => self.peer.replication_reply(input),
            Event::CommitTimeout(input) => self.peer.commit_timeout(input),
            Event::RetryCommit(epoch, input, callback) => self.peer.retry_commit(epoch, input, callback),
            Event::LocalSnapshotComplete(input) => self.peer.local_snapshot_complete(input),
            Event::EpochFailure(epoch, reason) => self.peer.epoch_failure(epoch, &reason),
        }
    }
}
