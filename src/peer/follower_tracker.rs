use crate::peer::cell::CellManager;
use crate::peer::timers::{Clock, RealClock};
use crate::peer::types::{PeerId, PeerState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Leader-side view of which followers are alive, fed by their `PingLeader` calls.
///
/// A follower counts as active only while its latest ping said `Following` and arrived within
/// the liveness timeout. A follower that stops pinging drops out by itself.
pub(crate) struct FollowerTracker<C: Clock = RealClock> {
    cell: Arc<CellManager>,
    liveness_timeout: Duration,
    statuses: HashMap<PeerId, FollowerStatus>,
    clock: C,
}

struct FollowerStatus {
    state: PeerState,
    last_ping: Instant,
}

impl FollowerTracker {
    pub(crate) fn new(cell: Arc<CellManager>, liveness_timeout: Duration) -> Self {
        Self::with_clock(cell, liveness_timeout, RealClock)
    }
}

impl<C: Clock> FollowerTracker<C> {
    fn with_clock(cell: Arc<CellManager>, liveness_timeout: Duration, clock: C) -> Self {
        FollowerTracker {
            cell,
            liveness_timeout,
            statuses: HashMap::new(),
            clock,
        }
    }

    pub(crate) fn process_ping(&mut self, follower_id: PeerId, state: PeerState) {
        if follower_id == self.cell.self_id() || self.cell.channel(follower_id).is_none() {
            return;
        }

        self.statuses.insert(
            follower_id,
            FollowerStatus {
                state,
                last_ping: self.clock.now(),
            },
        );
    }

    pub(crate) fn is_follower_active(&self, follower_id: PeerId) -> bool {
        match self.statuses.get(&follower_id) {
            Some(status) => {
                status.state == PeerState::Following && self.clock.now() - status.last_ping <= self.liveness_timeout
            }
            None => false,
        }
    }

    pub(crate) fn active_follower_count(&self) -> usize {
        self.cell.other_ids().filter(|id| self.is_follower_active(*id)).count()
    }

    /// Self plus active followers make up a majority.
    pub(crate) fn has_active_quorum(&self) -> bool {
        self.active_follower_count() + 1 >= self.cell.quorum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_utils::unreachable_cell;
    use crate::peer::timers::mocked_clock;

    #[tokio::test]
    async fn quorum_needs_active_following_peers() {
        let liveness_timeout = Duration::from_millis(500);
        let (clock, mut controller) = mocked_clock();
        let cell = unreachable_cell(PeerId(0), 5);
        let mut tracker = FollowerTracker::with_clock(cell, liveness_timeout, clock);

        // Leader alone: 1 of 5.
        assert!(!tracker.has_active_quorum());

        tracker.process_ping(PeerId(1), PeerState::Following);
        assert!(!tracker.has_active_quorum());

        // Recovering followers don't count.
        tracker.process_ping(PeerId(2), PeerState::FollowerRecovery);
        assert!(!tracker.is_follower_active(PeerId(2)));
        assert!(!tracker.has_active_quorum());

        tracker.process_ping(PeerId(2), PeerState::Following);
        assert_eq!(tracker.active_follower_count(), 2);
        assert!(tracker.has_active_quorum());

        // Liveness expires without new pings.
        controller.advance(liveness_timeout + Duration::from_millis(1));
        assert_eq!(tracker.active_follower_count(), 0);
        assert!(!tracker.has_active_quorum());

        tracker.process_ping(PeerId(3), PeerState::Following);
        tracker.process_ping(PeerId(4), PeerState::Following);
        assert!(tracker.has_active_quorum());
    }

    #[tokio::test]
    async fn ignores_unknown_peers_and_self() {
        let (clock, _controller) = mocked_clock();
        let cell = unreachable_cell(PeerId(0), 3);
        let mut tracker = FollowerTracker::with_clock(cell, Duration::from_millis(500), clock);

        tracker.process_ping(PeerId(0), PeerState::Following);
        tracker.process_ping(PeerId(17), PeerState::Following);
        assert_eq!(tracker.active_follower_count(), 0);
        assert!(!tracker.is_follower_active(PeerId(17)));
    }

    #[tokio::test]
    async fn single_peer_cell_is_its_own_quorum() {
        let (clock, _controller) = mocked_clock();
        let tracker = FollowerTracker::with_clock(unreachable_cell(PeerId(0), 1), Duration::from_millis(500), clock);
        assert!(tracker.has_active_quorum());
    }
}
