use crate::peer::rpc_api::{call_with_timeout, MetaStateService, PingLeaderInput, RpcMethod};
use crate::peer::timers::stop_signal;
use crate::peer::timers::time::{Clock, RealClock};
use std::sync::Arc;
use tokio::time::Duration;

/// Follower side of leader liveness: while this handle lives, the follower tells its leader
/// every `ping_interval` that it is still following.
pub(crate) struct LeaderPingerHandle {
    _to_drop: stop_signal::Stopper,
}

struct LeaderPingerTask<C: Clock> {
    logger: slog::Logger,
    leader: Arc<dyn MetaStateService>,
    ping: PingLeaderInput,
    ping_interval: Duration,
    rpc_timeout: Duration,
    clock: C,
    stop_check: stop_signal::StopCheck,
}

impl LeaderPingerHandle {
    pub(crate) fn spawn_pinger_task(
        logger: slog::Logger,
        leader: Arc<dyn MetaStateService>,
        ping: PingLeaderInput,
        ping_interval: Duration,
        rpc_timeout: Duration,
    ) -> Self {
        let (task, handle) = LeaderPingerTask::new(logger, leader, ping, ping_interval, rpc_timeout, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock> LeaderPingerTask<C> {
    fn new(
        logger: slog::Logger,
        leader: Arc<dyn MetaStateService>,
        ping: PingLeaderInput,
        ping_interval: Duration,
        rpc_timeout: Duration,
        clock: C,
    ) -> (Self, LeaderPingerHandle) {
        let (stopper, stop_check) = stop_signal::new();

        let task = LeaderPingerTask {
            logger,
            leader,
            ping,
            ping_interval,
            rpc_timeout,
            clock,
            stop_check,
        };
        let handle = LeaderPingerHandle { _to_drop: stopper };

        (task, handle)
    }

    async fn run(mut self) {
        // First ping goes out right away so the leader can count us as soon as possible.
        let mut next_ping = self.clock.now();
        loop {
            self.clock.sleep_until(next_ping).await;
            if self.stop_check.should_stop() {
                return;
            }

            let result =
                call_with_timeout(RpcMethod::PingLeader, self.rpc_timeout, self.leader.ping_leader(self.ping)).await;
            if let Err(e) = result {
                slog::debug!(self.logger, "Failed to ping leader: {}", e);
            }

            next_ping = self.clock.now() + self.ping_interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::test_utils::PingRecorder;
    use crate::peer::timers::time::mocked_clock;
    use crate::peer::{Epoch, PeerId, PeerState};
    use crate::logging::discard_logger;

    #[tokio::test]
    async fn pinger_lifecycle() {
        let ping_interval = Duration::from_millis(100);
        let (recorder, mut pings) = PingRecorder::new();
        let (clock, mut controller) = mocked_clock();
        let expected_ping = PingLeaderInput {
            follower_id: PeerId(2),
            epoch: Epoch::new_random(),
            state: PeerState::Following,
        };

        let (task, handle) = LeaderPingerTask::new(
            discard_logger(),
            Arc::new(recorder),
            expected_ping,
            ping_interval,
            Duration::from_secs(1),
            clock,
        );
        let join_handle = tokio::task::spawn(task.run());

        // 1. Immediate first ping.
        assert_eq!(pings.recv().await, expected_ping);
        pings.recv_assert_timeout(Duration::from_millis(10)).await;

        // 2. One ping per interval.
        for _ in 0..3 {
            controller.advance(ping_interval / 2);
            pings.recv_assert_timeout(Duration::from_millis(10)).await;
            controller.advance(ping_interval / 2);
            assert_eq!(pings.recv().await, expected_ping);
        }

        // 3. Dropping the handle stops the task at its next wake up.
        drop(handle);
        controller.advance(ping_interval);
        join_handle.await.unwrap();
        pings.recv_assert_timeout(Duration::from_millis(10)).await;
    }
}
