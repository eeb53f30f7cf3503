#[cfg(test)]
use tokio::sync::watch;
#[cfg(test)]
use tokio::time::Duration;
use tokio::time::Instant;

/// Source of time for periodic tasks, so tests can drive them by hand.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let start = Instant::now();
    let (tx, rx) = watch::channel(start);

    (MockClock { now: rx }, MockClockController { now: tx, start })
}

#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockClock {
    now: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.now.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.now.borrow() < deadline {
            if self.now.changed().await.is_err() {
                // Controller is gone, time will never move again.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Moves a `MockClock` forward. Sleepers wake once `now` reaches their deadline, so advance in
/// steps no bigger than the granularity you want to observe.
#[cfg(test)]
pub(crate) struct MockClockController {
    now: watch::Sender<Instant>,
    start: Instant,
}

#[cfg(test)]
impl MockClockController {
    pub(crate) fn elapsed(&self) -> Duration {
        *self.now.borrow() - self.start
    }

    pub(crate) fn advance(&mut self, duration: Duration) {
        let next = *self.now.borrow() + duration;
        let _ = self.now.send(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn mock_clock_wakes_sleepers_in_order() {
        let tick = Duration::from_millis(100);
        let (mut clock, mut controller) = mocked_clock();
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for i in 0..3u32 {
                let deadline = clock.now() + tick;
                clock.sleep_until(deadline).await;
                tx.send(i).unwrap();
            }
        });

        tokio::time::timeout(tick, rx.recv()).await.expect_err("Nothing before time moves");

        controller.advance(tick);
        assert_eq!(rx.recv().await, Some(0));
        controller.advance(tick / 2);
        tokio::time::timeout(tick, rx.recv()).await.expect_err("Half a tick isn't enough");
        controller.advance(tick / 2);
        assert_eq!(rx.recv().await, Some(1));
        controller.advance(tick);
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);

        assert_eq!(controller.elapsed(), tick * 3);
    }
}
