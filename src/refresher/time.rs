use tokio::time::{Duration, Instant};

#[async_trait::async_trait]
pub(crate) trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);
}

pub(crate) struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Ticker fires on a fixed grid of `interval` boundaries measured from its creation. Boundaries
/// that pass while a tick is still running are dropped, never fired back to back.
pub(crate) struct Ticker<C> {
    clock: C,
    interval: Duration,
    next: Instant,
}

impl<C: Clock> Ticker<C> {
    pub(crate) fn new(clock: C, interval: Duration) -> Self {
        let next = clock.now() + interval;
        Ticker { clock, interval, next }
    }

    #[cfg(test)]
    pub(crate) fn next_deadline(&self) -> Instant {
        self.next
    }

    /// Returns once the pending boundary is reached. Calling it again without
    /// `advance_past_now` returns immediately.
    pub(crate) async fn wait(&mut self) {
        self.clock.sleep_until(self.next).await;
    }

    /// Move to the first boundary strictly after now. Returns how many boundaries were dropped
    /// on the way.
    pub(crate) fn advance_past_now(&mut self) -> u32 {
        let now = self.clock.now();
        let mut skipped = 0;
        self.next += self.interval;
        while self.next <= now {
            self.next += self.interval;
            skipped += 1;
        }

        skipped
    }
}

#[cfg(test)]
pub(crate) use manual::{manual_clock, ManualTime};


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticker_drops_boundaries_missed_while_busy() {
        let interval = Duration::from_secs(2);
        let (clock, mut time) = manual_clock();
        let start = time.now();
        let mut ticker = Ticker::new(clock, interval);
        assert_eq!(ticker.next_deadline(), start + interval);

        time.advance(interval);
        ticker.wait().await;
        // A short tick lands on the very next boundary.
        time.advance(Duration::from_millis(500));
        assert_eq!(ticker.advance_past_now(), 0);
        assert_eq!(ticker.next_deadline(), start + Duration::from_secs(4));

        time.advance(Duration::from_millis(1500));
        ticker.wait().await;
        // A 5s tick started at 4s: the 6s and 8s boundaries are gone.
        time.advance(Duration::from_secs(5));
        assert_eq!(ticker.advance_past_now(), 2);
        assert_eq!(ticker.next_deadline(), start + Duration::from_secs(10));
    }

    #[tokio::test]
    async fn manual_sleeper_wakes_at_its_deadline_only() {
        let (mut clock, mut time) = manual_clock();
        let deadline = time.now() + Duration::from_secs(1);
        let mut sleeper = tokio::spawn(async move {
            clock.sleep_until(deadline).await;
        });

        time.advance(Duration::from_millis(999));
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut sleeper).await.is_err());

        time.advance(Duration::from_millis(1));
        tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("sleeper did not wake at its deadline")
            .unwrap();
    }
}
