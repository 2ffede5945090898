//! Recurring tick scheduling for the polling loop.
//!
//! [`TickScheduler`] wraps a tokio interval and drops any tick that came due
//! while the caller was still busy with the previous one, so a slow slot check
//! never triggers a queued catch-up check. Suspending drops the interval
//! entirely.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

// Same horizon tokio uses for its own far-future deadlines.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + delay`, saturating to a far-future instant instead of panicking
/// on overflow.
pub fn deadline_after(start: Instant, delay: Duration) -> Instant {
    start
        .checked_add(delay)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

#[derive(Debug)]
pub struct TickScheduler {
    period: Duration,
    interval: Option<Interval>,
    fresh: bool,
    fired: u64,
    skipped: u64,
}

impl TickScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            interval: None,
            fresh: false,
            fired: 0,
            skipped: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Starts ticking. The first tick fires immediately or after one period.
    pub fn start(&mut self, immediate: bool) {
        let now = Instant::now();
        let first = if immediate {
            now
        } else {
            deadline_after(now, self.period)
        };
        let mut interval = interval_at(first, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        self.fresh = true;
    }

    pub fn suspend(&mut self) {
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub fn ticks_fired(&self) -> u64 {
        self.fired
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.skipped
    }

    /// Waits for the next tick. Never resolves while suspended.
    ///
    /// A tick whose deadline passed before this call started waiting came due
    /// while the previous tick was still in flight and is skipped.
    pub async fn tick(&mut self) -> Instant {
        let Some(interval) = self.interval.as_mut() else {
            return std::future::pending().await;
        };

        let waiting_since = Instant::now();
        loop {
            let at = interval.tick().await;
            if self.fresh || at >= waiting_since {
                self.fresh = false;
                self.fired += 1;
                return at;
            }
            self.skipped += 1;
            log::trace!("skipping tick that came due while the previous one was in flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn skips_ticks_missed_during_slow_work() {
        let mut ticks = TickScheduler::new(Duration::from_secs(10));
        ticks.start(true);
        let started = Instant::now();

        ticks.tick().await;
        tokio::time::sleep(Duration::from_secs(25)).await;
        let second = ticks.tick().await;
        assert_eq!(second - started, Duration::from_secs(30));
        assert_eq!(ticks.ticks_fired(), 2);
        assert_eq!(ticks.ticks_skipped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_start_waits_one_period() {
        let mut ticks = TickScheduler::new(Duration::from_secs(5));
        let started = Instant::now();
        ticks.start(false);
        let first = ticks.tick().await;
        assert_eq!(first - started, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_periods_saturate_instead_of_overflowing() {
        let now = Instant::now();
        assert!(deadline_after(now, Duration::MAX) > now + Duration::from_secs(86_400 * 365));
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));

        let mut ticks = TickScheduler::new(Duration::MAX);
        ticks.start(false);
        let fired = tokio::time::timeout(Duration::from_secs(3_600), ticks.tick()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn suspended_scheduler_never_fires() {
        let mut ticks = TickScheduler::new(Duration::from_secs(1));
        ticks.start(true);
        ticks.suspend();
        let fired = tokio::time::timeout(Duration::from_secs(30), ticks.tick()).await;
        assert!(fired.is_err());
        assert!(!ticks.is_running());
    }
}
