//! Time sources for the engine.
//!
//! [`Clock`] stamps fetch times; [`Ticker`] drives scheduler cycles. Both are
//! injected so tests can control them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{Instant, Interval, MissedTickBehavior};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of scheduler triggers.
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next trigger. `None` ends the scheduler loop.
    async fn tick(&mut self) -> Option<DateTime<Utc>>;
}

/// Shortest period an [`IntervalTicker`] accepts.
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Fixed-period ticker backed by `tokio::time::interval_at`.
///
/// A tick that is missed because the previous cycle overran is skipped
/// rather than fired in a burst. Tick times are read from the ticker's
/// [`Clock`].
pub struct IntervalTicker {
    interval: Interval,
    clock: Arc<dyn Clock>,
}

impl IntervalTicker {
    /// Periods below one second are raised to one second.
    pub fn new(period: Duration, run_on_start: bool) -> Self {
        let period = period.max(MIN_PERIOD);
        let start = if run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> Option<DateTime<Utc>> {
        self.interval.tick().await;
        Some(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_period() {
        let start = Instant::now();
        let mut ticker = IntervalTicker::new(Duration::from_secs(1800), false);

        ticker.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(1800));

        ticker.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_start_fires_immediately() {
        let start = Instant::now();
        let mut ticker = IntervalTicker::new(Duration::from_secs(1800), true);

        ticker.tick().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(ticker.period(), Duration::from_secs(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_raised_to_minimum() {
        let mut ticker = IntervalTicker::new(Duration::ZERO, false);
        assert_eq!(ticker.period(), MIN_PERIOD);

        let start = Instant::now();
        ticker.tick().await;
        assert!(start.elapsed() >= MIN_PERIOD);
    }

    struct FrozenClock(DateTime<Utc>);

    impl Clock for FrozenClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_time_comes_from_clock() {
        let frozen = DateTime::parse_from_rfc3339("2026-03-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut ticker = IntervalTicker::new(Duration::from_secs(60), true)
            .with_clock(Arc::new(FrozenClock(frozen)));

        assert_eq!(ticker.tick().await, Some(frozen));
        assert_eq!(ticker.tick().await, Some(frozen));
    }
}
