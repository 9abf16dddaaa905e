//! Injectable clocks.
//!
//! Seal timestamps, verification timestamps and processing latency all read
//! time through [`Clock`] so tests can pin them with [`TestClock`].

use std::{
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use chrono::{DateTime, Utc};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for latency measurements.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time.
    fn now_system(&self) -> SystemTime;

    /// Returns the current wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share state, so a clone handed to the engine observes every
/// `advance` made by the test.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    wall_ms: Arc<AtomicI64>,
    base_instant: Instant,
}

impl TestClock {
    /// Creates a clock whose wall time starts at the current time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a clock whose wall time starts at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            wall_ms: Arc::new(AtomicI64::new(start.timestamp_millis())),
            base_instant: Instant::now(),
        }
    }

    /// Moves both monotonic and wall time forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.elapsed_ns.fetch_add(nanos, Ordering::AcqRel);
        self.wall_ms.fetch_add(millis, Ordering::AcqRel);
    }

    /// Sets wall time to `time`; monotonic time is unaffected.
    pub fn set_wall_time(&self, time: DateTime<Utc>) {
        self.wall_ms.store(time.timestamp_millis(), Ordering::Release);
    }

    /// Returns monotonic time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::from(self.now_utc())
    }

    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.wall_ms.load(Ordering::Acquire)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn advance_moves_both_clocks() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = TestClock::starting_at(start);
        let before = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now().duration_since(before), Duration::from_secs(90));
        assert_eq!(clock.now_utc(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::new();
        let shared = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(shared.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn wall_time_can_be_set_backwards() {
        let clock = TestClock::new();
        let earlier = Utc.with_ymd_and_hms(2000, 6, 1, 12, 0, 0).unwrap();
        clock.set_wall_time(earlier);
        assert_eq!(clock.now_utc(), earlier);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
