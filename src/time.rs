//! Timestamps and an injectable clock.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock instant stored with every message, as microseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Build a timestamp from microseconds since the Unix epoch.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Microseconds since the Unix epoch.
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// `self - d`, saturating at the epoch. Handy for "older than d" cutoffs.
    pub fn saturating_sub(self, d: Duration) -> Self {
        let micros = u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(micros))
    }

    /// `self + d`, saturating at `u64::MAX` microseconds.
    pub fn saturating_add(self, d: Duration) -> Self {
        let micros = u64::try_from(d.as_micros()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(micros))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        // Times before the epoch clamp to zero.
        let micros = t
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(micros)
    }
}

impl From<Timestamp> for SystemTime {
    fn from(t: Timestamp) -> Self {
        UNIX_EPOCH + Duration::from_micros(t.0)
    }
}

/// Source of creation timestamps.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Controllable clock for tests. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    /// Start the clock at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = current.saturating_add(d);
    }

    /// Set the clock to `t`.
    pub fn set(&self, t: Timestamp) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Timestamp::from_micros(1_000_000))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_sets() {
        let clock = ManualClock::new(Timestamp::from_micros(10));
        let shared = clock.clone();
        clock.advance(Duration::from_micros(5));
        assert_eq!(shared.now(), Timestamp::from_micros(15));
        shared.set(Timestamp::from_micros(3));
        assert_eq!(clock.now(), Timestamp::from_micros(3));
    }

    #[test]
    fn system_time_conversion_keeps_micros() {
        let t = Timestamp::from_micros(1_700_000_000_123_456);
        let back = Timestamp::from(SystemTime::from(t));
        assert_eq!(back, t);
        assert_eq!(Timestamp::from(UNIX_EPOCH), Timestamp::from_micros(0));
    }

    #[test]
    fn saturating_arithmetic() {
        let t = Timestamp::from_micros(100);
        assert_eq!(t.saturating_sub(Duration::from_secs(1)), Timestamp::from_micros(0));
        assert_eq!(
            t.saturating_add(Duration::from_micros(1)),
            Timestamp::from_micros(101)
        );
        assert!(Timestamp::from_micros(1) < Timestamp::from_micros(2));
    }
}
