// ============================================
// File: crates/overlan-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Points and neighbor entries are touched on every data frame. The
//! last-seen value must be writable from the connection task and readable
//! from listing queries without taking a lock.
//!
//! ## Main Functionality
//! - `AtomicInstant`: monotonic instant stored in an `AtomicU64`
//! - `Timestamp`: wall-clock Unix seconds for reporting
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Process-wide monotonic origin every `AtomicInstant` is measured from.
fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

fn micros_since_origin(instant: Instant) -> u64 {
    instant
        .checked_duration_since(origin())
        .map_or(0, |d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
}

// ============================================
// AtomicInstant
// ============================================

/// An [`Instant`] that can be updated through a shared reference.
///
/// Stores microseconds since a process-wide origin. All operations use
/// `Relaxed` ordering; callers only need eventual visibility for aging
/// decisions.
///
/// # Example
/// ```
/// use overlan_common::time::AtomicInstant;
/// use std::time::Duration;
///
/// let seen = AtomicInstant::now();
/// seen.touch();
/// assert!(!seen.has_elapsed(Duration::from_secs(60)));
/// ```
#[derive(Debug)]
pub struct AtomicInstant {
    micros: AtomicU64,
}

impl AtomicInstant {
    /// Creates a value holding the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self::from_instant(Instant::now())
    }

    /// Creates a value holding `instant`.
    #[must_use]
    pub fn from_instant(instant: Instant) -> Self {
        Self {
            micros: AtomicU64::new(micros_since_origin(instant)),
        }
    }

    /// Reads the stored instant.
    #[must_use]
    pub fn load(&self) -> Instant {
        origin() + Duration::from_micros(self.micros.load(Ordering::Relaxed))
    }

    /// Replaces the stored instant.
    pub fn store(&self, instant: Instant) {
        self.micros
            .store(micros_since_origin(instant), Ordering::Relaxed);
    }

    /// Sets the stored instant to now.
    pub fn touch(&self) {
        self.store(Instant::now());
    }

    /// Time since the stored instant.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.load().elapsed()
    }

    /// Returns `true` once strictly more than `window` has passed.
    #[must_use]
    pub fn has_elapsed(&self, window: Duration) -> bool {
        self.elapsed() > window
    }
}

impl Default for AtomicInstant {
    fn default() -> Self {
        Self::now()
    }
}

// ============================================
// Timestamp
// ============================================

/// Unix time in whole seconds, used when reporting connect times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from Unix seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// The current wall-clock time. Clocks set before 1970 read as zero.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
        Self(secs)
    }

    /// Seconds since the Unix epoch.
    #[must_use]
    pub const fn as_secs(&self) -> i64 {
        self.0
    }

    /// Seconds between this timestamp and now, never negative.
    #[must_use]
    pub fn age_secs(&self) -> u64 {
        u64::try_from(Self::now().0 - self.0).unwrap_or(0)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_atomic_instant_touch_moves_forward() {
        let seen = AtomicInstant::now();
        thread::sleep(Duration::from_millis(5));
        let before = seen.load();
        seen.touch();
        assert!(seen.load() > before);
    }

    #[test]
    fn test_atomic_instant_has_elapsed() {
        let seen = AtomicInstant::from_instant(Instant::now());
        thread::sleep(Duration::from_millis(10));
        assert!(seen.has_elapsed(Duration::from_millis(5)));
        assert!(!seen.has_elapsed(Duration::from_secs(30)));
    }

    #[test]
    fn test_timestamp_age() {
        let ts = Timestamp::from_secs(Timestamp::now().as_secs() - 10);
        assert!(ts.age_secs() >= 10);
        assert_eq!(Timestamp::from_secs(i64::MAX).age_secs(), 0);
    }
}
