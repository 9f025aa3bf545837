//! Process-relative, low-resolution time.
//!
//! The engine measures all expirations against a 32-bit counter of seconds
//! since process start. A dedicated ticker refreshes the published value at
//! least once per second; readers never take a lock and may observe a value
//! up to one tick stale.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Seconds since process start, 32-bit.
pub type RelTime = u32;

/// Expiry inputs less than or equal to this many seconds are interpreted as
/// offsets from now; larger values are absolute Unix timestamps.
pub const REALTIME_MAXDELTA: i64 = 60 * 60 * 24 * 30;

/// Coarse Unix time in whole seconds.
#[inline]
fn unix_now_secs() -> u64 {
    clocksource::coarse::UnixInstant::now()
        .duration_since(clocksource::coarse::UnixInstant::EPOCH)
        .as_secs() as u64
}

/// The relative-time source.
///
/// Published through an atomic cell so readers are wait-free. The owner is
/// expected to call [`Clock::update`] about once per second; nothing breaks
/// if updates are delayed, time just appears to stand still.
#[derive(Debug)]
pub struct Clock {
    /// Monotonic anchor for elapsed-time computation.
    started: Instant,
    /// Unix seconds at construction, for absolute-expiry conversion.
    epoch: u64,
    /// Published relative time.
    current: AtomicU32,
}

impl Clock {
    /// Create a clock anchored at "now".
    ///
    /// Relative time starts at 1 so that a published value of 0 never
    /// occurs and the never-expires sentinel stays unambiguous.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            epoch: unix_now_secs(),
            current: AtomicU32::new(1),
        }
    }

    /// The current relative time. Lock-free, possibly one tick stale.
    #[inline]
    pub fn now(&self) -> RelTime {
        self.current.load(Ordering::Relaxed)
    }

    /// Recompute and publish the relative time. Returns the new value.
    ///
    /// Monotonic non-decreasing: the published value only moves forward.
    pub fn update(&self) -> RelTime {
        let elapsed = self.started.elapsed().as_secs();
        let next = elapsed.saturating_add(1).min(u32::MAX as u64) as u32;
        self.current.fetch_max(next, Ordering::Relaxed);
        self.current.load(Ordering::Relaxed)
    }

    /// Unix seconds at process start.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Convert a client-supplied expiry input to relative time.
    ///
    /// - `0` means never-expires and maps to `0`.
    /// - Values in `1..=REALTIME_MAXDELTA` are offsets from now.
    /// - Larger values are absolute Unix timestamps; timestamps at or
    ///   before process start (or negative inputs) map to 1, which is
    ///   already in the past and expires the item immediately.
    pub fn realtime(&self, exptime: i64) -> RelTime {
        if exptime == 0 {
            return 0;
        }
        if exptime < 0 {
            return 1;
        }
        if exptime > REALTIME_MAXDELTA {
            // Absolute Unix timestamp. Relative time runs one ahead of
            // elapsed seconds, hence the +1.
            let rel = exptime - self.epoch as i64 + 1;
            if rel <= 0 {
                1
            } else {
                rel.min(u32::MAX as i64) as u32
            }
        } else {
            self.now().saturating_add(exptime as u32)
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one() {
        let clock = Clock::new();
        assert_eq!(clock.now(), 1);
    }

    #[test]
    fn update_is_monotonic() {
        let clock = Clock::new();
        let a = clock.update();
        let b = clock.update();
        assert!(b >= a);
        assert!(clock.now() >= 1);
    }

    #[test]
    fn realtime_zero_is_never() {
        let clock = Clock::new();
        assert_eq!(clock.realtime(0), 0);
    }

    #[test]
    fn realtime_relative_offsets() {
        let clock = Clock::new();
        let now = clock.now();
        assert_eq!(clock.realtime(1), now + 1);
        assert_eq!(clock.realtime(3600), now + 3600);
        assert_eq!(clock.realtime(REALTIME_MAXDELTA), now + REALTIME_MAXDELTA as u32);
    }

    #[test]
    fn realtime_absolute_future() {
        let clock = Clock::new();
        let in_a_year = clock.epoch() as i64 + 365 * 86400;
        let rel = clock.realtime(in_a_year);
        // One year out, expressed relative to process start.
        assert!(rel >= 365 * 86400);
    }

    #[test]
    fn realtime_absolute_past_expires_immediately() {
        let clock = Clock::new();
        let last_week = clock.epoch() as i64 - 7 * 86400;
        assert_eq!(clock.realtime(last_week), 1);
        assert_eq!(clock.realtime(-5), 1);
    }
}
