//! Timestamp conversion utilities
//!
//! Storage uses `i64` microseconds since the Unix epoch. [`now_micros`]
//! keeps a high-water mark so stored timestamps never regress when the wall
//! clock jumps backward (NTP correction, VM migration).

use chrono::{NaiveDateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Backward jump threshold: 1 second in microseconds.
const BACKWARD_JUMP_THRESHOLD_US: i64 = 1_000_000;

/// Last observed wall-clock value (microseconds since epoch).
static LAST_SYSTEM_TIME_US: AtomicI64 = AtomicI64::new(0);

/// Convert chrono `NaiveDateTime` to microseconds since Unix epoch.
#[inline]
#[must_use]
pub fn naive_to_micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

/// Convert microseconds since Unix epoch to chrono `NaiveDateTime`.
///
/// Values outside chrono's representable range clamp instead of panicking.
#[inline]
#[must_use]
pub fn micros_to_naive(micros: i64) -> NaiveDateTime {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let sub_micros = micros.rem_euclid(MICROS_PER_SECOND);
    let nsecs = u32::try_from(sub_micros * 1000).unwrap_or(0);
    Utc.timestamp_opt(secs, nsecs)
        .single()
        .unwrap_or(if micros < 0 {
            chrono::DateTime::<Utc>::MIN_UTC
        } else {
            chrono::DateTime::<Utc>::MAX_UTC
        })
        .naive_utc()
}

/// Current time as microseconds since Unix epoch, monotonic against
/// backward wall-clock jumps larger than one second.
#[inline]
#[must_use]
pub fn now_micros() -> i64 {
    let current = Utc::now().timestamp_micros();
    let last = LAST_SYSTEM_TIME_US.load(Ordering::Relaxed);

    if last != 0 && current - last < -BACKWARD_JUMP_THRESHOLD_US {
        // Clock jumped backward; keep the high-water mark.
        return last;
    }

    LAST_SYSTEM_TIME_US.store(current, Ordering::Relaxed);
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_micros() {
        let micros = 1_406_538_000_000_000; // 2014-07-28 09:00:00 UTC
        assert_eq!(naive_to_micros(micros_to_naive(micros)), micros);
    }

    #[test]
    fn negative_micros_convert_without_panic() {
        let dt = micros_to_naive(-1);
        assert_eq!(naive_to_micros(dt), -1);
    }

    #[test]
    fn extreme_micros_clamp() {
        let _ = micros_to_naive(i64::MAX);
        let _ = micros_to_naive(i64::MIN);
    }

    #[test]
    fn now_micros_is_monotonic_across_calls() {
        let a = now_micros();
        let b = now_micros();
        assert!(b >= a);
    }
}
