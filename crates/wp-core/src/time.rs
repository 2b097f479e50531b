//! Wall-clock timestamps
//!
//! Session creation times and agent last-seen stamps are kept as
//! milliseconds since the Unix epoch so they fit in an `AtomicU64` and
//! serialize as plain numbers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, or 0 if the clock is before it
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds since `since`; a stamp from the future counts as now
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_is_after_epoch() {
        assert!(current_time_millis() > 1_600_000_000_000);
    }

    #[test]
    fn test_elapsed_since_stamp() {
        let stamp = current_time_millis() - 5_000;
        let elapsed = elapsed_millis(stamp);
        assert!((5_000..60_000).contains(&elapsed));
    }

    #[test]
    fn test_future_stamp_clamps_to_zero() {
        assert_eq!(elapsed_millis(current_time_millis() + 1_000_000), 0);
    }
}
