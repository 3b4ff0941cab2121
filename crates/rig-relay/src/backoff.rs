//! Flush interval schedule
//!
//! | consecutive errors | interval |
//! |---|---|
//! | 0 | base |
//! | 1..=3 | 2 x base |
//! | 4..=9 | 30 s |
//! | 10+ | 60 s |

use std::time::Duration;

/// Interval used after a handful of failures
pub const MEDIUM_INTERVAL: Duration = Duration::from_secs(30);
/// Interval used once failure looks sustained
pub const LONG_INTERVAL: Duration = Duration::from_secs(60);

/// Time to wait before the next flush
pub fn flush_interval(base: Duration, consecutive_errors: u32) -> Duration {
    match consecutive_errors {
        0 => base,
        1..=3 => base.saturating_mul(2),
        4..=9 => MEDIUM_INTERVAL,
        _ => LONG_INTERVAL,
    }
}
