//! Duration helpers for readable flow code.

use std::time::Duration;

/// Builds [`Duration`]s from integer literals: `5.seconds()`, `250.ms()`.
pub trait DurationExt {
    /// This many milliseconds.
    fn ms(self) -> Duration;

    /// This many seconds.
    fn seconds(self) -> Duration;

    /// This many minutes.
    fn minutes(self) -> Duration;
}

impl DurationExt for u64 {
    fn ms(self) -> Duration {
        Duration::from_millis(self)
    }

    fn seconds(self) -> Duration {
        Duration::from_secs(self)
    }

    fn minutes(self) -> Duration {
        Duration::from_secs(self * 60)
    }
}
