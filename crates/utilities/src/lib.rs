//! # Utilities
//! Small helpers shared between the capture, compute and harness crates.
//!

use core::time::Duration;
use std::time::Instant;

use tracing::debug;

pub use failure::{Failure, Ignore, log_and_panic};

mod failure;

/// Display the duration as a string with units. Display is handled in the following order:
/// 1. `>= 10s` displays seconds only.
/// 1. `>= 1s` displays seconds with 1dp.
/// 1. `>= 1ms` displays milliseconds only.
/// 1. `>= 1µs` displays microseconds only.
/// 1. `< 1µs` displays nanoseconds only.
#[inline]
pub fn display_duration(duration: Duration) -> String {
    if duration.as_secs() >= 10 {
        format!("{}s", duration.as_secs())
    } else if duration.as_secs() >= 1 {
        format!("{:.1}s", duration.as_secs_f32())
    } else if duration.as_millis() >= 1 {
        format!("{}ms", duration.as_millis())
    } else if duration.as_micros() >= 1 {
        format!("{}µs", duration.as_micros())
    } else {
        format!("{}ns", duration.as_nanos())
    }
}

/// Logs the time since construction when dropped.
///
/// Printed in the format `[Timing] {label} took {duration}`.
pub struct DebugTime {
    label: String,
    start: Instant,
}

impl DebugTime {
    /// Start a new timer with the given label.
    pub fn start<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }

    /// The time elapsed since the timer started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for DebugTime {
    fn drop(&mut self) {
        debug!(
            "[Timing] {} took {}",
            self.label,
            display_duration(self.start.elapsed())
        )
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::display_duration;

    #[test]
    fn duration_units() {
        assert_eq!(display_duration(Duration::from_secs(12)), "12s");
        assert_eq!(display_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(display_duration(Duration::from_millis(3)), "3ms");
        assert_eq!(display_duration(Duration::from_micros(40)), "40µs");
        assert_eq!(display_duration(Duration::from_nanos(7)), "7ns");
    }
}
