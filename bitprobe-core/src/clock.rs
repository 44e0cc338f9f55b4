//! Time source injected into probes

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use tokio::time::Instant;

/// Source of monotonic and wall-clock time.
///
/// Timers themselves run on the tokio timer wheel, so a clock used together
/// with paused tokio time must read [`tokio::time::Instant`].
pub trait Clock: Send + Sync + Debug {
    /// Monotonic now
    fn now(&self) -> Instant;

    /// Wall-clock now, used to stamp reports
    fn wall_clock(&self) -> DateTime<Utc>;
}

/// Clock backed by the tokio runtime and the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock;
        let before = clock.now();
        tokio::time::advance(Duration::from_millis(1200)).await;
        assert_eq!(clock.now() - before, Duration::from_millis(1200));
    }
}
