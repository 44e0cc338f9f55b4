//! Throughput sampling from cumulative received bytes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

/// One throughput measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BitrateSample {
    /// Received throughput in kbps
    pub value: f64,
    /// Wall-clock time the sample was taken
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    at: Instant,
    bytes: u64,
}

/// Converts cumulative bytes received into per-interval kbps.
///
/// A tick with no checkpoint, or whose checkpoint saw no bytes yet, only
/// records a baseline. Every other tick yields the exact rate over the
/// interval since the previous checkpoint, including zero.
#[derive(Debug, Default)]
pub struct BitrateSampler {
    total_bytes_received: u64,
    checkpoint: Option<Checkpoint>,
}

impl BitrateSampler {
    /// Create an empty sampler
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a received message
    pub fn record_bytes(&mut self, len: usize) {
        self.total_bytes_received += len as u64;
    }

    /// Total bytes counted so far
    pub fn total_bytes_received(&self) -> u64 {
        self.total_bytes_received
    }

    /// Take a sample at `now`, returning kbps unless this tick is a baseline
    pub fn sample(&mut self, now: Instant) -> Option<f64> {
        let checkpoint = match self.checkpoint {
            Some(checkpoint) if checkpoint.bytes > 0 => checkpoint,
            _ => {
                trace!("Baseline at {} bytes", self.total_bytes_received);
                self.checkpoint = Some(Checkpoint {
                    at: now,
                    bytes: self.total_bytes_received,
                });
                return None;
            }
        };

        let elapsed_ms = now.duration_since(checkpoint.at).as_secs_f64() * 1000.0;
        if elapsed_ms <= 0.0 {
            return None;
        }

        let delta = self.total_bytes_received - checkpoint.bytes;
        self.checkpoint = Some(Checkpoint {
            at: now,
            bytes: self.total_bytes_received,
        });
        Some(8.0 * delta as f64 / elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_tick_is_baseline() {
        let start = Instant::now();
        let mut sampler = BitrateSampler::new();
        sampler.record_bytes(1024);

        assert_eq!(sampler.sample(start), None);
        assert_eq!(
            sampler.sample(start + Duration::from_millis(1000)),
            Some(0.0)
        );
    }

    #[test]
    fn test_rebaselines_until_bytes_arrive() {
        let start = Instant::now();
        let mut sampler = BitrateSampler::new();

        assert_eq!(sampler.sample(start), None);
        assert_eq!(sampler.sample(start + Duration::from_millis(1000)), None);

        sampler.record_bytes(2048);
        assert_eq!(sampler.sample(start + Duration::from_millis(2000)), None);

        sampler.record_bytes(1024);
        assert_eq!(
            sampler.sample(start + Duration::from_millis(3000)),
            Some(8.192)
        );
    }

    #[test]
    fn test_exact_rate_over_interval() {
        let start = Instant::now();
        let mut sampler = BitrateSampler::new();
        sampler.record_bytes(1024);
        sampler.sample(start);

        sampler.record_bytes(1024);
        let value = sampler
            .sample(start + Duration::from_millis(1200))
            .unwrap();
        assert!((value - 8.0 * 1024.0 / 1200.0).abs() < 1e-9);
        assert_eq!(sampler.total_bytes_received(), 2048);
    }

    #[test]
    fn test_zero_interval_yields_nothing() {
        let start = Instant::now();
        let mut sampler = BitrateSampler::new();
        sampler.record_bytes(10);
        sampler.sample(start);
        sampler.record_bytes(10);

        assert_eq!(sampler.sample(start), None);
        assert_eq!(
            sampler.sample(start + Duration::from_millis(1000)),
            Some(0.08)
        );
    }
}
