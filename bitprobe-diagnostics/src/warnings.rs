//! Debounced warnings over the bitrate sample stream

use crate::config::constants::{WARNING_MAX_LOW_SAMPLES, WARNING_WINDOW};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::info;

/// Kinds of warning a probe can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    /// Sustained throughput under the configured minimum
    LowBitrate,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::LowBitrate => f.write_str("low-bitrate"),
        }
    }
}

/// A change in the active warning set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningTransition {
    /// The warning became active
    Raised(WarningKind),
    /// The warning stopped being active
    Cleared(WarningKind),
}

/// Tracks which warnings are active and debounces the low-bitrate rule.
///
/// Once `window` samples have been observed, the most recent `window` are
/// inspected after every sample. More than `max_low_samples` strictly below
/// the threshold raises [`WarningKind::LowBitrate`]; anything else clears it.
/// Each kind is raised or cleared at most once per change of state.
#[derive(Debug, Clone)]
pub struct WarningMonitor {
    threshold: f64,
    window: usize,
    max_low_samples: usize,
    recent: VecDeque<f64>,
    active: HashSet<WarningKind>,
}

impl WarningMonitor {
    /// Monitor with the standard 5-sample window and 3-sample tolerance
    pub fn new(threshold: f64) -> Self {
        Self::with_window(threshold, WARNING_WINDOW, WARNING_MAX_LOW_SAMPLES)
    }

    /// Monitor with a custom window
    pub fn with_window(threshold: f64, window: usize, max_low_samples: usize) -> Self {
        Self {
            threshold,
            window,
            max_low_samples,
            recent: VecDeque::with_capacity(window),
            active: HashSet::new(),
        }
    }

    /// Currently active warnings
    pub fn active_warnings(&self) -> &HashSet<WarningKind> {
        &self.active
    }

    /// Whether `kind` is active
    pub fn is_active(&self, kind: WarningKind) -> bool {
        self.active.contains(&kind)
    }

    /// Record a sample in kbps and re-evaluate the rule
    pub fn observe(&mut self, value: f64) -> Option<WarningTransition> {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
        if self.recent.len() < self.window {
            return None;
        }

        let low = self.recent.iter().filter(|v| **v < self.threshold).count();

        if low > self.max_low_samples {
            self.raise(WarningKind::LowBitrate)
        } else {
            self.clear(WarningKind::LowBitrate)
        }
    }

    fn raise(&mut self, kind: WarningKind) -> Option<WarningTransition> {
        if !self.active.insert(kind) {
            return None;
        }
        info!("Warning raised: {}", kind);
        Some(WarningTransition::Raised(kind))
    }

    fn clear(&mut self, kind: WarningKind) -> Option<WarningTransition> {
        if !self.active.remove(&kind) {
            return None;
        }
        info!("Warning cleared: {}", kind);
        Some(WarningTransition::Cleared(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOW: f64 = 50.0;
    const OK: f64 = 500.0;

    /// Feed every value, returning the transition after the last one
    fn feed(monitor: &mut WarningMonitor, values: &[f64]) -> Option<WarningTransition> {
        values.iter().fold(None, |_, v| monitor.observe(*v))
    }

    #[test]
    fn test_needs_full_window() {
        let mut monitor = WarningMonitor::new(100.0);
        assert_eq!(feed(&mut monitor, &[LOW, LOW, LOW, LOW]), None);
        assert!(!monitor.is_active(WarningKind::LowBitrate));
    }

    #[test]
    fn test_raise_requires_more_than_three_low() {
        let mut monitor = WarningMonitor::new(100.0);
        assert_eq!(feed(&mut monitor, &[LOW, LOW, LOW, OK, OK]), None);

        let mut monitor = WarningMonitor::new(100.0);
        assert_eq!(feed(&mut monitor, &[LOW, OK, LOW, OK, OK]), None);

        let mut monitor = WarningMonitor::new(100.0);
        assert_eq!(
            feed(&mut monitor, &[LOW, LOW, OK, LOW, LOW]),
            Some(WarningTransition::Raised(WarningKind::LowBitrate))
        );

        let mut monitor = WarningMonitor::new(100.0);
        assert_eq!(
            feed(&mut monitor, &[LOW; 5]),
            Some(WarningTransition::Raised(WarningKind::LowBitrate))
        );
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut monitor = WarningMonitor::new(100.0);
        assert_eq!(feed(&mut monitor, &[100.0; 5]), None);
    }

    #[test]
    fn test_raise_and_clear_fire_once() {
        let mut monitor = WarningMonitor::new(100.0);

        assert_eq!(
            feed(&mut monitor, &[LOW; 5]),
            Some(WarningTransition::Raised(WarningKind::LowBitrate))
        );
        assert_eq!(monitor.observe(LOW), None);
        assert!(monitor.is_active(WarningKind::LowBitrate));

        // 4 low of the last 5 still holds the warning
        assert_eq!(monitor.observe(OK), None);

        // 3 low of the last 5 clears it
        assert_eq!(
            monitor.observe(OK),
            Some(WarningTransition::Cleared(WarningKind::LowBitrate))
        );
        assert_eq!(monitor.observe(OK), None);
        assert!(monitor.active_warnings().is_empty());
    }

    #[test]
    fn test_only_recent_window_counts() {
        let mut monitor = WarningMonitor::new(100.0);
        let values = [LOW, LOW, LOW, LOW, OK, OK, OK, OK, OK];
        assert_eq!(
            feed(&mut monitor, &values[..5]),
            Some(WarningTransition::Raised(WarningKind::LowBitrate))
        );
        assert_eq!(feed(&mut monitor, &values[5..]), None);
        assert!(!monitor.is_active(WarningKind::LowBitrate));
    }

    #[test]
    fn test_custom_window() {
        let mut monitor = WarningMonitor::with_window(100.0, 3, 1);
        assert_eq!(
            feed(&mut monitor, &[OK, LOW, LOW]),
            Some(WarningTransition::Raised(WarningKind::LowBitrate))
        );
    }
}
