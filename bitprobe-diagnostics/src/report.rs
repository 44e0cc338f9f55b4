//! Final probe report

use bitprobe_core::{DiagnosticError, IceCandidateStats, IceStatsSnapshot, SelectedIceCandidatePair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When the probe ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTiming {
    /// Wall-clock start
    pub start: DateTime<Utc>,
    /// Wall-clock end
    pub end: DateTime<Utc>,
    /// Elapsed milliseconds between start and end
    pub duration: u64,
}

impl TestTiming {
    /// Timing for a run that started at `start` and lasted `elapsed`
    pub fn new(start: DateTime<Utc>, elapsed: Duration) -> Self {
        let end = chrono::Duration::from_std(elapsed)
            .ok()
            .and_then(|d| start.checked_add_signed(d))
            .unwrap_or(start);
        Self {
            start,
            end,
            duration: elapsed.as_millis() as u64,
        }
    }
}

/// Immutable result of one probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Mean of `values`, or 0 when there are none
    pub average_bitrate: f64,
    /// Pass/fail grade, present only for grading variants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did_pass: Option<bool>,
    /// Every error recorded, in order
    pub errors: Vec<DiagnosticError>,
    /// Candidates known when statistics resolved
    pub ice_candidate_stats: Vec<IceCandidateStats>,
    /// Selected candidate pair, if statistics resolved and named one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_ice_candidate_pair_stats: Option<SelectedIceCandidatePair>,
    /// Variant name
    pub test_name: String,
    /// Start, end and duration
    pub test_timing: TestTiming,
    /// Every bitrate sample in kbps, in order
    pub values: Vec<f64>,
}

impl Report {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Mean of the samples; 0 for an empty slice
pub fn average_bitrate(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Assembles a [`Report`] from session state
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    test_name: String,
    threshold: f64,
    grade: bool,
    errors: Vec<DiagnosticError>,
    values: Vec<f64>,
    ice_stats: Option<IceStatsSnapshot>,
}

impl ReportBuilder {
    /// Builder for the named test graded (or not) against `threshold` kbps
    pub fn new(test_name: impl Into<String>, threshold: f64, grade: bool) -> Self {
        Self {
            test_name: test_name.into(),
            threshold,
            grade,
            errors: Vec::new(),
            values: Vec::new(),
            ice_stats: None,
        }
    }

    /// Recorded errors
    pub fn errors(mut self, errors: Vec<DiagnosticError>) -> Self {
        self.errors = errors;
        self
    }

    /// Recorded samples
    pub fn values(mut self, values: Vec<f64>) -> Self {
        self.values = values;
        self
    }

    /// Resolved candidate statistics
    pub fn ice_stats(mut self, ice_stats: Option<IceStatsSnapshot>) -> Self {
        self.ice_stats = ice_stats;
        self
    }

    /// Build the report
    pub fn build(self, timing: TestTiming) -> Report {
        let average = average_bitrate(&self.values);
        let did_pass = self.grade.then(|| {
            self.errors.is_empty() && !self.values.is_empty() && average >= self.threshold
        });
        let (ice_candidate_stats, selected_ice_candidate_pair_stats) = match self.ice_stats {
            Some(snapshot) => (
                snapshot.ice_candidate_stats,
                snapshot.selected_ice_candidate_pair_stats,
            ),
            None => (Vec::new(), None),
        };

        Report {
            average_bitrate: average,
            did_pass,
            errors: self.errors,
            ice_candidate_stats,
            selected_ice_candidate_pair_stats,
            test_name: self.test_name,
            test_timing: timing,
            values: self.values,
        }
    }
}
