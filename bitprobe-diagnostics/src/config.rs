//! Probe configuration, variants and fixed tuning constants

use bitprobe_core::{IceServer, IceTransportPolicy, ProbeError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed tuning constants. These are not configurable per probe.
pub mod constants {
    use std::time::Duration;

    /// Size of every saturation packet in bytes
    pub const PACKET_SIZE: usize = 1024;
    /// Maximum packets sent per saturation tick
    pub const MAX_PACKETS_PER_TICK: usize = 100;
    /// Buffered amount at which a saturation tick stops sending
    pub const HIGH_WATERMARK: u64 = (PACKET_SIZE * MAX_PACKETS_PER_TICK) as u64;
    /// Period of the saturation pump
    pub const SATURATION_TICK: Duration = Duration::from_millis(1);
    /// Period of the bitrate sampler
    pub const SAMPLING_PERIOD: Duration = Duration::from_millis(1000);
    /// Time allowed for the first nonzero sample
    pub const WATCHDOG_TIMEOUT: Duration = Duration::from_millis(15000);
    /// Number of recent samples the low-bitrate rule looks at
    pub const WARNING_WINDOW: usize = 5;
    /// Low samples tolerated inside the window before warning
    pub const WARNING_MAX_LOW_SAMPLES: usize = 3;
    /// Default minimum acceptable bitrate in kbps
    pub const DEFAULT_MIN_BITRATE_KBPS: f64 = 100.0;
    /// Label of the saturated data channel
    pub const CHANNEL_LABEL: &str = "sender";
}

/// Per-probe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    /// Relay servers both endpoints gather through; must not be empty
    pub ice_servers: Vec<IceServer>,
    /// Minimum acceptable bitrate in kbps
    pub min_bitrate_threshold: f64,
    /// Stop automatically after this long
    #[serde(rename = "durationMs", with = "duration_ms")]
    pub duration: Option<Duration>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            min_bitrate_threshold: constants::DEFAULT_MIN_BITRATE_KBPS,
            duration: None,
        }
    }
}

impl ProbeConfig {
    /// Configuration using the given relay servers and default threshold
    pub fn new(ice_servers: Vec<IceServer>) -> Self {
        Self {
            ice_servers,
            ..Self::default()
        }
    }

    /// Set the minimum acceptable bitrate in kbps
    pub fn min_bitrate_threshold(mut self, kbps: f64) -> Self {
        self.min_bitrate_threshold = kbps;
        self
    }

    /// Stop the probe automatically after `duration`
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Parse a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, ProbeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check the configuration before a probe starts
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.ice_servers.is_empty() {
            return Err(ProbeError::MissingConfiguration {
                field: "iceServers".to_string(),
            });
        }
        if !self.min_bitrate_threshold.is_finite() || self.min_bitrate_threshold < 0.0 {
            return Err(ProbeError::InvalidConfiguration {
                reason: format!(
                    "minBitrateThreshold must be a non-negative number, got {}",
                    self.min_bitrate_threshold
                ),
            });
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// What distinguishes the two bitrate tests sharing one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeVariant {
    /// Name placed in the report
    pub test_name: String,
    /// Gathering policy of the receiving endpoint
    pub receiver_policy: IceTransportPolicy,
    /// Emit debounced low-bitrate warnings
    pub low_bitrate_warnings: bool,
    /// Grade the run pass/fail against the threshold
    pub grade: bool,
}

impl ProbeVariant {
    /// Stand-alone bitrate test: relay-only receiver, pass/fail grading
    pub fn bitrate_test() -> Self {
        Self {
            test_name: "bitrate-test".to_string(),
            receiver_policy: IceTransportPolicy::Relay,
            low_bitrate_warnings: false,
            grade: true,
        }
    }

    /// Diagnostic for an existing media connection: warnings instead of grading
    pub fn media_connection() -> Self {
        Self {
            test_name: "media-connection-bitrate-test".to_string(),
            receiver_policy: IceTransportPolicy::All,
            low_bitrate_warnings: true,
            grade: false,
        }
    }
}

impl Default for ProbeVariant {
    fn default() -> Self {
        Self::bitrate_test()
    }
}
