//! # bitprobe - relay bandwidth probe
//!
//! bitprobe measures the sustained throughput achievable between two
//! endpoints forced through a relay server. A sender saturates a data
//! channel, the receiver's bitrate is sampled once a second, and the run
//! ends with a single report.
//!
//! ## Key Features
//!
//! - **Relay-only path**: only relay candidates are exchanged
//! - **Backpressure-aware pump**: sends stop at a fixed buffered watermark
//! - **Debounced warnings**: a low-bitrate warning raised and cleared with hysteresis
//! - **Pluggable transport**: any [`PeerTransport`] implementation, including
//!   the in-memory [`LoopbackTransport`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bitprobe::{BitProbe, IceServer, LinkProfile, LoopbackTransport, ProbeConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let probe = BitProbe::init(Arc::new(LoopbackTransport::new(LinkProfile::kbps(2000))))?;
//!
//!     let config = ProbeConfig::new(vec![IceServer::turn(
//!         "turn:turn.example.com:3478?transport=udp",
//!         "user",
//!         "secret",
//!     )])
//!     .duration(std::time::Duration::from_secs(5));
//!
//!     let (_handle, mut events) = probe.bitrate_test(config);
//!     while let Some(event) = events.next().await {
//!         println!("Probe event: {:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use bitprobe_core::{
    CandidateType, Clock, DiagnosticError, IceCandidate, IceServer, IceStatsSnapshot,
    IceTransportPolicy, LinkProfile, LoopbackTransport, PeerTransport, ProbeError,
    SelectedIceCandidatePair, TokioClock,
};

pub use bitprobe_diagnostics::{
    constants, BitrateProbe, BitrateSample, DebugLogger, EventStream, ProbeConfig, ProbeEvent,
    ProbeHandle, ProbeState, ProbeVariant, Report, TestTiming, WarningKind,
};

// Public API modules
pub mod config;

pub use config::GlobalConfig;

use std::sync::Arc;
use tracing::debug;

/// Main entry point for bitprobe
#[derive(Debug, Clone)]
pub struct BitProbe {
    inner: Arc<BitProbeInner>,
}

#[derive(Debug)]
struct BitProbeInner {
    transport: Arc<dyn PeerTransport>,
    clock: Arc<dyn Clock>,
    config: GlobalConfig,
}

impl BitProbe {
    /// Initialize with default settings
    ///
    /// # Example
    /// ```rust,no_run
    /// use bitprobe::{BitProbe, LinkProfile, LoopbackTransport};
    /// use std::sync::Arc;
    ///
    /// let probe = BitProbe::init(Arc::new(LoopbackTransport::new(LinkProfile::default())))?;
    /// # Ok::<(), bitprobe::ProbeError>(())
    /// ```
    pub fn init(transport: Arc<dyn PeerTransport>) -> Result<Self, ProbeError> {
        Self::init_with(transport, GlobalConfig::default())
    }

    /// Initialize with custom global configuration.
    ///
    /// With `debug_logging` set, a `tracing` subscriber is installed. An
    /// invalid `log_filter` is an error; an already installed subscriber is
    /// kept as is.
    pub fn init_with(
        transport: Arc<dyn PeerTransport>,
        config: GlobalConfig,
    ) -> Result<Self, ProbeError> {
        if config.debug_logging {
            let logger = match &config.log_filter {
                Some(filter) => DebugLogger::with_filter(filter.clone()),
                None => DebugLogger::new(),
            };
            logger.env_filter()?;
            if let Err(e) = logger.init() {
                debug!("Keeping existing subscriber: {}", e);
            }
        }

        Ok(Self {
            inner: Arc::new(BitProbeInner {
                transport,
                clock: Arc::new(TokioClock),
                config,
            }),
        })
    }

    /// Replace the clock used to time probes
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(BitProbeInner {
                transport: self.inner.transport.clone(),
                clock,
                config: self.inner.config.clone(),
            }),
        }
    }

    /// Global configuration in use
    pub fn config(&self) -> &GlobalConfig {
        &self.inner.config
    }

    /// Start a stand-alone bitrate test graded pass/fail against
    /// `config.min_bitrate_threshold`. Must be called inside a tokio runtime.
    pub fn bitrate_test(&self, config: ProbeConfig) -> (ProbeHandle, EventStream) {
        self.start(config, ProbeVariant::bitrate_test())
    }

    /// Start a bitrate test diagnosing an existing media connection: no
    /// grade, low-bitrate warnings instead. Must be called inside a tokio
    /// runtime.
    pub fn media_connection_bitrate_test(&self, config: ProbeConfig) -> (ProbeHandle, EventStream) {
        self.start(config, ProbeVariant::media_connection())
    }

    fn start(&self, config: ProbeConfig, variant: ProbeVariant) -> (ProbeHandle, EventStream) {
        BitrateProbe::spawn_with_clock(
            self.inner.transport.clone(),
            config,
            variant,
            self.inner.clock.clone(),
        )
    }
}
