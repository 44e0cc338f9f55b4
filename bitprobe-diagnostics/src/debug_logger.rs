//! Structured debug logging setup

use bitprobe_core::ProbeError;
use tracing_subscriber::EnvFilter;

/// Default filter when neither `RUST_LOG` nor an explicit filter is given
pub const DEFAULT_FILTER: &str = "bitprobe=info,bitprobe_core=info,bitprobe_diagnostics=info";

/// Installs the global `tracing` subscriber
#[derive(Debug, Clone)]
pub struct DebugLogger {
    filter: Option<String>,
}

impl DebugLogger {
    /// Logger honouring `RUST_LOG`, falling back to [`DEFAULT_FILTER`]
    pub fn new() -> Self {
        Self { filter: None }
    }

    /// Logger with an explicit filter directive such as `bitprobe_diagnostics=debug`
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
        }
    }

    /// Filter that [`init`](DebugLogger::init) would install
    pub fn env_filter(&self) -> Result<EnvFilter, ProbeError> {
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).map_err(|e| ProbeError::Initialization {
                reason: format!("invalid log filter {:?}: {}", filter, e),
            }),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
        }
    }

    /// Install the subscriber. Fails if one is already installed.
    pub fn init(&self) -> Result<(), ProbeError> {
        let filter = self.env_filter()?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .map_err(|e| ProbeError::Initialization {
                reason: format!("logging already initialized: {}", e),
            })
    }

    /// Initialize logging with the default filter
    pub fn init_logging() -> Result<(), ProbeError> {
        Self::new().init()
    }
}

impl Default for DebugLogger {
    fn default() -> Self {
        Self::new()
    }
}
