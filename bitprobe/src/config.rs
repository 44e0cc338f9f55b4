//! Configuration types and defaults

use serde::{Deserialize, Serialize};

/// Process-wide bitprobe configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfig {
    /// Install a `tracing` subscriber on init
    pub debug_logging: bool,
    /// Filter directive for that subscriber; `RUST_LOG` or the built-in
    /// default is used when unset
    pub log_filter: Option<String>,
}

impl GlobalConfig {
    /// Configuration with logging enabled at the given filter
    pub fn with_logging(filter: impl Into<String>) -> Self {
        Self {
            debug_logging: true,
            log_filter: Some(filter.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GlobalConfig::default();
        assert!(!config.debug_logging);
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn test_with_logging() {
        let config = GlobalConfig::with_logging("bitprobe_diagnostics=debug");
        assert!(config.debug_logging);
        assert_eq!(config.log_filter.as_deref(), Some("bitprobe_diagnostics=debug"));
    }
}
