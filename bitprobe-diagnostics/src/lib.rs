//! # bitprobe diagnostics
//!
//! Relay bitrate measurement for bitprobe. Two endpoints are connected
//! through a relay, the sender saturates a data channel, and the receiver's
//! throughput is sampled once a second. Results arrive as a stream of
//! [`ProbeEvent`]s ending in exactly one [`Report`].

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod debug_logger;
pub mod event;
pub mod negotiator;
pub mod probe;
pub mod report;
pub mod sampler;
pub mod saturator;
pub mod transport_pair;
pub mod warnings;
pub mod watchdog;

// Re-export main types
pub use config::{constants, ProbeConfig, ProbeVariant};
pub use debug_logger::DebugLogger;
pub use event::{EventStream, ProbeEvent};
pub use negotiator::{negotiate, NegotiationStep};
pub use probe::{BitrateProbe, ProbeHandle, ProbeState};
pub use report::{average_bitrate, Report, ReportBuilder, TestTiming};
pub use sampler::{BitrateSample, BitrateSampler};
pub use saturator::ChannelSaturator;
pub use transport_pair::{Endpoint, Role, TransportPair};
pub use warnings::{WarningKind, WarningMonitor, WarningTransition};
pub use watchdog::Watchdog;
