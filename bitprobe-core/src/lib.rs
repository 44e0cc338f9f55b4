//! # bitprobe core
//!
//! Capability seams for the bitrate probe: the peer-connection traits the
//! engine drives, the raw statistics model, the injected clock, the shared
//! error types, and an in-memory loopback transport.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod loopback;
pub mod stats;
pub mod transport;

// Re-export main types
pub use clock::{Clock, TokioClock};
pub use error::{DiagnosticError, ProbeError};
pub use loopback::{AppliedCandidate, FailurePlan, LinkProfile, LoopbackPeer, LoopbackTransport};
pub use stats::{
    resolve_ice_stats, CandidatePairState, IceCandidatePairStats, IceCandidateStats,
    IceStatsSnapshot, RtcStat, SelectedIceCandidatePair, TransportStats,
};
pub use transport::{
    CandidateType, ChannelState, DataChannel, IceCandidate, IceServer, IceTransportPolicy,
    PeerConfig, PeerConnection, PeerConnectionState, PeerEvent, PeerTransport, SdpType,
    SessionDescription,
};
