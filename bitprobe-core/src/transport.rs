//! Peer-connection capability consumed by the probe engine
//!
//! The engine never talks to a concrete real-time stack. It drives two
//! [`PeerConnection`]s created by an injected [`PeerTransport`] and reacts to
//! the [`PeerEvent`]s each connection publishes.

use crate::error::ProbeError;
use crate::stats::RtcStat;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    /// Server URLs, e.g. `turn:global.turn.example.com:3478?transport=udp`
    pub urls: Vec<String>,
    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Server without credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// TURN server with long-term credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Which candidates an endpoint may gather
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    /// Host, reflexive and relayed candidates
    #[default]
    All,
    /// Relayed candidates only
    Relay,
}

/// Configuration used to create one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerConfig {
    /// Relay servers the endpoint gathers through
    pub ice_servers: Vec<IceServer>,
    /// Candidate gathering policy
    pub ice_transport_policy: IceTransportPolicy,
}

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer created by the initiating endpoint
    Offer,
    /// Answer created by the responding endpoint
    Answer,
}

/// An opaque session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Description body
    pub sdp: String,
}

/// ICE candidate type, as carried by the `typ` token of a candidate line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    /// Local interface address
    Host,
    /// Server reflexive address learned through STUN
    Srflx,
    /// Peer reflexive address learned from connectivity checks
    Prflx,
    /// Address allocated on a TURN relay
    Relay,
}

impl CandidateType {
    /// The token used in candidate lines
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandidateType {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(CandidateType::Host),
            "srflx" => Ok(CandidateType::Srflx),
            "prflx" => Ok(CandidateType::Prflx),
            "relay" => Ok(CandidateType::Relay),
            other => Err(ProbeError::Serialization {
                reason: format!("unknown candidate type '{}'", other),
            }),
        }
    }
}

/// A gathered ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute, e.g.
    /// `candidate:1 1 udp 41885439 203.0.113.7 3478 typ relay raddr 0.0.0.0 rport 0`
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Candidate for the first media section
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    /// Candidate type parsed from the `typ` token, if present and known
    pub fn candidate_type(&self) -> Option<CandidateType> {
        let mut tokens = self.candidate.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "typ" {
                return tokens.next().and_then(|t| t.parse().ok());
            }
        }
        None
    }

    /// Whether this candidate describes a relayed path
    pub fn is_relay(&self) -> bool {
        self.candidate_type() == Some(CandidateType::Relay)
    }
}

/// Data channel ready state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Negotiation not finished
    Connecting,
    /// Ready to carry data
    Open,
    /// Close requested
    Closing,
    /// No longer usable
    Closed,
}

/// Aggregate connection state of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    /// Freshly created
    New,
    /// Connectivity checks in progress
    Connecting,
    /// A candidate pair carries traffic
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity checks failed
    Failed,
    /// Closed locally
    Closed,
}

/// Events published by a [`PeerConnection`]
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered
    IceCandidate(IceCandidate),
    /// Candidate gathering finished
    IceGatheringComplete,
    /// Connection state changed
    ConnectionStateChanged(PeerConnectionState),
    /// A data channel (local or remotely created) opened
    ChannelOpened {
        /// Channel label
        label: String,
    },
    /// A data channel closed
    ChannelClosed {
        /// Channel label
        label: String,
    },
    /// A message arrived on a data channel
    Message {
        /// Channel label
        label: String,
        /// Message payload
        data: Bytes,
    },
}

impl PeerEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            PeerEvent::IceCandidate(_) => "ice_candidate",
            PeerEvent::IceGatheringComplete => "ice_gathering_complete",
            PeerEvent::ConnectionStateChanged(_) => "connection_state_changed",
            PeerEvent::ChannelOpened { .. } => "channel_opened",
            PeerEvent::ChannelClosed { .. } => "channel_closed",
            PeerEvent::Message { .. } => "message",
        }
    }
}

/// Factory for endpoints
pub trait PeerTransport: Send + Sync + fmt::Debug {
    /// Create an endpoint from the given configuration
    fn create_peer(&self, config: &PeerConfig) -> Result<Arc<dyn PeerConnection>, ProbeError>;
}

/// One side of a real-time connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Take the receiver for this connection's events.
    ///
    /// Returns `None` if the receiver was already taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;

    /// Create an outbound data channel
    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, ProbeError>;

    /// Create an offer
    async fn create_offer(&self) -> Result<SessionDescription, ProbeError>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription, ProbeError>;

    /// Apply a local description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), ProbeError>;

    /// Apply a remote description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), ProbeError>;

    /// Apply a candidate gathered by the remote endpoint
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ProbeError>;

    /// Raw statistics report
    async fn stats(&self) -> Result<Vec<RtcStat>, ProbeError>;

    /// Close the connection and every channel on it
    fn close(&self);
}

/// Sending half of a data channel
pub trait DataChannel: Send + Sync {
    /// Channel label
    fn label(&self) -> &str;

    /// Current ready state
    fn ready_state(&self) -> ChannelState;

    /// Bytes queued but not yet handed to the network
    fn buffered_amount(&self) -> u64;

    /// Queue a message
    fn send(&self, data: Bytes) -> Result<(), ProbeError>;

    /// Close the channel
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_type_parsing() {
        let relay = IceCandidate::new(
            "candidate:3 1 udp 41885439 203.0.113.7 49152 typ relay raddr 198.51.100.4 rport 51000",
        );
        let host = IceCandidate::new("candidate:1 1 udp 2122260223 192.168.1.20 54321 typ host");
        let srflx = IceCandidate::new(
            "candidate:2 1 udp 1686052607 198.51.100.4 51000 typ srflx raddr 192.168.1.20 rport 54321",
        );

        assert_eq!(relay.candidate_type(), Some(CandidateType::Relay));
        assert!(relay.is_relay());
        assert_eq!(host.candidate_type(), Some(CandidateType::Host));
        assert!(!host.is_relay());
        assert!(!srflx.is_relay());
    }

    #[test]
    fn test_relay_marker_must_be_the_type_token() {
        // "relay" appearing elsewhere in the line does not make it a relay candidate
        let tricky = IceCandidate::new("candidate:relay 1 udp 2122260223 10.0.0.1 9 typ host");
        assert!(!tricky.is_relay());

        let malformed = IceCandidate::new("candidate:9 1 udp 1 10.0.0.1 9 typ");
        assert_eq!(malformed.candidate_type(), None);
    }

    #[test]
    fn test_ice_server_serialization() {
        let server = IceServer::turn("turn:turn.example.com:3478", "user", "secret");
        let json = serde_json::to_string(&server).unwrap();
        assert_eq!(
            json,
            r#"{"urls":["turn:turn.example.com:3478"],"username":"user","credential":"secret"}"#
        );

        let parsed: IceServer =
            serde_json::from_str(r#"{"urls":["stun:stun.example.com"]}"#).unwrap();
        assert_eq!(parsed, IceServer::new("stun:stun.example.com"));
    }
}
