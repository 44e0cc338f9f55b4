//! In-memory transport for tests and demos
//!
//! Endpoints created by one [`LoopbackTransport`] share a simulated network.
//! Descriptions carry the creating peer's id, so applying an offer/answer pair
//! connects the two peers. Channel sends are delivered to the remote peer
//! immediately; the buffered amount drains at the configured link rate,
//! measured against the tokio clock so paused-time tests stay deterministic.
//!
//! Closing a peer frees its channel buffers and gathered candidates. The peer's
//! final state and the log of applied candidates stay inspectable for the life
//! of the transport, so one transport is meant to back a bounded set of runs.

use crate::error::ProbeError;
use crate::stats::{
    CandidatePairState, IceCandidatePairStats, IceCandidateStats, RtcStat, TransportStats,
};
use crate::transport::{
    CandidateType, ChannelState, DataChannel, IceCandidate, IceTransportPolicy, PeerConfig,
    PeerConnection, PeerConnectionState, PeerEvent, PeerTransport, SdpType, SessionDescription,
};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

const PEER_ATTRIBUTE: &str = "a=loopback-peer:";

/// Simulated link characteristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkProfile {
    /// Drain rate of every channel's send buffer; `None` drains instantly,
    /// `Some(0)` never drains and drops all traffic
    pub rate_bytes_per_ms: Option<u64>,
    /// Candidate types each peer gathers, subject to its transport policy
    pub candidate_types: Vec<CandidateType>,
}

impl LinkProfile {
    /// Link draining at `kbps` kilobits per second
    pub fn kbps(kbps: u64) -> Self {
        Self {
            rate_bytes_per_ms: Some(kbps / 8),
            ..Self::default()
        }
    }

    /// Link that accepts traffic but never delivers it
    pub fn black_hole() -> Self {
        Self {
            rate_bytes_per_ms: Some(0),
            ..Self::default()
        }
    }
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            rate_bytes_per_ms: None,
            candidate_types: vec![CandidateType::Host, CandidateType::Srflx, CandidateType::Relay],
        }
    }
}

/// Operations that should fail
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailurePlan {
    /// Fail endpoint creation
    pub create_peer: bool,
    /// Fail data channel creation
    pub create_data_channel: bool,
    /// Fail offer creation
    pub create_offer: bool,
    /// Fail answer creation
    pub create_answer: bool,
    /// Fail applying local descriptions of this type
    pub set_local_description: Option<SdpType>,
    /// Fail applying remote descriptions of this type
    pub set_remote_description: Option<SdpType>,
    /// Fail applying remote candidates
    pub add_ice_candidate: bool,
    /// Fail statistics reports
    pub stats: bool,
}

/// A remote candidate applied to a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCandidate {
    /// Peer the candidate was applied to
    pub peer_id: Uuid,
    /// The candidate
    pub candidate: IceCandidate,
}

#[derive(Debug)]
struct ChannelSlot {
    state: ChannelState,
    buffered: u64,
    last_drain: Instant,
}

#[derive(Debug)]
struct PeerSlot {
    index: u32,
    events: mpsc::UnboundedSender<PeerEvent>,
    policy: IceTransportPolicy,
    local: Option<SessionDescription>,
    remote_peer: Option<Uuid>,
    state: PeerConnectionState,
    channels: Vec<String>,
    gathered: Vec<IceCandidate>,
    remote_candidates: Vec<IceCandidate>,
    bytes_sent: u64,
    bytes_received: u64,
}

impl PeerSlot {
    fn emit(&self, event: PeerEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.events.send(event);
    }
}

#[derive(Debug, Default)]
struct Network {
    profile: LinkProfile,
    failures: FailurePlan,
    created: u32,
    peers: HashMap<Uuid, PeerSlot>,
    channels: HashMap<(Uuid, String), ChannelSlot>,
    applied: Vec<AppliedCandidate>,
}

impl Network {
    fn fail_if(&self, failing: bool, operation: &str) -> Result<(), ProbeError> {
        if failing {
            Err(ProbeError::transport(format!("{} rejected by loopback", operation)))
        } else {
            Ok(())
        }
    }

    fn peer(&self, id: Uuid) -> Result<&PeerSlot, ProbeError> {
        self.peers
            .get(&id)
            .ok_or_else(|| ProbeError::transport(format!("unknown loopback peer {}", id)))
    }

    fn peer_mut(&mut self, id: Uuid) -> Result<&mut PeerSlot, ProbeError> {
        self.peers
            .get_mut(&id)
            .ok_or_else(|| ProbeError::transport(format!("unknown loopback peer {}", id)))
    }

    fn drain(&mut self, now: Instant) {
        let rate = self.profile.rate_bytes_per_ms;
        for slot in self.channels.values_mut() {
            match rate {
                None => {
                    slot.buffered = 0;
                    slot.last_drain = now;
                }
                Some(rate) => {
                    // Sub-millisecond remainders carry over to the next drain
                    let elapsed_ms = now.duration_since(slot.last_drain).as_millis() as u64;
                    slot.buffered = slot.buffered.saturating_sub(rate * elapsed_ms);
                    slot.last_drain += Duration::from_millis(elapsed_ms);
                }
            }
        }
    }

    /// Connect `id` with its remote once both sides hold both descriptions
    fn try_connect(&mut self, id: Uuid) {
        let Some(remote_id) = self.peers.get(&id).and_then(|p| p.remote_peer) else {
            return;
        };
        let ready = |slot: Option<&PeerSlot>, expected_remote: Uuid| {
            slot.map(|p| {
                p.local.is_some()
                    && p.remote_peer == Some(expected_remote)
                    && p.state != PeerConnectionState::Connected
                    && p.state != PeerConnectionState::Closed
            })
            .unwrap_or(false)
        };
        if !ready(self.peers.get(&id), remote_id) || !ready(self.peers.get(&remote_id), id) {
            return;
        }

        debug!("Loopback peers {} and {} connected", id, remote_id);
        let mut labels = Vec::new();
        for peer_id in [id, remote_id] {
            if let Some(peer) = self.peers.get_mut(&peer_id) {
                peer.state = PeerConnectionState::Connected;
                peer.emit(PeerEvent::ConnectionStateChanged(PeerConnectionState::Connected));
                labels.extend(peer.channels.iter().map(|l| (peer_id, l.clone())));
            }
        }

        let now = Instant::now();
        for (owner, label) in labels {
            if let Some(slot) = self.channels.get_mut(&(owner, label.clone())) {
                slot.state = ChannelState::Open;
                slot.last_drain = now;
            }
            for peer_id in [id, remote_id] {
                if let Some(peer) = self.peers.get(&peer_id) {
                    peer.emit(PeerEvent::ChannelOpened {
                        label: label.clone(),
                    });
                }
            }
        }
    }
}

/// Factory for in-memory endpoints sharing one simulated network
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    network: Arc<Mutex<Network>>,
}

impl LoopbackTransport {
    /// Create a transport with the given link profile
    pub fn new(profile: LinkProfile) -> Self {
        Self {
            network: Arc::new(Mutex::new(Network {
                profile,
                ..Network::default()
            })),
        }
    }

    /// Install a failure plan for subsequent operations
    pub fn with_failures(self, failures: FailurePlan) -> Self {
        self.network.lock().failures = failures;
        self
    }

    /// Change the link rate; data already buffered drains at the old rate up to now
    pub fn set_link_rate(&self, rate_bytes_per_ms: Option<u64>) {
        let mut network = self.network.lock();
        network.drain(Instant::now());
        network.profile.rate_bytes_per_ms = rate_bytes_per_ms;
    }

    /// Every remote candidate applied so far, in order
    pub fn applied_candidates(&self) -> Vec<AppliedCandidate> {
        self.network.lock().applied.clone()
    }

    /// Ids of all peers created so far
    pub fn peer_ids(&self) -> Vec<Uuid> {
        let network = self.network.lock();
        let mut peers: Vec<(u32, Uuid)> =
            network.peers.iter().map(|(id, p)| (p.index, *id)).collect();
        peers.sort();
        peers.into_iter().map(|(_, id)| id).collect()
    }

    /// Connection state of a peer
    pub fn peer_state(&self, id: Uuid) -> Option<PeerConnectionState> {
        self.network.lock().peers.get(&id).map(|p| p.state)
    }
}

impl PeerTransport for LoopbackTransport {
    fn create_peer(&self, config: &PeerConfig) -> Result<Arc<dyn PeerConnection>, ProbeError> {
        let mut network = self.network.lock();
        network.fail_if(network.failures.create_peer, "create_peer")?;

        let id = Uuid::new_v4();
        let (events, events_rx) = mpsc::unbounded_channel();
        network.created = network.created.wrapping_add(1);
        let index = network.created;
        network.peers.insert(
            id,
            PeerSlot {
                index,
                events,
                policy: config.ice_transport_policy,
                local: None,
                remote_peer: None,
                state: PeerConnectionState::New,
                channels: Vec::new(),
                gathered: Vec::new(),
                remote_candidates: Vec::new(),
                bytes_sent: 0,
                bytes_received: 0,
            },
        );
        debug!(
            "Created loopback peer {} with policy {:?}",
            id, config.ice_transport_policy
        );

        Ok(Arc::new(LoopbackPeer {
            id,
            network: self.network.clone(),
            events_rx: Mutex::new(Some(events_rx)),
        }))
    }
}

/// An endpoint on a [`LoopbackTransport`]
#[derive(Debug)]
pub struct LoopbackPeer {
    id: Uuid,
    network: Arc<Mutex<Network>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl LoopbackPeer {
    /// Peer id, as carried in its descriptions
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn description(&self, sdp_type: SdpType) -> SessionDescription {
        SessionDescription {
            sdp_type,
            sdp: format!(
                "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n{}{}\r\n",
                self.id.as_u128() as u64,
                PEER_ATTRIBUTE,
                self.id
            ),
        }
    }
}

fn peer_from_description(desc: &SessionDescription) -> Result<Uuid, ProbeError> {
    desc.sdp
        .lines()
        .find_map(|line| line.strip_prefix(PEER_ATTRIBUTE))
        .and_then(|id| Uuid::parse_str(id.trim()).ok())
        .ok_or_else(|| ProbeError::transport("description does not name a loopback peer"))
}

fn candidate_line(index: u32, candidate_type: CandidateType) -> String {
    let port = 50000 + (index % 10000) as u16;
    let octet = index.wrapping_sub(1) % 254 + 1;
    match candidate_type {
        CandidateType::Host => format!(
            "candidate:1 1 udp 2122260223 192.168.1.{} {} typ host",
            octet, port
        ),
        CandidateType::Srflx | CandidateType::Prflx => format!(
            "candidate:2 1 udp 1686052607 198.51.100.{} {} typ {} raddr 192.168.1.{} rport {}",
            octet, port, candidate_type, octet, port
        ),
        CandidateType::Relay => format!(
            "candidate:3 1 udp 41885439 203.0.113.{} {} typ relay raddr 198.51.100.{} rport {}",
            octet, port, octet, port
        ),
    }
}

fn candidate_stats(
    id: String,
    candidate: &IceCandidate,
    is_remote: bool,
) -> Option<IceCandidateStats> {
    let tokens: Vec<&str> = candidate.candidate.split_whitespace().collect();
    let candidate_type = candidate.candidate_type()?;
    Some(IceCandidateStats {
        id,
        transport_id: "T01".to_string(),
        address: tokens.get(4).map(|a| a.to_string()),
        port: tokens.get(5)?.parse().ok()?,
        protocol: tokens.get(2)?.to_string(),
        candidate_type,
        priority: tokens.get(3)?.parse().ok()?,
        url: None,
        relay_protocol: (candidate_type == CandidateType::Relay).then(|| "udp".to_string()),
        is_remote,
    })
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().take()
    }

    fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, ProbeError> {
        let mut network = self.network.lock();
        network.fail_if(network.failures.create_data_channel, "create_data_channel")?;

        // Channels created after connecting would need renegotiation
        if network.peer(self.id)?.state != PeerConnectionState::New {
            return Err(ProbeError::InvalidState {
                expected: "new".to_string(),
                actual: format!("{:?}", network.peer(self.id)?.state).to_lowercase(),
            });
        }
        network.peer_mut(self.id)?.channels.push(label.to_string());
        network.channels.insert(
            (self.id, label.to_string()),
            ChannelSlot {
                state: ChannelState::Connecting,
                buffered: 0,
                last_drain: Instant::now(),
            },
        );

        Ok(Arc::new(LoopbackChannel {
            owner: self.id,
            label: label.to_string(),
            network: self.network.clone(),
        }))
    }

    async fn create_offer(&self) -> Result<SessionDescription, ProbeError> {
        let network = self.network.lock();
        network.fail_if(network.failures.create_offer, "create_offer")?;
        network.peer(self.id)?;
        Ok(self.description(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ProbeError> {
        let network = self.network.lock();
        network.fail_if(network.failures.create_answer, "create_answer")?;
        if network.peer(self.id)?.remote_peer.is_none() {
            return Err(ProbeError::InvalidState {
                expected: "have-remote-offer".to_string(),
                actual: "stable".to_string(),
            });
        }
        Ok(self.description(SdpType::Answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), ProbeError> {
        let mut network = self.network.lock();
        network.fail_if(
            network.failures.set_local_description == Some(desc.sdp_type),
            "set_local_description",
        )?;

        let types = network.profile.candidate_types.clone();
        let peer = network.peer_mut(self.id)?;
        let first_local = peer.local.is_none();
        peer.local = Some(desc);

        if first_local {
            for candidate_type in types {
                if peer.policy == IceTransportPolicy::Relay
                    && candidate_type != CandidateType::Relay
                {
                    continue;
                }
                let candidate = IceCandidate::new(candidate_line(peer.index, candidate_type));
                trace!("Peer {} gathered {}", self.id, candidate.candidate);
                peer.gathered.push(candidate.clone());
                peer.emit(PeerEvent::IceCandidate(candidate));
            }
            peer.emit(PeerEvent::IceGatheringComplete);
        }

        network.try_connect(self.id);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), ProbeError> {
        let mut network = self.network.lock();
        network.fail_if(
            network.failures.set_remote_description == Some(desc.sdp_type),
            "set_remote_description",
        )?;

        let remote = peer_from_description(&desc)?;
        network.peer(remote)?;
        let peer = network.peer_mut(self.id)?;
        peer.remote_peer = Some(remote);
        if peer.state == PeerConnectionState::New {
            peer.state = PeerConnectionState::Connecting;
            peer.emit(PeerEvent::ConnectionStateChanged(PeerConnectionState::Connecting));
        }

        network.try_connect(self.id);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), ProbeError> {
        let mut network = self.network.lock();
        network.fail_if(network.failures.add_ice_candidate, "add_ice_candidate")?;

        let peer = network.peer_mut(self.id)?;
        if peer.state == PeerConnectionState::Closed {
            return Err(ProbeError::InvalidState {
                expected: "open".to_string(),
                actual: "closed".to_string(),
            });
        }
        peer.remote_candidates.push(candidate.clone());
        network.applied.push(AppliedCandidate {
            peer_id: self.id,
            candidate,
        });
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<RtcStat>, ProbeError> {
        let network = self.network.lock();
        network.fail_if(network.failures.stats, "stats")?;
        let peer = network.peer(self.id)?;

        let mut report = Vec::new();
        let locals: Vec<IceCandidateStats> = peer
            .gathered
            .iter()
            .enumerate()
            .filter_map(|(i, c)| candidate_stats(format!("L{}", i + 1), c, false))
            .collect();
        let remotes: Vec<IceCandidateStats> = peer
            .remote_candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| candidate_stats(format!("R{}", i + 1), c, true))
            .collect();

        let pick = |candidates: &[IceCandidateStats]| {
            candidates
                .iter()
                .find(|c| c.candidate_type == CandidateType::Relay)
                .or_else(|| candidates.first())
                .map(|c| c.id.clone())
        };
        let connected = peer.state == PeerConnectionState::Connected;
        let pair = match (pick(&locals), pick(&remotes)) {
            (Some(local), Some(remote)) if connected => Some(IceCandidatePairStats {
                id: "CP1".to_string(),
                local_candidate_id: local,
                remote_candidate_id: remote,
                state: CandidatePairState::Succeeded,
                nominated: true,
                bytes_sent: peer.bytes_sent,
                bytes_received: peer.bytes_received,
                current_round_trip_time: None,
            }),
            _ => None,
        };

        report.extend(locals.into_iter().map(RtcStat::LocalCandidate));
        report.extend(remotes.into_iter().map(RtcStat::RemoteCandidate));
        report.push(RtcStat::Transport(TransportStats {
            id: "T01".to_string(),
            selected_candidate_pair_id: pair.as_ref().map(|p| p.id.clone()),
        }));
        if let Some(pair) = pair {
            report.push(RtcStat::CandidatePair(pair));
        }
        Ok(report)
    }

    fn close(&self) {
        let mut network = self.network.lock();
        let Some(peer) = network.peers.get_mut(&self.id) else {
            return;
        };
        if peer.state == PeerConnectionState::Closed {
            return;
        }
        peer.state = PeerConnectionState::Closed;
        let labels = std::mem::take(&mut peer.channels);
        peer.gathered.clear();
        peer.remote_candidates.clear();
        let remote = peer.remote_peer;

        for label in labels {
            network.channels.remove(&(self.id, label.clone()));
            if let Some(remote) = remote.and_then(|r| network.peers.get(&r)) {
                remote.emit(PeerEvent::ChannelClosed { label });
            }
        }
        debug!("Closed loopback peer {}", self.id);
    }
}

/// Sending half of a loopback data channel
#[derive(Debug)]
pub struct LoopbackChannel {
    owner: Uuid,
    label: String,
    network: Arc<Mutex<Network>>,
}

impl DataChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        self.network
            .lock()
            .channels
            .get(&(self.owner, self.label.clone()))
            .map(|slot| slot.state)
            .unwrap_or(ChannelState::Closed)
    }

    fn buffered_amount(&self) -> u64 {
        let mut network = self.network.lock();
        network.drain(Instant::now());
        network
            .channels
            .get(&(self.owner, self.label.clone()))
            .map(|slot| slot.buffered)
            .unwrap_or(0)
    }

    fn send(&self, data: Bytes) -> Result<(), ProbeError> {
        let mut network = self.network.lock();
        network.drain(Instant::now());

        let key = (self.owner, self.label.clone());
        // Slots are removed when their peer closes
        let Some(slot) = network.channels.get_mut(&key) else {
            return Err(ProbeError::InvalidState {
                expected: "open".to_string(),
                actual: "closed".to_string(),
            });
        };
        if slot.state != ChannelState::Open {
            return Err(ProbeError::InvalidState {
                expected: "open".to_string(),
                actual: format!("{:?}", slot.state).to_lowercase(),
            });
        }

        let len = data.len() as u64;
        slot.buffered += len;
        if network.profile.rate_bytes_per_ms == Some(0) {
            return Ok(());
        }

        let remote = network.peer(self.owner)?.remote_peer;
        network.peer_mut(self.owner)?.bytes_sent += len;
        if let Some(remote) = remote.and_then(|r| network.peers.get_mut(&r)) {
            remote.bytes_received += len;
            remote.emit(PeerEvent::Message {
                label: self.label.clone(),
                data,
            });
        }
        Ok(())
    }

    fn close(&self) {
        let mut network = self.network.lock();
        if let Some(slot) = network.channels.get_mut(&(self.owner, self.label.clone())) {
            slot.state = ChannelState::Closed;
        }
    }
}
