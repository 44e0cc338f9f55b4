//! Sender/receiver endpoints and relay-only candidate forwarding

use bitprobe_core::{
    IceCandidate, IceServer, IceTransportPolicy, PeerConfig, PeerConnection, PeerEvent,
    PeerTransport, ProbeError,
};
use futures::future::BoxFuture;
use std::fmt;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Which side of the pair an endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Creates the channel and pumps data into it
    Sender,
    /// Counts the bytes arriving on the channel
    Receiver,
}

impl Role {
    /// The opposite role
    pub fn peer(&self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Receiver => f.write_str("receiver"),
        }
    }
}

/// One side of the pair
pub struct Endpoint {
    role: Role,
    connection: Arc<dyn PeerConnection>,
    events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("listening", &self.events.is_some())
            .finish()
    }
}

impl Endpoint {
    fn open(
        transport: &dyn PeerTransport,
        role: Role,
        config: &PeerConfig,
    ) -> Result<Self, ProbeError> {
        let connection = transport.create_peer(config)?;
        let events = connection
            .take_events()
            .ok_or_else(|| ProbeError::Initialization {
                reason: format!("{} endpoint events already taken", role),
            })?;
        debug!(
            "Opened {} endpoint with policy {:?}",
            role, config.ice_transport_policy
        );
        Ok(Self {
            role,
            connection,
            events: Some(events),
        })
    }

    /// Role of this endpoint
    pub fn role(&self) -> Role {
        self.role
    }

    /// Underlying connection
    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }
}

async fn recv(events: &mut Option<mpsc::UnboundedReceiver<PeerEvent>>) -> Option<PeerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

/// The two endpoints of a probe.
///
/// Only candidates whose type is `relay` ever cross from one endpoint to the
/// other, so the measured path always runs through a relay server.
#[derive(Debug)]
pub struct TransportPair {
    sender: Endpoint,
    receiver: Endpoint,
    dropped_candidates: usize,
}

impl TransportPair {
    /// Create both endpoints. The sender gathers with every candidate type;
    /// the receiver uses `receiver_policy`.
    pub fn open(
        transport: &dyn PeerTransport,
        ice_servers: &[IceServer],
        receiver_policy: IceTransportPolicy,
    ) -> Result<Self, ProbeError> {
        let sender = Endpoint::open(
            transport,
            Role::Sender,
            &PeerConfig {
                ice_servers: ice_servers.to_vec(),
                ice_transport_policy: IceTransportPolicy::All,
            },
        )?;
        let receiver = Endpoint::open(
            transport,
            Role::Receiver,
            &PeerConfig {
                ice_servers: ice_servers.to_vec(),
                ice_transport_policy: receiver_policy,
            },
        )?;

        Ok(Self {
            sender,
            receiver,
            dropped_candidates: 0,
        })
    }

    /// Endpoint playing `role`
    pub fn endpoint(&self, role: Role) -> &Endpoint {
        match role {
            Role::Sender => &self.sender,
            Role::Receiver => &self.receiver,
        }
    }

    fn endpoint_mut(&mut self, role: Role) -> &mut Endpoint {
        match role {
            Role::Sender => &mut self.sender,
            Role::Receiver => &mut self.receiver,
        }
    }

    /// Connection of the endpoint playing `role`
    pub fn connection(&self, role: Role) -> &Arc<dyn PeerConnection> {
        &self.endpoint(role).connection
    }

    /// Non-relay candidates discarded so far
    pub fn dropped_candidates(&self) -> usize {
        self.dropped_candidates
    }

    /// Prepare delivery of a candidate gathered by `from` to the other
    /// endpoint. Returns `None` when the candidate is not a relay candidate.
    pub fn forward_candidate(
        &mut self,
        from: Role,
        candidate: IceCandidate,
    ) -> Option<BoxFuture<'static, Result<(), ProbeError>>> {
        if !candidate.is_relay() {
            self.dropped_candidates += 1;
            trace!("Dropping non-relay candidate from {}: {}", from, candidate.candidate);
            return None;
        }

        trace!("Forwarding relay candidate from {}: {}", from, candidate.candidate);
        let target = self.connection(from.peer()).clone();
        Some(Box::pin(async move { target.add_ice_candidate(candidate).await }))
    }

    /// Next event from either endpoint, sender first when both are ready.
    /// Returns `None` once both event streams have ended.
    pub async fn next_event(&mut self) -> Option<(Role, PeerEvent)> {
        loop {
            if self.sender.events.is_none() && self.receiver.events.is_none() {
                return None;
            }

            let (role, event) = tokio::select! {
                biased;
                event = recv(&mut self.sender.events) => (Role::Sender, event),
                event = recv(&mut self.receiver.events) => (Role::Receiver, event),
            };

            match event {
                Some(event) => return Some((role, event)),
                None => {
                    debug!("{} endpoint event stream ended", role);
                    self.endpoint_mut(role).events = None;
                }
            }
        }
    }

    /// Close both endpoints
    pub fn close(&self) {
        self.sender.connection.close();
        self.receiver.connection.close();
        debug!("Closed transport pair");
    }
}
