//! Tests for the loopback transport
//!
//! These exercise the transport capability the probe engine consumes: the
//! offer/answer flow, candidate gathering under each policy, the simulated
//! link's buffered amount, and failure injection.

use bitprobe_core::*;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

fn peer_config(policy: IceTransportPolicy) -> PeerConfig {
    PeerConfig {
        ice_servers: vec![IceServer::turn("turn:turn.example.com:3478", "user", "pass")],
        ice_transport_policy: policy,
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> Vec<PeerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn connect(
    sender: &Arc<dyn PeerConnection>,
    receiver: &Arc<dyn PeerConnection>,
) -> Result<(), ProbeError> {
    let offer = sender.create_offer().await?;
    sender.set_local_description(offer.clone()).await?;
    receiver.set_remote_description(offer).await?;
    let answer = receiver.create_answer().await?;
    receiver.set_local_description(answer.clone()).await?;
    sender.set_remote_description(answer).await?;
    Ok(())
}

#[tokio::test]
async fn test_offer_answer_connects_and_opens_channel() {
    let transport = LoopbackTransport::new(LinkProfile::default());
    let sender = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let receiver = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let mut sender_events = sender.take_events().unwrap();
    let mut receiver_events = receiver.take_events().unwrap();
    assert!(sender.take_events().is_none());

    let channel = sender.create_data_channel("sender").unwrap();
    assert_eq!(channel.ready_state(), ChannelState::Connecting);

    assert_ok!(connect(&sender, &receiver).await);
    assert_eq!(channel.ready_state(), ChannelState::Open);

    let sender_events = drain(&mut sender_events);
    assert!(sender_events
        .iter()
        .any(|e| matches!(e, PeerEvent::ChannelOpened { label } if label == "sender")));
    assert!(sender_events.iter().any(|e| matches!(
        e,
        PeerEvent::ConnectionStateChanged(PeerConnectionState::Connected)
    )));

    assert_ok!(channel.send(Bytes::from_static(b"hello")));
    let receiver_events = drain(&mut receiver_events);
    let received: Vec<&Bytes> = receiver_events
        .iter()
        .filter_map(|e| match e {
            PeerEvent::Message { data, .. } => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(received, vec![&Bytes::from_static(b"hello")]);
}

#[tokio::test]
async fn test_relay_policy_gathers_only_relay_candidates() {
    let transport = LoopbackTransport::new(LinkProfile::default());
    let all = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let relay_only = transport.create_peer(&peer_config(IceTransportPolicy::Relay)).unwrap();
    let mut all_events = all.take_events().unwrap();
    let mut relay_events = relay_only.take_events().unwrap();

    connect(&all, &relay_only).await.unwrap();

    let gathered = |events: Vec<PeerEvent>| -> Vec<CandidateType> {
        events
            .into_iter()
            .filter_map(|e| match e {
                PeerEvent::IceCandidate(c) => c.candidate_type(),
                _ => None,
            })
            .collect()
    };

    assert_eq!(
        gathered(drain(&mut all_events)),
        vec![CandidateType::Host, CandidateType::Srflx, CandidateType::Relay]
    );
    assert_eq!(gathered(drain(&mut relay_events)), vec![CandidateType::Relay]);
}

#[tokio::test(start_paused = true)]
async fn test_buffered_amount_drains_at_link_rate() {
    // 1024 kbps drains 128 bytes per millisecond
    let transport = LoopbackTransport::new(LinkProfile::kbps(1024));
    let sender = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let receiver = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let channel = sender.create_data_channel("sender").unwrap();
    connect(&sender, &receiver).await.unwrap();

    for _ in 0..4 {
        channel.send(Bytes::from(vec![0u8; 1024])).unwrap();
    }
    assert_eq!(channel.buffered_amount(), 4096);

    tokio::time::advance(Duration::from_millis(10)).await;
    assert_eq!(channel.buffered_amount(), 4096 - 1280);

    transport.set_link_rate(None);
    assert_eq!(channel.buffered_amount(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_drain_keeps_sub_millisecond_remainders() {
    // 800 kbps drains 100 bytes per millisecond
    let transport = LoopbackTransport::new(LinkProfile::kbps(800));
    let sender = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let receiver = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let channel = sender.create_data_channel("sender").unwrap();
    connect(&sender, &receiver).await.unwrap();

    channel.send(Bytes::from(vec![0u8; 10_000])).unwrap();
    for _ in 0..10 {
        tokio::time::advance(Duration::from_micros(500)).await;
        channel.buffered_amount();
    }
    assert_eq!(channel.buffered_amount(), 9_500);

    tokio::time::advance(Duration::from_micros(1500)).await;
    assert_eq!(channel.buffered_amount(), 9_400);
    tokio::time::advance(Duration::from_micros(500)).await;
    assert_eq!(channel.buffered_amount(), 9_300);
}

#[tokio::test]
async fn test_many_peers_on_one_transport() {
    let transport = LoopbackTransport::new(LinkProfile::default());
    for _ in 0..300 {
        assert_ok!(transport.create_peer(&peer_config(IceTransportPolicy::Relay)));
    }
    assert_eq!(transport.peer_ids().len(), 300);

    let sender = transport.create_peer(&peer_config(IceTransportPolicy::Relay)).unwrap();
    let receiver = transport.create_peer(&peer_config(IceTransportPolicy::Relay)).unwrap();
    let mut sender_events = sender.take_events().unwrap();
    assert_ok!(connect(&sender, &receiver).await);

    let relay: Vec<IceCandidate> = drain(&mut sender_events)
        .into_iter()
        .filter_map(|e| match e {
            PeerEvent::IceCandidate(c) => Some(c),
            _ => None,
        })
        .collect();
    assert_eq!(relay.len(), 1);
    assert_eq!(relay[0].candidate_type(), Some(CandidateType::Relay));
    assert_eq!(transport.peer_ids().len(), 302);
}

#[tokio::test]
async fn test_black_hole_never_delivers() {
    let transport = LoopbackTransport::new(LinkProfile::black_hole());
    let sender = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let receiver = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let mut receiver_events = receiver.take_events().unwrap();
    let channel = sender.create_data_channel("sender").unwrap();
    connect(&sender, &receiver).await.unwrap();

    channel.send(Bytes::from(vec![0u8; 512])).unwrap();
    assert_eq!(channel.buffered_amount(), 512);
    assert!(!drain(&mut receiver_events)
        .iter()
        .any(|e| matches!(e, PeerEvent::Message { .. })));
}

#[tokio::test]
async fn test_failure_plan_rejects_operations() {
    let transport = LoopbackTransport::new(LinkProfile::default()).with_failures(FailurePlan {
        create_offer: true,
        add_ice_candidate: true,
        ..FailurePlan::default()
    });
    let peer = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();

    let err = assert_err!(peer.create_offer().await);
    assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    assert_err!(
        peer.add_ice_candidate(IceCandidate::new(
            "candidate:3 1 udp 41885439 203.0.113.9 50009 typ relay raddr 0.0.0.0 rport 0"
        ))
        .await
    );
    assert!(transport.applied_candidates().is_empty());

    let failing = LoopbackTransport::new(LinkProfile::default()).with_failures(FailurePlan {
        create_peer: true,
        ..FailurePlan::default()
    });
    assert!(failing
        .create_peer(&peer_config(IceTransportPolicy::All))
        .is_err());
}

#[tokio::test]
async fn test_send_before_open_is_rejected() {
    let transport = LoopbackTransport::new(LinkProfile::default());
    let sender = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let channel = sender.create_data_channel("sender").unwrap();

    match channel.send(Bytes::from_static(b"early")) {
        Err(ProbeError::InvalidState { actual, .. }) => assert_eq!(actual, "connecting"),
        other => panic!("Expected InvalidState, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stats_report_names_selected_relay_pair() {
    let transport = LoopbackTransport::new(LinkProfile::default());
    let sender = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let receiver = transport.create_peer(&peer_config(IceTransportPolicy::Relay)).unwrap();
    let mut sender_events = sender.take_events().unwrap();
    connect(&sender, &receiver).await.unwrap();

    for event in drain(&mut sender_events) {
        if let PeerEvent::IceCandidate(candidate) = event {
            if candidate.is_relay() {
                receiver.add_ice_candidate(candidate).await.unwrap();
            }
        }
    }

    let snapshot = resolve_ice_stats(receiver.as_ref()).await.unwrap();
    assert_eq!(snapshot.ice_candidate_stats.len(), 2);
    let selected = snapshot.selected_ice_candidate_pair_stats.unwrap();
    assert_eq!(selected.local_candidate.candidate_type, CandidateType::Relay);
    assert_eq!(selected.remote_candidate.candidate_type, CandidateType::Relay);
    assert!(selected.remote_candidate.is_remote);
    assert_eq!(selected.local_candidate.relay_protocol.as_deref(), Some("udp"));

    assert_eq!(transport.applied_candidates().len(), 1);
}

#[tokio::test]
async fn test_close_notifies_remote_and_frees_channel() {
    let transport = LoopbackTransport::new(LinkProfile::black_hole());
    let sender = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let receiver = transport.create_peer(&peer_config(IceTransportPolicy::All)).unwrap();
    let mut receiver_events = receiver.take_events().unwrap();
    let channel = sender.create_data_channel("sender").unwrap();
    connect(&sender, &receiver).await.unwrap();
    drain(&mut receiver_events);

    channel.send(Bytes::from(vec![0u8; 512])).unwrap();
    assert_eq!(channel.buffered_amount(), 512);

    sender.close();
    sender.close();

    assert_eq!(channel.ready_state(), ChannelState::Closed);
    assert_eq!(channel.buffered_amount(), 0);
    match channel.send(Bytes::from_static(b"late")) {
        Err(ProbeError::InvalidState { actual, .. }) => assert_eq!(actual, "closed"),
        other => panic!("Expected InvalidState, got {:?}", other),
    }
    let closed: Vec<PeerEvent> = drain(&mut receiver_events);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].event_type(), "channel_closed");

    let ids = transport.peer_ids();
    assert_eq!(transport.peer_state(ids[0]), Some(PeerConnectionState::Closed));
    assert_eq!(transport.peer_state(ids[1]), Some(PeerConnectionState::Connected));
}
