//! Sender-side pump keeping the data channel full

use crate::config::constants::{MAX_PACKETS_PER_TICK, PACKET_SIZE};
use bitprobe_core::{ChannelState, DataChannel, ProbeError};
use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

/// Sends fixed-size filler packets until the channel's buffered amount
/// reaches the high watermark, at most `max_packets` per call to [`pump`].
///
/// [`pump`]: ChannelSaturator::pump
pub struct ChannelSaturator {
    channel: Arc<dyn DataChannel>,
    packet: Bytes,
    max_packets: usize,
    high_watermark: u64,
    packets_sent: u64,
}

impl std::fmt::Debug for ChannelSaturator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSaturator")
            .field("channel", &self.channel.label())
            .field("packet_size", &self.packet.len())
            .field("max_packets", &self.max_packets)
            .field("high_watermark", &self.high_watermark)
            .field("packets_sent", &self.packets_sent)
            .finish()
    }
}

impl ChannelSaturator {
    /// Saturator with the standard 1024-byte packets, 100 per tick
    pub fn new(channel: Arc<dyn DataChannel>) -> Self {
        Self::with_limits(channel, PACKET_SIZE, MAX_PACKETS_PER_TICK)
    }

    /// Saturator with custom packet size and per-tick cap.
    ///
    /// The watermark is always `packet_size * max_packets`.
    pub fn with_limits(
        channel: Arc<dyn DataChannel>,
        packet_size: usize,
        max_packets: usize,
    ) -> Self {
        Self {
            channel,
            packet: Bytes::from(vec![0u8; packet_size]),
            max_packets,
            high_watermark: (packet_size * max_packets) as u64,
            packets_sent: 0,
        }
    }

    /// Buffered amount at which a pump stops
    pub fn high_watermark(&self) -> u64 {
        self.high_watermark
    }

    /// Packets sent over the saturator's lifetime
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Run one tick; returns how many packets were queued
    pub fn pump(&mut self) -> Result<usize, ProbeError> {
        if self.channel.ready_state() != ChannelState::Open {
            return Ok(0);
        }

        let mut sent = 0;
        while sent < self.max_packets && self.channel.buffered_amount() < self.high_watermark {
            self.channel.send(self.packet.clone())?;
            sent += 1;
        }

        self.packets_sent += sent as u64;
        trace!(
            "Pumped {} packets, buffered {}",
            sent,
            self.channel.buffered_amount()
        );
        Ok(sent)
    }
}
