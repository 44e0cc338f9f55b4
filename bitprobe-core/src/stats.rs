//! Raw connection statistics and the ICE snapshot attached to reports
//!
//! A [`PeerConnection`](crate::PeerConnection) hands back a flat list of
//! [`RtcStat`] entries. [`IceStatsSnapshot::from_report`] picks out the
//! gathered candidates and the candidate pair actually carrying traffic.

use crate::error::ProbeError;
use crate::transport::{CandidateType, PeerConnection};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Statistics for one local or remote candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateStats {
    /// Stats object id
    pub id: String,
    /// Transport the candidate belongs to
    pub transport_id: String,
    /// Candidate IP address, if not redacted
    pub address: Option<String>,
    /// Candidate port
    pub port: u16,
    /// `udp` or `tcp`
    pub protocol: String,
    /// Candidate type
    pub candidate_type: CandidateType,
    /// Candidate priority
    pub priority: u32,
    /// Server the candidate was gathered through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Protocol spoken to the TURN server, relay candidates only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_protocol: Option<String>,
    /// Whether this candidate was gathered by the remote endpoint
    pub is_remote: bool,
}

/// Candidate pair check state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidatePairState {
    /// Not yet checked
    Frozen,
    /// Waiting to be checked
    Waiting,
    /// Check in flight
    InProgress,
    /// Check failed
    Failed,
    /// Check succeeded
    Succeeded,
}

/// Statistics for one candidate pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePairStats {
    /// Stats object id
    pub id: String,
    /// Local candidate stats id
    pub local_candidate_id: String,
    /// Remote candidate stats id
    pub remote_candidate_id: String,
    /// Check state
    pub state: CandidatePairState,
    /// Whether the pair was nominated
    pub nominated: bool,
    /// Payload bytes sent over the pair
    pub bytes_sent: u64,
    /// Payload bytes received over the pair
    pub bytes_received: u64,
    /// Latest round trip time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round_trip_time: Option<f64>,
}

/// Statistics for the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStats {
    /// Stats object id
    pub id: String,
    /// Pair currently used by the transport
    #[serde(default)]
    pub selected_candidate_pair_id: Option<String>,
}

/// One entry of a raw statistics report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RtcStat {
    /// Candidate gathered locally
    LocalCandidate(IceCandidateStats),
    /// Candidate gathered by the remote endpoint
    RemoteCandidate(IceCandidateStats),
    /// Candidate pair
    CandidatePair(IceCandidatePairStats),
    /// Transport
    Transport(TransportStats),
}

/// The candidates of the pair carrying traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedIceCandidatePair {
    /// Local side of the pair
    pub local_candidate: IceCandidateStats,
    /// Remote side of the pair
    pub remote_candidate: IceCandidateStats,
}

/// Candidate statistics attached to a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceStatsSnapshot {
    /// Every local and remote candidate in the report
    pub ice_candidate_stats: Vec<IceCandidateStats>,
    /// Selected pair, when one could be identified
    pub selected_ice_candidate_pair_stats: Option<SelectedIceCandidatePair>,
}

impl IceStatsSnapshot {
    /// Build a snapshot from a raw report.
    ///
    /// The selected pair is the one named by a transport entry; if no
    /// transport names one, the first nominated pair that succeeded is used.
    pub fn from_report(report: &[RtcStat]) -> Self {
        let candidates: Vec<&IceCandidateStats> = report
            .iter()
            .filter_map(|stat| match stat {
                RtcStat::LocalCandidate(c) | RtcStat::RemoteCandidate(c) => Some(c),
                _ => None,
            })
            .collect();

        let pairs = || {
            report.iter().filter_map(|stat| match stat {
                RtcStat::CandidatePair(p) => Some(p),
                _ => None,
            })
        };

        let selected_pair_id = report.iter().find_map(|stat| match stat {
            RtcStat::Transport(t) => t.selected_candidate_pair_id.as_deref(),
            _ => None,
        });

        let pair = match selected_pair_id {
            Some(id) => pairs().find(|p| p.id == id),
            None => pairs().find(|p| p.nominated && p.state == CandidatePairState::Succeeded),
        };

        let find = |id: &str| candidates.iter().find(|c| c.id == id).map(|c| (*c).clone());
        let selected = pair.and_then(|p| {
            Some(SelectedIceCandidatePair {
                local_candidate: find(&p.local_candidate_id)?,
                remote_candidate: find(&p.remote_candidate_id)?,
            })
        });

        Self {
            ice_candidate_stats: candidates.into_iter().cloned().collect(),
            selected_ice_candidate_pair_stats: selected,
        }
    }
}

/// Fetch a connection's report and reduce it to a snapshot
pub async fn resolve_ice_stats(peer: &dyn PeerConnection) -> Result<IceStatsSnapshot, ProbeError> {
    let report = peer.stats().await?;
    let snapshot = IceStatsSnapshot::from_report(&report);
    debug!(
        "Resolved {} candidates, selected pair present: {}",
        snapshot.ice_candidate_stats.len(),
        snapshot.selected_ice_candidate_pair_stats.is_some()
    );
    Ok(snapshot)
}
