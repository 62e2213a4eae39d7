use log::info;
use primitive_types::U256;
use serde::Deserialize;
use serde_json::Value;

use lumino_common::units;

/// Decoded ledger events. The gateway tags each event object with its name;
/// anything we do not model explicitly still reaches the log through
/// [`LedgerEvent::Unknown`].
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "event")]
pub enum LedgerEvent {
    NodeRegistered {
        #[serde(rename = "nodeId")]
        node_id: u64,
    },
    JobAssigned {
        #[serde(rename = "jobId")]
        job_id: u64,
        #[serde(rename = "nodeId")]
        node_id: u64,
    },
    JobStatusChanged {
        #[serde(rename = "jobId")]
        job_id: u64,
        status: u8,
    },
    LeaderElected {
        #[serde(rename = "nodeId")]
        node_id: u64,
        epoch: u64,
    },
    PenaltyApplied {
        #[serde(rename = "nodeId")]
        node_id: u64,
        amount: U256,
        reason: String,
    },
    RewardDistributed {
        #[serde(rename = "nodeId")]
        node_id: u64,
        amount: U256,
    },
    #[serde(other)]
    Unknown,
}

impl LedgerEvent {
    /// Decode one event object; undecodable payloads surface as `Unknown`
    /// rather than poisoning the drain.
    pub fn decode(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(Self::Unknown)
    }

    /// Write the event to the log sink. The event stream has no consumer
    /// beyond the operator's log.
    pub fn log(&self) {
        match self {
            Self::NodeRegistered { node_id } => {
                info!("Event: node {node_id} registered");
            }
            Self::JobAssigned { job_id, node_id } => {
                info!("Event: job {job_id} assigned to node {node_id}");
            }
            Self::JobStatusChanged { job_id, status } => {
                info!("Event: job {job_id} moved to status {status}");
            }
            Self::LeaderElected { node_id, epoch } => {
                info!("Event: node {node_id} elected leader for epoch {epoch}");
            }
            Self::PenaltyApplied {
                node_id,
                amount,
                reason,
            } => {
                info!(
                    "Event: node {node_id} penalized {} LUM ({reason})",
                    units::format_tokens(*amount)
                );
            }
            Self::RewardDistributed { node_id, amount } => {
                info!(
                    "Event: node {node_id} rewarded {} LUM",
                    units::format_tokens(*amount)
                );
            }
            Self::Unknown => {
                info!("Event: unrecognized ledger event");
            }
        }
    }
}
