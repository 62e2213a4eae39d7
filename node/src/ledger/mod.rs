//! The ledger facade: every interaction with the coordinating ledger goes
//! through [`LedgerClient`]. The node core never sees signing, ABI encoding
//! or nonce management; a mutating call either commits on the ledger or
//! fails with an error that unambiguously means "not applied".

mod events;
mod rpc;

pub use events::LedgerEvent;
pub use rpc::{JsonRpcLedger, LedgerRpcConfig};

use async_trait::async_trait;
use primitive_types::U256;
use serde::Deserialize;
use thiserror::Error;

use lumino_common::crypto::{Commitment, Secret};
use lumino_common::epoch::EpochState;
use lumino_common::job::Job;

/// Failure modes of facade calls. All three variants mean the same thing to
/// callers of mutations: the action was not applied; log, skip, continue.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger rejected or reverted the call.
    #[error("contract error: {0}")]
    Contract(String),

    /// The call never reached the ledger (connection, timeout, HTTP).
    #[error("ledger transport error: {0}")]
    Transport(String),

    /// The ledger answered with something we could not interpret.
    #[error("malformed ledger response: {0}")]
    Decode(String),
}

/// On-ledger record of a registered node, keyed by node id.
#[derive(Clone, Debug, Deserialize)]
pub struct NodeInfo {
    pub owner: String,
    pub compute_rating: u64,
}

/// Receipt of a mutating call, carrying the events it emitted.
#[derive(Clone, Debug, Default)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub events: Vec<LedgerEvent>,
}

impl TxReceipt {
    /// The node id announced by a `NodeRegistered` event, if the receipt
    /// carries one.
    pub fn registered_node_id(&self) -> Option<u64> {
        self.events.iter().find_map(|event| match event {
            LedgerEvent::NodeRegistered { node_id } => Some(*node_id),
            _ => None,
        })
    }
}

/// Typed, synchronous-in-spirit operations against the coordinating ledger.
///
/// Implementations must guarantee that every mutation either commits or
/// raises; there is no third outcome for the core to reason about.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// The signer address this client submits from.
    fn address(&self) -> &str;

    // Reads
    async fn get_stake_balance(&self, address: &str) -> Result<U256, LedgerError>;
    async fn get_token_balance(&self, address: &str) -> Result<U256, LedgerError>;
    async fn get_current_epoch(&self) -> Result<u64, LedgerError>;
    async fn get_epoch_state(&self) -> Result<EpochState, LedgerError>;
    async fn get_current_leader(&self) -> Result<u64, LedgerError>;
    async fn get_jobs_by_node(&self, node_id: u64) -> Result<Vec<Job>, LedgerError>;
    async fn get_node_info(&self, node_id: u64) -> Result<NodeInfo, LedgerError>;

    // Mutations
    async fn approve_token_spending(&self, spender: &str, amount: U256)
        -> Result<(), LedgerError>;
    async fn deposit_stake(&self, amount: U256) -> Result<(), LedgerError>;
    async fn register_node(&self, compute_rating: u64) -> Result<TxReceipt, LedgerError>;
    async fn submit_commitment(
        &self,
        node_id: u64,
        commitment: &Commitment,
    ) -> Result<(), LedgerError>;
    async fn reveal_secret(&self, node_id: u64, secret: &Secret) -> Result<(), LedgerError>;
    async fn elect_leader(&self) -> Result<(), LedgerError>;
    async fn start_assignment_round(&self) -> Result<(), LedgerError>;
    async fn confirm_job(&self, job_id: u64) -> Result<(), LedgerError>;
    async fn set_token_count_for_job(&self, job_id: u64, count: u64) -> Result<(), LedgerError>;
    async fn complete_job(&self, job_id: u64) -> Result<(), LedgerError>;
    async fn fail_job(&self, job_id: u64, reason: &str) -> Result<(), LedgerError>;
    async fn process_job_payment(&self, job_id: u64) -> Result<(), LedgerError>;
    async fn process_incentives(&self) -> Result<(), LedgerError>;

    // Event stream
    async fn setup_event_filters(&self) -> Result<(), LedgerError>;

    /// Drain decoded events accumulated since the last call into the log.
    /// Best effort; returns the number of events drained.
    async fn process_events(&self) -> Result<usize, LedgerError>;
}
