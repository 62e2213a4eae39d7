#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use primitive_types::U256;

use lumino_common::crypto::{Commitment, Secret};
use lumino_common::epoch::{EpochPhase, EpochState};
use lumino_common::job::{Job, JobStatus};
use lumino_node::config::{ContractAddresses, NodeConfig};
use lumino_node::ledger::{LedgerClient, LedgerError, LedgerEvent, NodeInfo, TxReceipt};

pub const NODE_ADDRESS: &str = "0x00000000000000000000000000000000000000cafe";

/// Scripted stand-in for the ledger gateway. Epoch states are served from a
/// queue (the last one repeats once drained) and every leader-visible or
/// mutating call is recorded in order for the tests to assert on.
pub struct MockLedger {
    address: String,
    calls: Mutex<Vec<String>>,
    schedule: Mutex<VecDeque<EpochState>>,
    last_state: Mutex<Option<EpochState>>,
    jobs: Mutex<Vec<Job>>,
    leader: AtomicU64,
    stake_balance: Mutex<U256>,
    next_node_id: AtomicU64,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            address: NODE_ADDRESS.to_string(),
            calls: Mutex::new(Vec::new()),
            schedule: Mutex::new(VecDeque::new()),
            last_state: Mutex::new(None),
            jobs: Mutex::new(Vec::new()),
            leader: AtomicU64::new(0),
            stake_balance: Mutex::new(U256::zero()),
            next_node_id: AtomicU64::new(1),
        }
    }

    /// Queue one epoch state per phase, two seconds left in each.
    pub fn with_schedule(phases: impl IntoIterator<Item = EpochPhase>) -> Self {
        let ledger = Self::new();
        {
            let mut schedule = ledger.schedule.lock().unwrap();
            for phase in phases {
                schedule.push_back(EpochState::new(phase, Duration::from_secs(2)));
            }
        }
        ledger
    }

    pub fn set_leader(&self, node_id: u64) {
        self.leader.store(node_id, Ordering::SeqCst);
    }

    pub fn push_job(&self, job: Job) {
        self.jobs.lock().unwrap().push(job);
    }

    pub fn job_status(&self, job_id: u64) -> Option<JobStatus> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|job| job.id == job_id)
            .map(|job| job.status)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls recorded after registration, i.e. the protocol-loop traffic.
    pub fn calls_after_registration(&self) -> Vec<String> {
        let calls = self.calls();
        match calls.iter().position(|call| call.starts_with("register_node")) {
            Some(index) => calls[index + 1..].to_vec(),
            None => calls,
        }
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn set_job_status(&self, job_id: u64, status: JobStatus) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) {
            job.status = status;
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get_stake_balance(&self, _address: &str) -> Result<U256, LedgerError> {
        Ok(*self.stake_balance.lock().unwrap())
    }

    async fn get_token_balance(&self, _address: &str) -> Result<U256, LedgerError> {
        Ok(U256::from(500u64) * U256::exp10(18))
    }

    async fn get_current_epoch(&self) -> Result<u64, LedgerError> {
        Ok(1)
    }

    async fn get_epoch_state(&self) -> Result<EpochState, LedgerError> {
        let mut schedule = self.schedule.lock().unwrap();
        let mut last_state = self.last_state.lock().unwrap();
        if let Some(state) = schedule.pop_front() {
            *last_state = Some(state);
        }
        last_state.ok_or_else(|| LedgerError::Transport("no scheduled epoch state".into()))
    }

    async fn get_current_leader(&self) -> Result<u64, LedgerError> {
        self.record("get_current_leader".into());
        Ok(self.leader.load(Ordering::SeqCst))
    }

    async fn get_jobs_by_node(&self, _node_id: u64) -> Result<Vec<Job>, LedgerError> {
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn get_node_info(&self, _node_id: u64) -> Result<NodeInfo, LedgerError> {
        Ok(NodeInfo {
            owner: self.address.clone(),
            compute_rating: 10,
        })
    }

    async fn approve_token_spending(
        &self,
        spender: &str,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.record(format!("approve_token_spending({spender}, {amount})"));
        Ok(())
    }

    async fn deposit_stake(&self, amount: U256) -> Result<(), LedgerError> {
        self.record(format!("deposit_stake({amount})"));
        *self.stake_balance.lock().unwrap() += amount;
        Ok(())
    }

    async fn register_node(&self, compute_rating: u64) -> Result<TxReceipt, LedgerError> {
        self.record(format!("register_node({compute_rating})"));
        let node_id = self.next_node_id.fetch_add(1, Ordering::SeqCst);
        Ok(TxReceipt {
            tx_hash: format!("0x{node_id:064x}"),
            events: vec![LedgerEvent::NodeRegistered { node_id }],
        })
    }

    async fn submit_commitment(
        &self,
        node_id: u64,
        _commitment: &Commitment,
    ) -> Result<(), LedgerError> {
        self.record(format!("submit_commitment({node_id})"));
        Ok(())
    }

    async fn reveal_secret(&self, node_id: u64, _secret: &Secret) -> Result<(), LedgerError> {
        self.record(format!("reveal_secret({node_id})"));
        Ok(())
    }

    async fn elect_leader(&self) -> Result<(), LedgerError> {
        self.record("elect_leader".into());
        Ok(())
    }

    async fn start_assignment_round(&self) -> Result<(), LedgerError> {
        self.record("start_assignment_round".into());
        Ok(())
    }

    async fn confirm_job(&self, job_id: u64) -> Result<(), LedgerError> {
        self.record(format!("confirm_job({job_id})"));
        self.set_job_status(job_id, JobStatus::Confirmed);
        Ok(())
    }

    async fn set_token_count_for_job(&self, job_id: u64, count: u64) -> Result<(), LedgerError> {
        self.record(format!("set_token_count_for_job({job_id}, {count})"));
        Ok(())
    }

    async fn complete_job(&self, job_id: u64) -> Result<(), LedgerError> {
        self.record(format!("complete_job({job_id})"));
        self.set_job_status(job_id, JobStatus::Complete);
        Ok(())
    }

    async fn fail_job(&self, job_id: u64, reason: &str) -> Result<(), LedgerError> {
        self.record(format!("fail_job({job_id}, {reason})"));
        self.set_job_status(job_id, JobStatus::Failed);
        Ok(())
    }

    async fn process_job_payment(&self, job_id: u64) -> Result<(), LedgerError> {
        self.record(format!("process_job_payment({job_id})"));
        Ok(())
    }

    async fn process_incentives(&self) -> Result<(), LedgerError> {
        self.record("process_incentives".into());
        Ok(())
    }

    async fn setup_event_filters(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    async fn process_events(&self) -> Result<usize, LedgerError> {
        Ok(0)
    }
}

/// A full epoch as the node observes it, starting from the DISPUTE that
/// arms `can_begin`.
pub fn one_epoch_schedule() -> Vec<EpochPhase> {
    vec![
        EpochPhase::Dispute,
        EpochPhase::Commit,
        EpochPhase::Reveal,
        EpochPhase::Elect,
        EpochPhase::Execute,
        EpochPhase::Confirm,
        EpochPhase::Dispute,
    ]
}

pub fn test_config(data_dir: &Path, test_mode: &str, pipeline_root: Option<PathBuf>) -> NodeConfig {
    NodeConfig {
        rpc_url: "http://localhost:8545".to_string(),
        private_key: "test-key".to_string(),
        contracts: ContractAddresses {
            token: "0x1000000000000000000000000000000000000001".to_string(),
            access_manager: "0x1000000000000000000000000000000000000002".to_string(),
            whitelist_manager: "0x1000000000000000000000000000000000000003".to_string(),
            node_manager: "0x1000000000000000000000000000000000000004".to_string(),
            incentive_manager: "0x1000000000000000000000000000000000000005".to_string(),
            node_escrow: "0x1000000000000000000000000000000000000006".to_string(),
            leader_manager: "0x1000000000000000000000000000000000000007".to_string(),
            job_manager: "0x1000000000000000000000000000000000000008".to_string(),
            epoch_manager: "0x1000000000000000000000000000000000000009".to_string(),
            job_escrow: "0x100000000000000000000000000000000000000a".to_string(),
        },
        contracts_dir: PathBuf::from("../contracts/src"),
        data_dir: data_dir.to_path_buf(),
        pipeline_root,
        compute_rating: 10,
        test_mode: Some(test_mode.parse().expect("valid test mode")),
    }
}

pub fn assigned_job(id: u64, submitter: &str, args: &str) -> Job {
    Job {
        id,
        status: JobStatus::Assigned,
        base_model_name: "llm_llama3_1_8b".to_string(),
        args: args.to_string(),
        submitter: submitter.to_string(),
    }
}
