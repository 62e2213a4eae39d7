use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use tokio::time::sleep;

use lumino_common::epoch::EpochPhase;
use lumino_common::job::{Job, JobStatus};
use lumino_common::units;

use crate::commit_reveal::CommitRevealStore;
use crate::config::NodeConfig;
use crate::job_runner::JobRunner;
use crate::ledger::LedgerClient;
use crate::phase_clock::PhaseClock;
use crate::storage::NodeDataStore;

/// Cadence of the periodic balance/epoch status report.
const STATUS_INTERVAL: Duration = Duration::from_secs(300);
/// Grace pause before a test-mode exit, so trailing ledger events land in
/// the log.
const EXIT_GRACE: Duration = Duration::from_secs(3);
/// Back-off after an unhandled main-loop error, to avoid hot-looping on a
/// persistent RPC outage.
const FATAL_BACKOFF: Duration = Duration::from_secs(5);

/// The protocol driver: one cooperative loop that observes the phase clock
/// and performs exactly one protocol action per phase transition.
pub struct NodeAgent {
    config: NodeConfig,
    ledger: Arc<dyn LedgerClient>,
    store: NodeDataStore,
    commit_reveal: CommitRevealStore,
    clock: PhaseClock,
    runner: JobRunner,
    node_id: Option<u64>,
    is_leader: bool,
    epochs_processed: u32,
    /// False until the first observed DISPUTE: the node never joins an
    /// epoch partway through.
    can_begin: bool,
    stop: Arc<AtomicBool>,
}

impl NodeAgent {
    pub async fn new(config: NodeConfig, ledger: Arc<dyn LedgerClient>) -> Result<Self> {
        let store = NodeDataStore::open(&config.data_dir).await?;
        ledger
            .setup_event_filters()
            .await
            .context("setting up ledger event filters")?;

        let node_id = store.node_id();
        let runner = JobRunner::new(config.pipeline_root.clone());

        Ok(Self {
            config,
            ledger,
            store,
            commit_reveal: CommitRevealStore::new(),
            clock: PhaseClock::new(),
            runner,
            node_id,
            is_leader: false,
            epochs_processed: 0,
            can_begin: false,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn node_id(&self) -> Option<u64> {
        self.node_id
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub fn epochs_processed(&self) -> u32 {
        self.epochs_processed
    }

    /// Flag checked once per loop iteration; setting it stops `run`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Register with the ledger, staking one token per compute-rating unit.
    /// A cached identity short-circuits: a node never registers twice.
    ///
    /// Registration errors propagate; the node cannot usefully run without
    /// an id.
    pub async fn register(&mut self) -> Result<()> {
        if let Some(node_id) = self.node_id {
            info!("Node already registered with ID: {node_id}");
            return Ok(());
        }

        let address = self.ledger.address().to_string();
        let required_stake = units::stake_for_rating(self.config.compute_rating);
        let current_stake = self
            .ledger
            .get_stake_balance(&address)
            .await
            .context("reading stake balance")?;

        if current_stake < required_stake {
            info!("Insufficient stake. Depositing required amount...");
            let shortfall = required_stake - current_stake;
            self.ledger
                .approve_token_spending(&self.config.contracts.node_escrow, shortfall)
                .await
                .context("approving stake deposit")?;
            self.ledger
                .deposit_stake(shortfall)
                .await
                .context("depositing stake")?;
        }

        let receipt = self
            .ledger
            .register_node(self.config.compute_rating)
            .await
            .context("registering node")?;
        let node_id = receipt
            .registered_node_id()
            .ok_or_else(|| anyhow!("registration receipt carries no NodeRegistered event"))?;

        self.store.record_node_id(node_id).await?;
        self.node_id = Some(node_id);
        info!("Node registered with ID: {node_id}");
        Ok(())
    }

    /// Main node loop. Exits cleanly when the stop flag is raised or when a
    /// test-mode epoch budget is exhausted; otherwise loops forever,
    /// recovering from per-phase errors.
    pub async fn run(&mut self) -> Result<()> {
        let node_id = self
            .node_id
            .ok_or_else(|| anyhow!("node is not registered"))?;

        info!("Starting main node loop...");
        info!("Node ID: {node_id}");
        info!("Node address: {}", self.ledger.address());

        let mut last_status = Instant::now();
        let mut phase_started = Instant::now();

        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("Stop requested; leaving main loop");
                return Ok(());
            }

            // Drain any new ledger events into the log, best effort.
            if let Err(e) = self.ledger.process_events().await {
                warn!("Failed to process ledger events: {e}");
            }

            if last_status.elapsed() >= STATUS_INTERVAL {
                self.log_status().await;
                last_status = Instant::now();
            }

            let observation = match self.clock.observe(&*self.ledger).await {
                Ok(observation) => observation,
                Err(e) => {
                    error!("Critical error in main loop: {e}");
                    self.log_error_snapshot(None);
                    if self.config.test_mode.is_some() {
                        return Err(e.into());
                    }
                    sleep(FATAL_BACKOFF).await;
                    continue;
                }
            };

            if observation.transitioned {
                if let Some(previous) = observation.previous {
                    info!(
                        "Completed {previous} phase (duration: {:.2}s)",
                        phase_started.elapsed().as_secs_f64()
                    );
                }
                info!(
                    "Entering {} phase (time left: {}s)",
                    observation.phase,
                    observation.time_left.as_secs()
                );
                phase_started = Instant::now();
            }

            if self.can_begin && observation.transitioned {
                if let Err(e) = self.dispatch_phase(node_id, observation.phase).await {
                    error!("Error in {} phase: {e:#}", observation.phase);
                    self.log_error_snapshot(Some(observation.phase));
                    if self.config.test_mode.is_some() {
                        // Let trailing events surface for the test log
                        // before propagating.
                        sleep(EXIT_GRACE).await;
                        let _ = self.ledger.process_events().await;
                        return Err(e);
                    }
                }
            }

            if let Some(limit) = self.config.test_mode.as_ref().and_then(|m| m.epoch_limit()) {
                if self.epochs_processed >= limit {
                    let _ = self.ledger.process_events().await;
                    sleep(EXIT_GRACE).await;
                    info!("Test cycle complete");
                    return Ok(());
                }
            }

            if observation.phase == EpochPhase::Dispute && !self.can_begin {
                info!("Observed first DISPUTE phase; joining the protocol next epoch");
                self.can_begin = true;
            }

            sleep(observation.poll_interval()).await;
        }
    }

    /// Perform the one action a phase transition calls for. Runs at most
    /// once per epoch per phase, guaranteed by the transition-only
    /// dispatch.
    async fn dispatch_phase(&mut self, node_id: u64, phase: EpochPhase) -> Result<()> {
        if let Some(mode) = &self.config.test_mode {
            if !mode.phase_enabled(phase) {
                warn!("TEST_MODE gate disables {phase} actions this epoch");
                return Ok(());
            }
        }

        match phase {
            EpochPhase::Commit => self.submit_commitment(node_id).await,
            EpochPhase::Reveal => self.reveal_secret(node_id).await,
            EpochPhase::Elect => self.elect_leader().await,
            EpochPhase::Execute => self.perform_leader_duties(node_id).await,
            EpochPhase::Confirm => self.process_assigned_jobs(node_id).await,
            EpochPhase::Dispute => self.process_incentives().await,
        }
    }

    /// COMMIT: draw a fresh secret and publish its commitment. Arming the
    /// store discards any unrevealed secret from a missed epoch.
    async fn submit_commitment(&mut self, node_id: u64) -> Result<()> {
        let commitment = self.commit_reveal.arm();
        self.ledger
            .submit_commitment(node_id, &commitment)
            .await
            .context("submitting commitment")?;
        info!("Commitment submitted");
        Ok(())
    }

    /// REVEAL: publish the secret behind this epoch's commitment. The
    /// secret is cleared no matter how the call goes; there is no retry.
    async fn reveal_secret(&mut self, node_id: u64) -> Result<()> {
        let Some(secret) = self.commit_reveal.take() else {
            warn!("No secret available to reveal");
            return Ok(());
        };
        self.ledger
            .reveal_secret(node_id, &secret)
            .await
            .context("revealing secret")?;
        info!("Secret revealed");
        Ok(())
    }

    /// ELECT: trigger leader election. Idempotent on the ledger; the first
    /// caller pays gas, the rest are no-ops.
    async fn elect_leader(&mut self) -> Result<()> {
        self.ledger
            .elect_leader()
            .await
            .context("triggering leader election")?;
        info!("Leader election triggered");
        Ok(())
    }

    /// EXECUTE: refresh the leadership flag and, if this node leads the
    /// epoch, start the assignment round.
    async fn perform_leader_duties(&mut self, node_id: u64) -> Result<()> {
        let leader = self
            .ledger
            .get_current_leader()
            .await
            .context("reading current leader")?;

        let was_leader = self.is_leader;
        self.is_leader = leader == node_id;
        if self.is_leader != was_leader {
            info!(
                "Node leadership status changed to: {}",
                if self.is_leader { "Leader" } else { "Not leader" }
            );
        }

        if self.is_leader {
            info!("This node is the current leader");
            self.ledger
                .start_assignment_round()
                .await
                .context("starting assignment round")?;
            info!("Assignment round started");
        } else {
            info!("This node is not the current leader");
        }
        Ok(())
    }

    /// CONFIRM: settle every job assigned to this node. One bad job never
    /// blocks its peers.
    async fn process_assigned_jobs(&mut self, node_id: u64) -> Result<()> {
        let jobs = self
            .ledger
            .get_jobs_by_node(node_id)
            .await
            .context("listing assigned jobs")?;

        if jobs.is_empty() {
            debug!("No jobs assigned this epoch");
            return Ok(());
        }

        for job in &jobs {
            if job.status != JobStatus::Assigned {
                continue;
            }
            if let Err(e) = self.settle_job(job).await {
                error!("Error processing job {}: {e:#}", job.id);
            }
        }
        Ok(())
    }

    /// Confirm, execute and settle one job: completion plus payment on
    /// success, a reasoned failure otherwise.
    async fn settle_job(&self, job: &Job) -> Result<()> {
        self.ledger
            .confirm_job(job.id)
            .await
            .context("confirming job")?;
        info!("Confirmed job {}", job.id);

        match self.runner.execute(&*self.ledger, job).await {
            Ok(()) => {
                self.ledger
                    .complete_job(job.id)
                    .await
                    .context("completing job")?;
                info!("Completed job {}", job.id);
                self.ledger
                    .process_job_payment(job.id)
                    .await
                    .context("processing job payment")?;
            }
            Err(job_error) => {
                warn!("Job {} failed: {job_error}", job.id);
                self.ledger
                    .fail_job(job.id, &job_error.to_string())
                    .await
                    .context("recording job failure")?;
                info!("Recorded failure for job {}", job.id);
            }
        }
        Ok(())
    }

    /// DISPUTE: settle the epoch's rewards and penalties. The epoch only
    /// counts as processed once the call lands.
    async fn process_incentives(&mut self) -> Result<()> {
        self.ledger
            .process_incentives()
            .await
            .context("processing incentives")?;
        info!("Incentive processing complete");
        self.epochs_processed += 1;
        Ok(())
    }

    async fn log_status(&self) {
        let address = self.ledger.address().to_string();
        let stake = self.ledger.get_stake_balance(&address).await;
        let tokens = self.ledger.get_token_balance(&address).await;
        let epoch = self.ledger.get_current_epoch().await;

        match (stake, tokens, epoch) {
            (Ok(stake), Ok(tokens), Ok(epoch)) => {
                info!("=== Node Status Update ===");
                info!("Current epoch: {epoch}");
                info!("Stake balance: {} LUM", units::format_tokens(stake));
                info!("Token balance: {} LUM", units::format_tokens(tokens));
                info!(
                    "Leader status: {}",
                    if self.is_leader { "Leader" } else { "Regular node" }
                );
                info!("========================");
            }
            (stake, tokens, epoch) => {
                let failure = [
                    stake.err().map(|e| e.to_string()),
                    tokens.err().map(|e| e.to_string()),
                    epoch.err().map(|e| e.to_string()),
                ]
                .into_iter()
                .flatten()
                .next()
                .unwrap_or_default();
                warn!("Skipping status update: {failure}");
            }
        }
    }

    fn log_error_snapshot(&self, phase: Option<EpochPhase>) {
        error!("=== Node State at Error ===");
        error!(
            "Current phase: {}",
            phase.map_or_else(|| "Unknown".to_string(), |p| p.to_string())
        );
        error!("Is leader: {}", self.is_leader);
        error!("Has secret: {}", self.commit_reveal.has_secret());
        error!("Has commitment: {}", self.commit_reveal.has_commitment());
        error!("=========================");
    }
}
