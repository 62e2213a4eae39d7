use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::sleep;

use lumino_common::job::Job;

use crate::ledger::LedgerClient;

/// Runner entry point, relative to the pipeline root.
const RUNNER_SCRIPT: &str = "scripts/runners/celery-wf.sh";
/// Workflow the runner script dispatches to.
const WORKFLOW: &str = "torchtunewrapper";
/// Result-directory tree the runner writes its side channel into.
const RESULTS_DIR: &str = ".results";
const TOKEN_COUNT_FILE: &str = ".token-count";
const FINISHED_FILE: &str = ".finished";

const TAIL_INTERVAL: Duration = Duration::from_secs(1);

/// Simulation mode stands in for the ML stack in integration tests.
const SIMULATED_RUN_TIME: Duration = Duration::from_secs(5);
const SIMULATED_TOKEN_COUNT: u64 = 600_000;

/// Why a job execution failed. The Display form is the reason string handed
/// to the ledger's `fail_job`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid JSON in job args: {0}")]
    InvalidArgs(String),

    #[error("unsupported base model: {0}")]
    UnknownModel(String),

    #[error("failed to spawn job runner: {0}")]
    Spawn(String),

    #[error("job runner i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to report token count: {0}")]
    TokenReport(String),

    #[error("job runner exited without writing the completion marker")]
    NotFinished,
}

/// Training hyper-parameters carried in a job's opaque `args` JSON. Every
/// field has the runner's documented default; unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingArgs {
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_true")]
    pub shuffle: bool,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: u32,
    #[serde(default = "default_true")]
    pub use_lora: bool,
    #[serde(default)]
    pub use_qlora: bool,
    #[serde(default = "default_lr")]
    pub lr: String,
    #[serde(default)]
    pub seed: String,
}

fn default_batch_size() -> u32 {
    2
}

fn default_num_epochs() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_lr() -> String {
    "3e-4".to_string()
}

impl TrainingArgs {
    pub fn parse(args_json: &str) -> Result<Self, JobError> {
        serde_json::from_str(args_json).map_err(|e| JobError::InvalidArgs(e.to_string()))
    }
}

/// GPUs to request for a base model, given whether LoRA is in play. Full
/// fine-tunes of the larger models need multi-GPU runs.
pub fn num_gpus(base_model: &str, use_lora: bool) -> Result<u32, JobError> {
    match (base_model, use_lora) {
        ("llm_llama3_2_1b" | "llm_llama3_2_3b", _) => Ok(1),
        ("llm_llama3_1_8b", true) => Ok(1),
        ("llm_llama3_1_8b", false) => Ok(4),
        ("llm_llama3_1_70b", true) => Ok(4),
        ("llm_llama3_1_70b", false) => Ok(8),
        (other, _) => Err(JobError::UnknownModel(other.to_string())),
    }
}

/// Drives one training job through the external runner script, tailing the
/// result directory for the token count and classifying the outcome by the
/// completion marker.
pub struct JobRunner {
    pipeline_root: Option<PathBuf>,
}

impl JobRunner {
    /// Without a pipeline root the runner operates in simulation mode.
    pub fn new(pipeline_root: Option<PathBuf>) -> Self {
        Self { pipeline_root }
    }

    pub fn is_simulated(&self) -> bool {
        self.pipeline_root.is_none()
    }

    /// Execute an assigned job to completion. Blocks for the lifetime of
    /// the subprocess; reports the token count to the ledger at most once.
    pub async fn execute(&self, ledger: &dyn LedgerClient, job: &Job) -> Result<(), JobError> {
        info!("Executing job {}", job.id);

        let Some(root) = &self.pipeline_root else {
            return self.simulate(ledger, job).await;
        };

        let args = TrainingArgs::parse(&job.args)?;
        let gpus = num_gpus(&job.base_model_name, args.use_lora)?;

        let results_dir = root
            .join(RESULTS_DIR)
            .join(&job.submitter)
            .join(job.id.to_string());
        tokio::fs::create_dir_all(&results_dir).await?;

        let stdout = std::fs::File::create(results_dir.join("runner-stdout.log"))?;
        let stderr = std::fs::File::create(results_dir.join("runner-stderr.log"))?;

        let mut child = Command::new(root.join(RUNNER_SCRIPT))
            .current_dir(root)
            .kill_on_drop(true)
            .env("PZ_ENV", "cpnode")
            .arg(WORKFLOW)
            .arg("--job_config_name")
            .arg(&job.base_model_name)
            .arg("--job_id")
            .arg(job.id.to_string())
            .arg("--user_id")
            .arg(&job.submitter)
            .arg("--dataset_id")
            .arg(&args.dataset_id)
            .arg("--batch_size")
            .arg(args.batch_size.to_string())
            .arg("--shuffle")
            .arg(args.shuffle.to_string())
            .arg("--num_epochs")
            .arg(args.num_epochs.to_string())
            .arg("--use_lora")
            .arg(args.use_lora.to_string())
            .arg("--use_qlora")
            .arg(args.use_qlora.to_string())
            .arg("--lr")
            .arg(&args.lr)
            .arg("--seed")
            .arg(&args.seed)
            .arg("--num_gpus")
            .arg(gpus.to_string())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| JobError::Spawn(e.to_string()))?;

        info!(
            "Spawned runner for job {} ({} on {gpus} GPU(s))",
            job.id, job.base_model_name
        );

        // Tail the result directory while the runner lives. The token count
        // is reported to the ledger on the first clean read, once.
        let mut reported = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if !reported {
                reported = self.try_report_tokens(ledger, &results_dir, job.id).await?;
            }
            sleep(TAIL_INTERVAL).await;
        };

        // A fast runner may exit between polls; give the side channel one
        // last look so the reading is not lost.
        if !reported {
            self.try_report_tokens(ledger, &results_dir, job.id).await?;
        }

        info!("Runner for job {} exited with {status}", job.id);

        if results_dir.join(FINISHED_FILE).exists() {
            Ok(())
        } else {
            Err(JobError::NotFinished)
        }
    }

    /// Read `.token-count` if present and push the value to the ledger.
    /// Returns whether a reading was reported; malformed content is left
    /// for the next poll.
    async fn try_report_tokens(
        &self,
        ledger: &dyn LedgerClient,
        results_dir: &Path,
        job_id: u64,
    ) -> Result<bool, JobError> {
        let path = results_dir.join(TOKEN_COUNT_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => return Ok(false),
        };

        match content.trim().parse::<u64>() {
            Ok(count) => {
                ledger
                    .set_token_count_for_job(job_id, count)
                    .await
                    .map_err(|e| JobError::TokenReport(e.to_string()))?;
                info!("Reported token count {count} for job {job_id}");
                Ok(true)
            }
            Err(_) => {
                warn!(
                    "Malformed token count {:?} for job {job_id}; will retry",
                    content.trim()
                );
                Ok(false)
            }
        }
    }

    /// No pipeline root configured: pretend to train so the protocol
    /// machinery can be exercised without an ML stack.
    async fn simulate(&self, ledger: &dyn LedgerClient, job: &Job) -> Result<(), JobError> {
        info!("No pipeline root configured; simulating job {}", job.id);
        sleep(SIMULATED_RUN_TIME).await;
        ledger
            .set_token_count_for_job(job.id, SIMULATED_TOKEN_COUNT)
            .await
            .map_err(|e| JobError::TokenReport(e.to_string()))?;
        info!("Job [{} : {}] execution completed", job.id, job.args);
        Ok(())
    }
}
