use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job lifecycle states as kept by the ledger. The node only ever acts on
/// `Assigned`; every other state is owned by the ledger or the submitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum JobStatus {
    New = 0,
    Assigned = 1,
    Confirmed = 2,
    Complete = 3,
    Failed = 4,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown job status: {0}")]
pub struct UnknownJobStatus(pub u8);

impl TryFrom<u8> for JobStatus {
    type Error = UnknownJobStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::New),
            1 => Ok(Self::Assigned),
            2 => Ok(Self::Confirmed),
            3 => Ok(Self::Complete),
            4 => Ok(Self::Failed),
            other => Err(UnknownJobStatus(other)),
        }
    }
}

impl From<JobStatus> for u8 {
    fn from(status: JobStatus) -> u8 {
        status as u8
    }
}

/// A training job as observed from the ledger. `args` is an opaque JSON
/// string of hyper-parameters; the node passes it through to the runner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    pub status: JobStatus,
    pub base_model_name: String,
    pub args: String,
    pub submitter: String,
}
