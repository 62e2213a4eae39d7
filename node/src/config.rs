use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use strum::Display;
use thiserror::Error;

use lumino_common::epoch::EpochPhase;

/// Default values for configuration read from the environment.
pub mod defaults {
    pub const RPC_URL: &str = "http://localhost:8545";
    pub const DATA_DIR: &str = "cache/node_client";
    pub const CONTRACTS_DIR: &str = "../contracts/src";
    pub const COMPUTE_RATING: u64 = 10;
}

/// Log verbosity, mirrored into `log::LevelFilter`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Per-contract gateway addresses, one environment variable each.
#[derive(Clone, Debug)]
pub struct ContractAddresses {
    pub token: String,
    pub access_manager: String,
    pub whitelist_manager: String,
    pub node_manager: String,
    pub incentive_manager: String,
    pub node_escrow: String,
    pub leader_manager: String,
    pub job_manager: String,
    pub epoch_manager: String,
    pub job_escrow: String,
}

impl ContractAddresses {
    fn from_env() -> Result<Self> {
        Ok(Self {
            token: required_env("LUMINO_TOKEN_ADDRESS")?,
            access_manager: required_env("ACCESS_MANAGER_ADDRESS")?,
            whitelist_manager: required_env("WHITELIST_MANAGER_ADDRESS")?,
            node_manager: required_env("NODE_MANAGER_ADDRESS")?,
            incentive_manager: required_env("INCENTIVE_MANAGER_ADDRESS")?,
            node_escrow: required_env("NODE_ESCROW_ADDRESS")?,
            leader_manager: required_env("LEADER_MANAGER_ADDRESS")?,
            job_manager: required_env("JOB_MANAGER_ADDRESS")?,
            epoch_manager: required_env("EPOCH_MANAGER_ADDRESS")?,
            job_escrow: required_env("JOB_ESCROW_ADDRESS")?,
        })
    }
}

/// Phase gates plus an epoch budget, packed into the seven-character
/// `TEST_MODE` string: characters 0-5 gate COMMIT..DISPUTE (anything but
/// '0' enables the phase), character 6 is the number of epochs to run
/// ('0' = unbounded).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TestMode {
    gates: [bool; EpochPhase::COUNT],
    epoch_digit: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TestModeError {
    #[error("TEST_MODE must be {expected} characters, got {got:?}")]
    BadLength { expected: usize, got: String },

    #[error("TEST_MODE epoch count must be a digit, got {0:?}")]
    BadEpochDigit(String),
}

impl FromStr for TestMode {
    type Err = TestModeError;

    fn from_str(s: &str) -> Result<Self, TestModeError> {
        let bytes = s.as_bytes();
        if bytes.len() != EpochPhase::COUNT + 1 {
            return Err(TestModeError::BadLength {
                expected: EpochPhase::COUNT + 1,
                got: s.to_string(),
            });
        }

        let mut gates = [false; EpochPhase::COUNT];
        for (gate, byte) in gates.iter_mut().zip(bytes) {
            *gate = *byte != b'0';
        }

        let digit = bytes[EpochPhase::COUNT];
        if !digit.is_ascii_digit() {
            return Err(TestModeError::BadEpochDigit(s.to_string()));
        }

        Ok(Self {
            gates,
            epoch_digit: digit - b'0',
        })
    }
}

impl TestMode {
    pub fn phase_enabled(&self, phase: EpochPhase) -> bool {
        self.gates[phase.index()]
    }

    /// Number of epochs to run before a clean exit; `None` when unbounded.
    pub fn epoch_limit(&self) -> Option<u32> {
        (self.epoch_digit != 0).then_some(self.epoch_digit as u32)
    }
}

/// Everything the node reads from its environment, collected once at
/// startup. No further environment access happens after this.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub contracts: ContractAddresses,
    pub contracts_dir: PathBuf,
    pub data_dir: PathBuf,
    /// Root of the training pipeline checkout; absent means the job runner
    /// simulates execution.
    pub pipeline_root: Option<PathBuf>,
    pub compute_rating: u64,
    pub test_mode: Option<TestMode>,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        let test_mode = match optional_env("TEST_MODE") {
            Some(raw) => Some(raw.parse::<TestMode>().context("parsing TEST_MODE")?),
            None => None,
        };

        let compute_rating = match optional_env("COMPUTE_RATING") {
            Some(raw) => raw.parse::<u64>().context("parsing COMPUTE_RATING")?,
            None => defaults::COMPUTE_RATING,
        };

        Ok(Self {
            rpc_url: optional_env("RPC_URL").unwrap_or_else(|| defaults::RPC_URL.to_string()),
            private_key: required_env("NODE_PRIVATE_KEY")?,
            contracts: ContractAddresses::from_env()?,
            contracts_dir: optional_env("CONTRACTS_DIR")
                .unwrap_or_else(|| defaults::CONTRACTS_DIR.to_string())
                .into(),
            data_dir: optional_env("NODE_DATA_DIR")
                .unwrap_or_else(|| defaults::DATA_DIR.to_string())
                .into(),
            pipeline_root: optional_env("PIPELINE_ZEN_DIR").map(PathBuf::from),
            compute_rating,
            test_mode,
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    optional_env(name).ok_or_else(|| anyhow!("environment variable {name} is not set"))
}

fn optional_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_run_mask_enables_everything() {
        let mode: TestMode = "1111111".parse().unwrap();
        for index in 0..EpochPhase::COUNT {
            let phase = EpochPhase::try_from(index as u8).unwrap();
            assert!(mode.phase_enabled(phase));
        }
        assert_eq!(mode.epoch_limit(), Some(1));
    }

    #[test]
    fn gates_follow_phase_order() {
        let mode: TestMode = "1110111".parse().unwrap();
        assert!(mode.phase_enabled(EpochPhase::Commit));
        assert!(mode.phase_enabled(EpochPhase::Elect));
        assert!(!mode.phase_enabled(EpochPhase::Execute));
        assert!(mode.phase_enabled(EpochPhase::Confirm));

        let mode: TestMode = "1111011".parse().unwrap();
        assert!(!mode.phase_enabled(EpochPhase::Confirm));
        assert!(mode.phase_enabled(EpochPhase::Dispute));
    }

    #[test]
    fn zero_epoch_digit_means_unbounded() {
        let mode: TestMode = "1111110".parse().unwrap();
        assert_eq!(mode.epoch_limit(), None);
    }

    #[test]
    fn multi_epoch_budgets_parse() {
        let mode: TestMode = "1110115".parse().unwrap();
        assert_eq!(mode.epoch_limit(), Some(5));
    }

    #[test]
    fn malformed_masks_are_rejected() {
        assert!("111111".parse::<TestMode>().is_err());
        assert!("11111111".parse::<TestMode>().is_err());
        assert!("111111x".parse::<TestMode>().is_err());
        assert!("".parse::<TestMode>().is_err());
    }
}
