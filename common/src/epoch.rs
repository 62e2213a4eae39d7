use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// The six ledger phases, in cyclic order. Discriminants are the ledger's
/// own phase indices and are authoritative.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[strum(serialize_all = "UPPERCASE")]
pub enum EpochPhase {
    Commit = 0,
    Reveal = 1,
    Elect = 2,
    Execute = 3,
    Confirm = 4,
    Dispute = 5,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown epoch phase index: {0}")]
pub struct UnknownPhase(pub u8);

impl TryFrom<u8> for EpochPhase {
    type Error = UnknownPhase;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Commit),
            1 => Ok(Self::Reveal),
            2 => Ok(Self::Elect),
            3 => Ok(Self::Execute),
            4 => Ok(Self::Confirm),
            5 => Ok(Self::Dispute),
            other => Err(UnknownPhase(other)),
        }
    }
}

impl From<EpochPhase> for u8 {
    fn from(phase: EpochPhase) -> u8 {
        phase as u8
    }
}

impl EpochPhase {
    pub const COUNT: usize = 6;

    /// Index into per-phase tables such as the test-mode gate string.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Snapshot of the ledger's epoch clock: the active phase and how long it
/// has left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochState {
    pub phase: EpochPhase,
    pub time_left: Duration,
}

impl EpochState {
    pub fn new(phase: EpochPhase, time_left: Duration) -> Self {
        Self { phase, time_left }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_indices_match_ledger() {
        for (index, phase) in [
            EpochPhase::Commit,
            EpochPhase::Reveal,
            EpochPhase::Elect,
            EpochPhase::Execute,
            EpochPhase::Confirm,
            EpochPhase::Dispute,
        ]
        .into_iter()
        .enumerate()
        {
            assert_eq!(EpochPhase::try_from(index as u8), Ok(phase));
            assert_eq!(u8::from(phase) as usize, index);
        }
        assert_eq!(EpochPhase::try_from(6), Err(UnknownPhase(6)));
    }

    #[test]
    fn phase_names_render_uppercase() {
        assert_eq!(EpochPhase::Commit.to_string(), "COMMIT");
        assert_eq!(EpochPhase::Dispute.to_string(), "DISPUTE");
    }
}
