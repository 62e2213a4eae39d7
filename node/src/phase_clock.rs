use std::time::Duration;

use lumino_common::epoch::{EpochPhase, EpochState};

use crate::ledger::{LedgerClient, LedgerError};

/// Ceiling on the main-loop poll cadence: even with a long phase ahead the
/// node re-checks the ledger every two seconds.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One observation of the ledger's epoch clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseObservation {
    pub phase: EpochPhase,
    pub time_left: Duration,
    /// True iff the phase index differs from the previous observation.
    /// Surfaced exactly once per transition, including the DISPUTE→COMMIT
    /// wrap.
    pub transitioned: bool,
    /// The phase seen before this one, for transition logging.
    pub previous: Option<EpochPhase>,
}

impl PhaseObservation {
    /// How long to sleep before observing again: `min(time_left, 2 s)`.
    pub fn poll_interval(&self) -> Duration {
        self.time_left.min(MAX_POLL_INTERVAL)
    }
}

/// Tracks the last observed phase and surfaces transitions. If two ledger
/// transitions happen between polls the intermediate phase is never
/// surfaced; the driver's per-phase actions must tolerate being skipped.
#[derive(Default)]
pub struct PhaseClock {
    last: Option<EpochPhase>,
}

impl PhaseClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll the ledger once and fold the result into the tracker.
    pub async fn observe(
        &mut self,
        ledger: &dyn LedgerClient,
    ) -> Result<PhaseObservation, LedgerError> {
        let state = ledger.get_epoch_state().await?;
        Ok(self.track(state))
    }

    fn track(&mut self, state: EpochState) -> PhaseObservation {
        let previous = self.last;
        let transitioned = previous != Some(state.phase);
        self.last = Some(state.phase);
        PhaseObservation {
            phase: state.phase,
            time_left: state.time_left,
            transitioned,
            previous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(phase: EpochPhase) -> EpochState {
        EpochState::new(phase, Duration::from_secs(30))
    }

    #[test]
    fn first_observation_is_a_transition() {
        let mut clock = PhaseClock::new();
        let obs = clock.track(state(EpochPhase::Elect));
        assert!(obs.transitioned);
        assert_eq!(obs.previous, None);
    }

    #[test]
    fn same_phase_is_surfaced_once() {
        let mut clock = PhaseClock::new();
        clock.track(state(EpochPhase::Commit));
        let obs = clock.track(state(EpochPhase::Commit));
        assert!(!obs.transitioned);

        let obs = clock.track(state(EpochPhase::Reveal));
        assert!(obs.transitioned);
        assert_eq!(obs.previous, Some(EpochPhase::Commit));
    }

    #[test]
    fn dispute_wraps_to_commit() {
        let mut clock = PhaseClock::new();
        clock.track(state(EpochPhase::Dispute));
        let obs = clock.track(state(EpochPhase::Commit));
        assert!(obs.transitioned);
        assert_eq!(obs.previous, Some(EpochPhase::Dispute));
    }

    #[test]
    fn missed_phases_collapse_into_one_transition() {
        let mut clock = PhaseClock::new();
        clock.track(state(EpochPhase::Commit));
        // An RPC stall swallowed REVEAL entirely.
        let obs = clock.track(state(EpochPhase::Elect));
        assert!(obs.transitioned);
        assert_eq!(obs.previous, Some(EpochPhase::Commit));
    }

    #[test]
    fn poll_interval_is_capped_at_two_seconds() {
        let obs = PhaseObservation {
            phase: EpochPhase::Commit,
            time_left: Duration::from_secs(90),
            transitioned: false,
            previous: None,
        };
        assert_eq!(obs.poll_interval(), MAX_POLL_INTERVAL);

        let obs = PhaseObservation {
            time_left: Duration::from_secs(1),
            ..obs
        };
        assert_eq!(obs.poll_interval(), Duration::from_secs(1));
    }
}
