use log::debug;

use lumino_common::crypto::{Commitment, Secret};

/// Holds at most one `(secret, commitment)` pair for the epoch in flight.
///
/// The secret is born when COMMIT arms the store and dies either when
/// REVEAL takes it or when the next COMMIT arms a fresh pair. The eager
/// clear on re-arm keeps a stale secret from being revealed in the wrong
/// epoch after a missed REVEAL.
#[derive(Default)]
pub struct CommitRevealStore {
    current: Option<(Secret, Commitment)>,
}

impl CommitRevealStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a fresh secret for a new epoch and return its commitment. Any
    /// previous pair is discarded.
    pub fn arm(&mut self) -> Commitment {
        if self.current.is_some() {
            debug!("Discarding unrevealed secret from a previous epoch");
        }
        let secret = Secret::generate();
        let commitment = secret.commitment();
        self.current = Some((secret, commitment));
        commitment
    }

    /// Take the secret for REVEAL, clearing the store. Returns `None` when
    /// no commitment was made this epoch (e.g. after a restart).
    pub fn take(&mut self) -> Option<Secret> {
        self.current.take().map(|(secret, _)| secret)
    }

    pub fn has_secret(&self) -> bool {
        self.current.is_some()
    }

    pub fn has_commitment(&self) -> bool {
        self.current.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_yields_commitment_of_held_secret() {
        let mut store = CommitRevealStore::new();
        let commitment = store.arm();
        assert!(store.has_secret());

        let secret = store.take().expect("secret present");
        assert_eq!(secret.commitment(), commitment);
    }

    #[test]
    fn take_clears_the_store() {
        let mut store = CommitRevealStore::new();
        store.arm();
        assert!(store.take().is_some());
        assert!(!store.has_secret());
        assert!(store.take().is_none());
    }

    #[test]
    fn rearming_replaces_a_stale_pair() {
        let mut store = CommitRevealStore::new();
        let first = store.arm();
        let second = store.arm();
        assert_ne!(first, second);

        // Only the latest secret remains revealable.
        let secret = store.take().expect("secret present");
        assert_eq!(secret.commitment(), second);
        assert!(!store.has_secret());
    }
}
