use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Keccak256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A per-epoch 32-byte secret. Held in memory only between the COMMIT and
/// REVEAL actions of one epoch; zeroed on drop. Never stringified.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; 32]);

impl Secret {
    /// Draw a fresh secret from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The commitment the ledger expects: keccak256 of the packed secret.
    pub fn commitment(&self) -> Commitment {
        let mut hasher = Keccak256::new();
        hasher.update(self.0);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Commitment(out)
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secret material never reaches the log.
        f.write_str("Secret(..)")
    }
}

/// keccak256 of a secret, published during COMMIT.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Commitment([u8; 32]);

impl Commitment {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Commitment({})", self.to_hex())
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_is_keccak_of_secret() {
        let secret = Secret::generate();
        let mut hasher = Keccak256::new();
        hasher.update(secret.as_bytes());
        let expected: [u8; 32] = hasher.finalize().into();
        assert_eq!(secret.commitment().as_bytes(), &expected);
    }

    #[test]
    fn secrets_are_distinct_across_draws() {
        let a = Secret::generate();
        let b = Secret::generate();
        assert_ne!(a, b);
        assert_ne!(a.commitment(), b.commitment());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::generate();
        assert_eq!(format!("{secret:?}"), "Secret(..)");
    }
}
