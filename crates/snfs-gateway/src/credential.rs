//! Password credential hashing.
//!
//! Plaintext passwords never reach the identity store; only a salted,
//! iterated digest is kept. The hashing scheme sits behind
//! [`CredentialHasher`] so a deployment can plug in a stronger KDF.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Default number of hash iterations.
pub const DEFAULT_HASH_ITERATIONS: u32 = 10_000;

/// A stored password credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Hex-encoded salt.
    pub salt: String,
    /// Hex-encoded digest.
    pub digest: String,
    /// Iteration count used to derive the digest.
    pub iterations: u32,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

/// Derives and checks password credentials.
pub trait CredentialHasher: Send + Sync {
    /// Derives a credential for `password` with a fresh salt.
    fn hash(&self, password: &str) -> Credential;

    /// Checks `password` against a stored credential.
    fn verify(&self, password: &str, stored: &Credential) -> bool;
}

/// Salted, iterated SHA-256.
#[derive(Debug, Clone)]
pub struct Sha256Hasher {
    iterations: u32,
}

impl Sha256Hasher {
    /// Creates a hasher using `iterations` rounds (at least one).
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    fn derive(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
        let mut input = Zeroizing::new(Vec::with_capacity(salt.len() + password.len()));
        input.extend_from_slice(salt);
        input.extend_from_slice(password.as_bytes());

        let mut digest = Zeroizing::new(<[u8; 32]>::from(Sha256::digest(input.as_slice())));
        for _ in 1..iterations {
            let mut hasher = Sha256::new();
            hasher.update(digest.as_slice());
            hasher.update(salt);
            *digest = hasher.finalize().into();
        }
        digest
    }
}

impl Default for Sha256Hasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_ITERATIONS)
    }
}

impl CredentialHasher for Sha256Hasher {
    fn hash(&self, password: &str) -> Credential {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill(&mut salt);
        let digest = Self::derive(password, &salt, self.iterations);
        Credential {
            salt: hex::encode(salt),
            digest: hex::encode(digest.as_slice()),
            iterations: self.iterations,
        }
    }

    fn verify(&self, password: &str, stored: &Credential) -> bool {
        let (Ok(salt), Ok(expected)) = (hex::decode(&stored.salt), hex::decode(&stored.digest))
        else {
            return false;
        };
        let actual = Self::derive(password, &salt, stored.iterations.max(1));
        actual.as_slice().ct_eq(&expected).into()
    }
}
