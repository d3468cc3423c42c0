//! Row key derivation.
//!
//! Every ingested row gets a 64-character lowercase hex SHA-256 digest as its
//! `ID`. The digest input is a fresh random UUID v4.
//!
//! Two strategies exist:
//!
//! - [`KeyStrategy::Independent`] hashes each token on its own. Keys do not
//!   depend on earlier calls, so they do not depend on write order either.
//! - [`KeyStrategy::Cumulative`] chains keys inside one batch: key `n` of a
//!   batch is the digest of that batch's tokens `0..=n`. [`KeyDeriver::reset`]
//!   starts a new chain; the batch writer calls it before every batch. This
//!   is the legacy key shape, kept for tables that were filled that way.
//!
//! A [`KeyDeriver`] takes `&mut self`, so it cannot be shared across worker
//! threads without a lock. Each file worker owns one.

use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// How successive keys relate to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyStrategy {
    #[default]
    Independent,
    Cumulative,
}

/// Produces row keys. Not `Clone`: a copied running hash would repeat keys.
pub struct KeyDeriver {
    strategy: KeyStrategy,
    running: Sha256,
    chained: u64,
    issued: u64,
}

impl KeyDeriver {
    #[must_use]
    pub fn new(strategy: KeyStrategy) -> Self {
        Self {
            strategy,
            running: Sha256::new(),
            chained: 0,
            issued: 0,
        }
    }

    /// Start a new key chain. No effect on independent keys.
    pub fn reset(&mut self) {
        self.running = Sha256::new();
        self.chained = 0;
    }

    /// Tokens fed into the current chain since the last [`reset`](Self::reset).
    #[must_use]
    pub fn chained(&self) -> u64 {
        self.chained
    }

    /// Number of keys handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Derive the next key.
    pub fn next_key(&mut self) -> String {
        let token = Uuid::new_v4().to_string();
        self.next_key_from(token.as_bytes())
    }

    /// Derive a key from a caller-supplied token.
    pub(crate) fn next_key_from(&mut self, token: &[u8]) -> String {
        self.issued += 1;
        match self.strategy {
            KeyStrategy::Independent => {
                let mut hasher = Sha256::new();
                hasher.update(token);
                format!("{:x}", hasher.finalize())
            }
            KeyStrategy::Cumulative => {
                self.running.update(token);
                self.chained += 1;
                // Digest of everything fed so far; the context keeps running.
                format!("{:x}", self.running.clone().finalize())
            }
        }
    }
}

impl fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDeriver")
            .field("strategy", &self.strategy)
            .field("chained", &self.chained)
            .field("issued", &self.issued)
            .finish_non_exhaustive()
    }
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new(KeyStrategy::default())
    }
}
