//! Hashing for the audit log
//!
//! This module provides:
//! - SHA-256 chaining of history records
//! - Merkle roots over a principal's record digests

use crate::types::{Amount, Tick, TransactionKind};
use sha2::{Digest, Sha256};

/// Digest the first record of a log chains from
pub const GENESIS_DIGEST: [u8; 32] = [0u8; 32];

/// Digest of a history record chained to its predecessor
///
/// Fields are hashed in a fixed big-endian layout so the chain is
/// independent of serialization format.
pub fn chain_digest(
    previous: &[u8; 32],
    index: u64,
    kind: TransactionKind,
    amount: Amount,
    tick: Tick,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(previous);
    hasher.update(index.to_be_bytes());
    hasher.update([kind as u8]);
    hasher.update(amount.to_be_bytes());
    hasher.update(tick.to_be_bytes());
    hasher.finalize().into()
}

/// Create a Merkle root from record digests
///
/// If a level has odd length, the last hash is duplicated.
pub fn merkle_root(hashes: &[[u8; 32]]) -> [u8; 32] {
    if hashes.is_empty() {
        return [0u8; 32];
    }

    let mut current_level: Vec<[u8; 32]> = hashes.to_vec();

    while current_level.len() > 1 {
        let mut next_level: Vec<[u8; 32]> = Vec::with_capacity((current_level.len() + 1) / 2);

        for pair in current_level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);

            let mut hasher = Sha256::new();
            hasher.update(left);
            hasher.update(right);
            next_level.push(hasher.finalize().into());
        }

        current_level = next_level;
    }

    current_level[0]
}
