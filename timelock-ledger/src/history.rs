//! Append-only transaction history
//!
//! One ordered log per principal. Records are never mutated or removed;
//! indices are gapless from 0 and each record's digest chains over its
//! predecessor so tampering with a stored snapshot is detectable.

use crate::{
    crypto::{chain_digest, merkle_root, GENESIS_DIGEST},
    types::{Amount, Principal, Tick, TransactionKind, TransactionRecord, TransactionSummary},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-principal transaction logs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionLog {
    logs: BTreeMap<Principal, Vec<TransactionRecord>>,
}

impl TransactionLog {
    /// Create empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record with the next index for `principal`
    pub fn append(
        &mut self,
        principal: &Principal,
        kind: TransactionKind,
        amount: Amount,
        tick: Tick,
    ) -> TransactionRecord {
        let log = self.logs.entry(principal.clone()).or_default();
        let index = log.len() as u64;
        let previous = log.last().map(|r| r.digest).unwrap_or(GENESIS_DIGEST);

        let record = TransactionRecord {
            index,
            kind,
            amount,
            tick,
            digest: chain_digest(&previous, index, kind, amount, tick),
        };
        log.push(record.clone());

        tracing::trace!(
            principal = %principal,
            index,
            kind = %kind,
            amount,
            tick,
            digest = %hex::encode(record.digest),
            "History record appended"
        );

        record
    }

    /// Record at `index`
    pub fn get(&self, principal: &Principal, index: u64) -> Result<TransactionRecord> {
        let records = self.records(principal);
        usize::try_from(index)
            .ok()
            .and_then(|i| records.get(i))
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("no transaction {} for {}", index, principal))
            })
    }

    /// Number of records for `principal`
    pub fn count(&self, principal: &Principal) -> u64 {
        self.records(principal).len() as u64
    }

    /// Number of records across all principals
    pub fn total_records(&self) -> u64 {
        self.logs.values().map(|log| log.len() as u64).sum()
    }

    /// Principals with at least one record
    pub fn principals(&self) -> impl Iterator<Item = &Principal> {
        self.logs.keys()
    }

    /// Full log in order
    pub fn all(&self, principal: &Principal) -> Vec<TransactionRecord> {
        self.records(principal).to_vec()
    }

    /// Records of one kind
    ///
    /// `kind` is parsed at this boundary; unknown names are
    /// `InvalidArgument`, and an empty match is `NotFound`.
    pub fn summary_by_type(&self, principal: &Principal, kind: &str) -> Result<TransactionSummary> {
        let kind = TransactionKind::parse(kind)?;
        let records: Vec<TransactionRecord> = self
            .records(principal)
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();

        if records.is_empty() {
            return Err(Error::NotFound(format!(
                "no {} transactions for {}",
                kind, principal
            )));
        }

        Ok(TransactionSummary {
            kind,
            count: records.len() as u64,
            total_amount: records.iter().map(|r| r.amount as u128).sum(),
            records,
        })
    }

    /// Recompute the digest chain of `principal`'s log
    pub fn verify(&self, principal: &Principal) -> Result<()> {
        let mut previous = GENESIS_DIGEST;
        for (position, record) in self.records(principal).iter().enumerate() {
            if record.index != position as u64 {
                return Err(Error::InvariantViolation(format!(
                    "{}: record at position {} has index {}",
                    principal, position, record.index
                )));
            }
            let expected = chain_digest(&previous, record.index, record.kind, record.amount, record.tick);
            if expected != record.digest {
                return Err(Error::InvariantViolation(format!(
                    "{}: digest mismatch at index {}",
                    principal, record.index
                )));
            }
            previous = record.digest;
        }
        Ok(())
    }

    /// Merkle root over `principal`'s record digests
    pub fn root(&self, principal: &Principal) -> [u8; 32] {
        let digests: Vec<[u8; 32]> = self.records(principal).iter().map(|r| r.digest).collect();
        merkle_root(&digests)
    }

    fn records(&self, principal: &Principal) -> &[TransactionRecord] {
        self.logs.get(principal).map(Vec::as_slice).unwrap_or(&[])
    }
}
