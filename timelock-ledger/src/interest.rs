//! Interest computation
//!
//! Interest is a pure function of lock metadata and rate:
//!
//! ```text
//! interest = principal_amount * rate * (unlock_tick - deposit_tick) / 36500
//! ```
//!
//! computed in `u128` with truncating division. Nothing here accrues on its
//! own; crediting is an explicit ledger operation.

use crate::{
    types::{Amount, LockInfo, Principal},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Divisor of the interest formula (percent × days-per-year)
pub const INTEREST_DIVISOR: u128 = 36_500;

/// Compute interest for `lock` at `rate` percent
pub fn compute_interest(lock: &LockInfo, rate: u64) -> Amount {
    (lock.principal_amount as u128)
        .checked_mul(rate as u128)
        .and_then(|v| v.checked_mul(lock.duration() as u128))
        .map(|v| v / INTEREST_DIVISOR)
        .and_then(|v| Amount::try_from(v).ok())
        .unwrap_or(Amount::MAX)
}

/// Per-principal rates and lock metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterestBook {
    rates: BTreeMap<Principal, u64>,
    locks: BTreeMap<Principal, LockInfo>,
}

impl InterestBook {
    /// Create empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rate (percent) for `principal`
    pub fn set_rate(&mut self, principal: &Principal, rate: u64) -> Result<()> {
        if rate == 0 {
            return Err(Error::InvalidAmount("interest rate must be positive".to_string()));
        }
        self.rates.insert(principal.clone(), rate);
        Ok(())
    }

    /// Rate for `principal`, falling back to `default_rate`
    pub fn rate(&self, principal: &Principal, default_rate: u64) -> u64 {
        self.rates.get(principal).copied().unwrap_or(default_rate)
    }

    /// Record lock metadata (overwrites)
    pub fn set_lock(&mut self, principal: &Principal, lock: LockInfo) {
        self.locks.insert(principal.clone(), lock);
    }

    /// Lock metadata for `principal`
    pub fn lock(&self, principal: &Principal) -> Option<LockInfo> {
        self.locks.get(principal).copied()
    }

    /// Remove and return lock metadata
    pub fn take_lock(&mut self, principal: &Principal) -> Option<LockInfo> {
        self.locks.remove(principal)
    }

    /// Interest owed, or zero when no lock metadata exists
    pub fn estimate(&self, principal: &Principal, default_rate: u64) -> Amount {
        self.lock(principal)
            .map(|lock| compute_interest(&lock, self.rate(principal, default_rate)))
            .unwrap_or(0)
    }

    /// Interest owed; `NotFound` when no lock metadata exists
    pub fn accrued(&self, principal: &Principal, default_rate: u64) -> Result<Amount> {
        let lock = self
            .lock(principal)
            .ok_or_else(|| Error::NotFound(format!("no lock data for {}", principal)))?;
        Ok(compute_interest(&lock, self.rate(principal, default_rate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Principal {
        Principal::new("wallet-owner")
    }

    #[test]
    fn test_reference_calculation() {
        let lock = LockInfo {
            principal_amount: 1_000_000,
            deposit_tick: 10,
            unlock_tick: 50,
        };
        // 1000000 * 5 * 40 / 36500 = 5479.45...
        assert_eq!(compute_interest(&lock, 5), 5479);
    }

    #[test]
    fn test_estimate_vs_accrued_without_data() {
        let book = InterestBook::new();
        assert_eq!(book.estimate(&user(), 5), 0);
        assert!(matches!(book.accrued(&user(), 5), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_rate_defaults_and_overrides() {
        let mut book = InterestBook::new();
        assert_eq!(book.rate(&user(), 5), 5);
        book.set_rate(&user(), 10).unwrap();
        assert_eq!(book.rate(&user(), 5), 10);
        assert!(matches!(book.set_rate(&user(), 0), Err(Error::InvalidAmount(_))));
        assert_eq!(book.rate(&user(), 5), 10);
    }

    #[test]
    fn test_inverted_lock_yields_zero() {
        let lock = LockInfo {
            principal_amount: 1_000,
            deposit_tick: 90,
            unlock_tick: 10,
        };
        assert_eq!(compute_interest(&lock, 5), 0);
    }

    #[test]
    fn test_large_values_saturate() {
        let lock = LockInfo {
            principal_amount: Amount::MAX,
            deposit_tick: 0,
            unlock_tick: u64::MAX,
        };
        assert_eq!(compute_interest(&lock, u64::MAX), Amount::MAX);
    }
}
