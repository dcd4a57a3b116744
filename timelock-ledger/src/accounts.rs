//! Account bookkeeping
//!
//! Balances and unlock state per principal. This layer enforces amount and
//! tick validity and the tranche partition; authorization and history live
//! in [`crate::ledger`].
//!
//! # Invariants
//!
//! - Tiered accounts: `balance == Σ tranche.amount`, no zero tranches
//! - Tranches sorted by `release_tick`, ties in creation order
//! - Single accounts: whole balance gated by `unlock_tick`

use crate::{
    types::{Account, Amount, Principal, Tick, Tranche, UnlockPolicy},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-principal accounts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountBook {
    accounts: BTreeMap<Principal, Account>,
}

impl AccountBook {
    /// Create empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for `principal`, if one exists
    pub fn get(&self, principal: &Principal) -> Option<&Account> {
        self.accounts.get(principal)
    }

    /// Total balance (zero for unknown principals)
    pub fn balance(&self, principal: &Principal) -> Amount {
        self.get(principal).map(|a| a.balance).unwrap_or(0)
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// True when no account exists
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Principals holding an account, in order
    pub fn principals(&self) -> impl Iterator<Item = &Principal> {
        self.accounts.keys()
    }

    /// Sum of all balances
    pub fn total_balance(&self) -> u128 {
        self.accounts.values().map(|a| a.balance as u128).sum()
    }

    /// Add immediately available funds
    pub fn credit_available(&mut self, principal: &Principal, amount: Amount, now: Tick) -> Result<()> {
        require_positive(amount)?;
        let account = self.accounts.entry(principal.clone()).or_default();
        let balance = checked_credit(account.balance, amount)?;

        if let UnlockPolicy::Tiered { tranches } = &mut account.policy {
            insert_tranche(
                tranches,
                Tranche {
                    amount,
                    release_tick: now,
                },
            );
        }
        account.balance = balance;
        Ok(())
    }

    /// Add funds straight into a locked tranche
    pub fn credit_locked(
        &mut self,
        principal: &Principal,
        amount: Amount,
        release_tick: Tick,
        now: Tick,
    ) -> Result<()> {
        require_positive(amount)?;
        require_future(release_tick, now)?;

        let account = self.accounts.entry(principal.clone()).or_default();
        let balance = checked_credit(account.balance, amount)?;
        let mut tranches = take_tranches(account);
        insert_tranche(
            &mut tranches,
            Tranche {
                amount,
                release_tick,
            },
        );
        account.policy = UnlockPolicy::Tiered { tranches };
        account.balance = balance;
        Ok(())
    }

    /// Set the unlock tick of a single-policy account (last write wins)
    pub fn set_unlock_tick(&mut self, principal: &Principal, height: Tick, now: Tick) -> Result<()> {
        require_future(height, now)?;

        let account = self.accounts.entry(principal.clone()).or_default();
        match &mut account.policy {
            UnlockPolicy::Single { unlock_tick } => {
                *unlock_tick = height;
                Ok(())
            }
            UnlockPolicy::Tiered { .. } => Err(Error::InvalidArgument(format!(
                "account {} uses tiered unlock",
                principal
            ))),
        }
    }

    /// Move `amount` of the unallocated balance into a new locked tranche
    pub fn add_tier(
        &mut self,
        principal: &Principal,
        amount: Amount,
        release_tick: Tick,
        now: Tick,
    ) -> Result<()> {
        require_positive(amount)?;
        require_future(release_tick, now)?;

        let account = self
            .accounts
            .get_mut(principal)
            .ok_or_else(|| Error::InvalidAmount(format!("{} has no balance to allocate", principal)))?;

        let unallocated = account.unlocked_balance(now);
        if amount > unallocated {
            return Err(Error::InvalidAmount(format!(
                "tier amount {} exceeds unallocated balance {}",
                amount, unallocated
            )));
        }

        let mut tranches = take_tranches(account);
        drain_front(&mut tranches, amount, Some(now));
        insert_tranche(
            &mut tranches,
            Tranche {
                amount,
                release_tick,
            },
        );
        account.policy = UnlockPolicy::Tiered { tranches };
        Ok(())
    }

    /// Withdraw `amount` of unlocked funds
    pub fn withdraw(&mut self, principal: &Principal, amount: Amount, now: Tick) -> Result<()> {
        let mut fresh = Account::default();
        let account = match self.accounts.get_mut(principal) {
            Some(account) => account,
            None => &mut fresh,
        };

        match &mut account.policy {
            UnlockPolicy::Single { unlock_tick } => {
                if now < *unlock_tick {
                    return Err(Error::NotUnlocked(format!(
                        "tick {} is before unlock tick {}",
                        now, unlock_tick
                    )));
                }
                require_within(amount, account.balance)?;
            }
            UnlockPolicy::Tiered { tranches } => {
                require_within(amount, account.balance)?;
                let released: Amount = tranches
                    .iter()
                    .filter(|t| t.is_released(now))
                    .map(|t| t.amount)
                    .sum();
                if amount > released {
                    return Err(Error::NotUnlocked(format!(
                        "requested {} but only {} is released",
                        amount, released
                    )));
                }
                drain_front(tranches, amount, Some(now));
            }
        }

        account.balance -= amount;
        collapse_empty_tiers(account);
        Ok(())
    }

    /// Withdraw everything released at `now`, returning the sum
    pub fn withdraw_released(&mut self, principal: &Principal, now: Tick) -> Result<Amount> {
        let account = self
            .accounts
            .get_mut(principal)
            .ok_or_else(|| Error::InvalidAmount(format!("{} has nothing to withdraw", principal)))?;

        let released = match &mut account.policy {
            UnlockPolicy::Single { unlock_tick } => {
                if now < *unlock_tick {
                    return Err(Error::NotUnlocked(format!(
                        "tick {} is before unlock tick {}",
                        now, unlock_tick
                    )));
                }
                account.balance
            }
            UnlockPolicy::Tiered { tranches } => {
                let released: Amount = tranches
                    .iter()
                    .filter(|t| t.is_released(now))
                    .map(|t| t.amount)
                    .sum();
                tranches.retain(|t| !t.is_released(now));
                released
            }
        };

        if released == 0 {
            return Err(Error::InvalidAmount(format!(
                "{} has no released funds",
                principal
            )));
        }
        account.balance -= released;
        collapse_empty_tiers(account);
        Ok(released)
    }

    /// Debit `amount` regardless of locks (emergency path)
    ///
    /// Tiered accounts give up released tranches first, then locked ones
    /// by ascending release tick.
    pub fn debit_unchecked_lock(&mut self, principal: &Principal, amount: Amount) -> Result<()> {
        let account = self
            .accounts
            .get_mut(principal)
            .ok_or_else(|| Error::NotFound(format!("no account for {}", principal)))?;
        require_within(amount, account.balance)?;

        if let UnlockPolicy::Tiered { tranches } = &mut account.policy {
            drain_front(tranches, amount, None);
        }
        account.balance -= amount;
        collapse_empty_tiers(account);
        Ok(())
    }

    /// Verify the tranche partition of `principal`
    pub fn check_partition(&self, principal: &Principal) -> Result<()> {
        let Some(account) = self.get(principal) else {
            return Ok(());
        };
        if let UnlockPolicy::Tiered { tranches } = &account.policy {
            let sum: u128 = tranches.iter().map(|t| t.amount as u128).sum();
            if sum != account.balance as u128 {
                return Err(Error::InvariantViolation(format!(
                    "{}: balance {} != tranche sum {}",
                    principal, account.balance, sum
                )));
            }
            if tranches.iter().any(|t| t.amount == 0) {
                return Err(Error::InvariantViolation(format!(
                    "{}: zero tranche retained",
                    principal
                )));
            }
            if tranches.windows(2).any(|w| w[0].release_tick > w[1].release_tick) {
                return Err(Error::InvariantViolation(format!(
                    "{}: tranches out of order",
                    principal
                )));
            }
        }
        Ok(())
    }
}

fn require_positive(amount: Amount) -> Result<()> {
    if amount == 0 {
        return Err(Error::InvalidAmount("amount must be positive".to_string()));
    }
    Ok(())
}

fn require_within(amount: Amount, balance: Amount) -> Result<()> {
    require_positive(amount)?;
    if amount > balance {
        return Err(Error::InvalidAmount(format!(
            "amount {} exceeds balance {}",
            amount, balance
        )));
    }
    Ok(())
}

fn require_future(tick: Tick, now: Tick) -> Result<()> {
    if tick <= now {
        return Err(Error::InvalidAmount(format!(
            "tick {} is not after current tick {}",
            tick, now
        )));
    }
    Ok(())
}

fn checked_credit(balance: Amount, amount: Amount) -> Result<Amount> {
    balance
        .checked_add(amount)
        .ok_or_else(|| Error::InvalidAmount("balance overflow".to_string()))
}

/// Take the tranche list out of `account`; a single pool becomes one
/// tranche released at the old unlock tick. The caller stores the list back
/// as `UnlockPolicy::Tiered`.
fn take_tranches(account: &mut Account) -> Vec<Tranche> {
    match std::mem::take(&mut account.policy) {
        UnlockPolicy::Tiered { tranches } => tranches,
        UnlockPolicy::Single { unlock_tick } if account.balance > 0 => vec![Tranche {
            amount: account.balance,
            release_tick: unlock_tick,
        }],
        UnlockPolicy::Single { .. } => Vec::new(),
    }
}

/// A tiered account with no tranches left goes back to an open single pool
fn collapse_empty_tiers(account: &mut Account) {
    if matches!(&account.policy, UnlockPolicy::Tiered { tranches } if tranches.is_empty()) {
        account.policy = UnlockPolicy::default();
    }
}

fn insert_tranche(tranches: &mut Vec<Tranche>, tranche: Tranche) {
    let pos = tranches.partition_point(|t| t.release_tick <= tranche.release_tick);
    tranches.insert(pos, tranche);
}

/// Consume `amount` from the front of the (sorted) tranche list. With
/// `released_at`, only tranches released at that tick are eligible; the
/// caller has already checked they cover `amount`.
fn drain_front(tranches: &mut Vec<Tranche>, mut amount: Amount, released_at: Option<Tick>) {
    for tranche in tranches.iter_mut() {
        if amount == 0 {
            break;
        }
        if let Some(now) = released_at {
            if !tranche.is_released(now) {
                break;
            }
        }
        let take = tranche.amount.min(amount);
        tranche.amount -= take;
        amount -= take;
    }
    tranches.retain(|t| t.amount > 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Principal {
        Principal::new("alice")
    }

    #[test]
    fn test_deposit_rejects_zero() {
        let mut book = AccountBook::new();
        let err = book.credit_available(&alice(), 0, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
        assert!(book.is_empty());
    }

    #[test]
    fn test_single_withdraw_boundary() {
        let mut book = AccountBook::new();
        book.credit_available(&alice(), 500, 0).unwrap();
        book.set_unlock_tick(&alice(), 100, 0).unwrap();

        assert!(matches!(book.withdraw(&alice(), 100, 99), Err(Error::NotUnlocked(_))));
        assert!(matches!(book.withdraw(&alice(), 600, 100), Err(Error::InvalidAmount(_))));
        book.withdraw(&alice(), 100, 100).unwrap();
        assert_eq!(book.balance(&alice()), 400);
    }

    #[test]
    fn test_set_unlock_requires_future_tick() {
        let mut book = AccountBook::new();
        assert!(matches!(
            book.set_unlock_tick(&alice(), 50, 100),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            book.set_unlock_tick(&alice(), 100, 100),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_add_tier_partitions_balance() {
        let mut book = AccountBook::new();
        book.credit_available(&alice(), 300, 1).unwrap();
        book.add_tier(&alice(), 100, 6, 1).unwrap();

        let account = book.get(&alice()).unwrap();
        assert_eq!(account.balance, 300);
        assert_eq!(account.unlocked_balance(1), 200);
        assert_eq!(account.tranches().len(), 2);
        book.check_partition(&alice()).unwrap();
    }

    #[test]
    fn test_add_tier_limited_to_unallocated() {
        let mut book = AccountBook::new();
        book.credit_available(&alice(), 300, 1).unwrap();
        book.add_tier(&alice(), 200, 10, 1).unwrap();
        assert!(matches!(
            book.add_tier(&alice(), 150, 10, 1),
            Err(Error::InvalidAmount(_))
        ));
        assert!(matches!(
            book.add_tier(&alice(), 50, 1, 1),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_withdraw_released_keeps_locked() {
        let mut book = AccountBook::new();
        book.credit_available(&alice(), 300, 1).unwrap();
        book.add_tier(&alice(), 100, 3, 2).unwrap();

        // Only the 200 unallocated is released at tick 2
        assert_eq!(book.withdraw_released(&alice(), 2).unwrap(), 200);
        assert_eq!(book.balance(&alice()), 100);
        assert!(matches!(
            book.withdraw_released(&alice(), 2),
            Err(Error::InvalidAmount(_))
        ));

        assert_eq!(book.withdraw_released(&alice(), 3).unwrap(), 100);
        assert_eq!(book.balance(&alice()), 0);
        book.check_partition(&alice()).unwrap();
    }

    #[test]
    fn test_tiered_partial_withdraw() {
        let mut book = AccountBook::new();
        book.credit_locked(&alice(), 100, 10, 0).unwrap();
        book.credit_available(&alice(), 50, 0).unwrap();

        assert!(matches!(book.withdraw(&alice(), 80, 5), Err(Error::NotUnlocked(_))));
        book.withdraw(&alice(), 30, 5).unwrap();
        assert_eq!(book.get(&alice()).unwrap().unlocked_balance(5), 20);
        book.check_partition(&alice()).unwrap();
    }

    #[test]
    fn test_conversion_preserves_single_lock() {
        let mut book = AccountBook::new();
        book.credit_available(&alice(), 100, 0).unwrap();
        book.set_unlock_tick(&alice(), 50, 0).unwrap();
        book.credit_locked(&alice(), 40, 20, 0).unwrap();

        let account = book.get(&alice()).unwrap();
        assert!(account.is_tiered());
        assert_eq!(account.unlocked_balance(19), 0);
        assert_eq!(account.unlocked_balance(20), 40);
        assert_eq!(account.unlocked_balance(50), 140);
        assert!(matches!(
            book.set_unlock_tick(&alice(), 60, 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_tie_break_is_fifo() {
        let mut book = AccountBook::new();
        book.credit_locked(&alice(), 10, 5, 0).unwrap();
        book.credit_locked(&alice(), 20, 5, 0).unwrap();
        book.credit_locked(&alice(), 30, 3, 0).unwrap();

        let amounts: Vec<Amount> = book.get(&alice()).unwrap().tranches().iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![30, 10, 20]);
    }

    #[test]
    fn test_emergency_debit_drains_earliest_first() {
        let mut book = AccountBook::new();
        book.credit_locked(&alice(), 100, 10, 0).unwrap();
        book.credit_locked(&alice(), 100, 20, 0).unwrap();
        book.debit_unchecked_lock(&alice(), 150).unwrap();

        let tranches = book.get(&alice()).unwrap().tranches().to_vec();
        assert_eq!(tranches, vec![Tranche { amount: 50, release_tick: 20 }]);
        assert!(matches!(
            book.debit_unchecked_lock(&Principal::new("bob"), 1),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_drained_tiers_reopen_single_unlock() {
        let mut book = AccountBook::new();
        book.credit_locked(&alice(), 100, 5, 1).unwrap();
        book.withdraw_released(&alice(), 5).unwrap();
        assert_eq!(book.get(&alice()).unwrap().policy, UnlockPolicy::default());

        book.credit_locked(&alice(), 40, 9, 5).unwrap();
        book.debit_unchecked_lock(&alice(), 40).unwrap();
        book.set_unlock_tick(&alice(), 20, 5).unwrap();
        assert_eq!(
            book.get(&alice()).unwrap().policy,
            UnlockPolicy::Single { unlock_tick: 20 }
        );
    }
}
