//! Ledger state machine
//!
//! This module ties together accounts, interest, penalties, history, and
//! reminders into the operation surface callers see. Every mutation takes
//! the caller explicitly, reads the tick once, validates everything it is
//! about to touch, and only then mutates; a rejected call leaves the state
//! exactly as it was.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use timelock_ledger::{ManualClock, Principal, TimelockLedger, config::LedgerConfig};
//!
//! # fn main() -> timelock_ledger::Result<()> {
//! let clock = Arc::new(ManualClock::new(1));
//! let mut ledger = TimelockLedger::new(LedgerConfig::default(), clock.clone())?;
//!
//! let alice = Principal::new("alice");
//! ledger.deposit(&alice, 500)?;
//! assert_eq!(ledger.get_balance(&alice), 500);
//! # Ok(())
//! # }
//! ```

use crate::{
    accounts::AccountBook,
    clock::TickSource,
    config::LedgerConfig,
    events::{EventBuffer, EventTopic, LedgerEvent},
    history::TransactionLog,
    interest::InterestBook,
    metrics::Metrics,
    penalty,
    reminders::ReminderRegistry,
    types::{
        Account, Amount, LockInfo, Principal, Reminder, Tick, Tranche, TransactionKind,
        TransactionRecord, TransactionSummary,
    },
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persisted ledger state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    /// Balances and unlock policies
    pub accounts: AccountBook,

    /// Rates and lock metadata
    pub interest: InterestBook,

    /// Audit log
    pub history: TransactionLog,

    /// Scheduled notifications
    pub reminders: ReminderRegistry,
}

/// State and event buffer as of some earlier write
pub(crate) struct Checkpoint {
    state: LedgerState,
    events: EventBuffer,
}

/// Custodial time-lock ledger
pub struct TimelockLedger {
    config: LedgerConfig,
    clock: Arc<dyn TickSource>,
    state: LedgerState,
    events: EventBuffer,
    metrics: Metrics,
}

impl std::fmt::Debug for TimelockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelockLedger")
            .field("config", &self.config)
            .field("tick", &self.current_tick())
            .field("accounts", &self.state.accounts.len())
            .finish()
    }
}

impl TimelockLedger {
    /// Create an empty ledger
    pub fn new(config: LedgerConfig, clock: Arc<dyn TickSource>) -> Result<Self> {
        Self::from_state(config, clock, LedgerState::default())
    }

    /// Rebuild a ledger from persisted state, verifying its invariants
    pub fn from_state(
        config: LedgerConfig,
        clock: Arc<dyn TickSource>,
        state: LedgerState,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = Self {
            events: EventBuffer::new(config.event_buffer_capacity),
            metrics: Metrics::new()?,
            config,
            clock,
            state,
        };
        ledger.check_invariants()?;
        Ok(ledger)
    }

    /// Current state (for snapshots)
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Capture state and events so a write can be undone
    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            state: self.state.clone(),
            events: self.events.clone(),
        }
    }

    /// Return to a previously captured checkpoint
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.state = checkpoint.state;
        self.events = checkpoint.events;
    }

    /// Ledger configuration
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Owner principal
    pub fn owner(&self) -> &Principal {
        &self.config.owner
    }

    /// Recorder principal
    pub fn recorder(&self) -> &Principal {
        &self.config.recorder
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Tick as reported by the clock source
    pub fn current_tick(&self) -> Tick {
        self.clock.current_tick()
    }

    // Account ledger

    /// Deposit immediately available funds
    pub fn deposit(&mut self, caller: &Principal, amount: Amount) -> Result<()> {
        self.run("deposit", caller, |ledger, now| {
            ledger.state.accounts.credit_available(caller, amount, now)?;
            ledger.append_history(caller, TransactionKind::Deposit, amount, now);
            ledger.metrics.deposits_total.inc();
            ledger.events.emit(now, EventTopic::Deposit, caller, Some(amount), None);
            Ok(())
        })
    }

    /// Deposit straight into a tranche released at `release_tick`
    pub fn deposit_locked(
        &mut self,
        caller: &Principal,
        amount: Amount,
        release_tick: Tick,
    ) -> Result<()> {
        self.run("deposit_locked", caller, |ledger, now| {
            ledger
                .state
                .accounts
                .credit_locked(caller, amount, release_tick, now)?;
            ledger.append_history(caller, TransactionKind::Deposit, amount, now);
            ledger.metrics.deposits_total.inc();
            ledger.events.emit(
                now,
                EventTopic::Deposit,
                caller,
                Some(amount),
                Some(release_tick),
            );
            Ok(())
        })
    }

    /// Set the unlock tick of `principal`'s single-policy account
    ///
    /// Owner only. Also records lock metadata (current balance, locked from
    /// now until `height`) for interest estimation.
    pub fn set_unlock_height(
        &mut self,
        caller: &Principal,
        principal: &Principal,
        height: Tick,
    ) -> Result<()> {
        self.run("set_unlock_height", caller, |ledger, now| {
            ledger.require_owner(caller)?;
            ledger.state.accounts.set_unlock_tick(principal, height, now)?;
            ledger.state.interest.set_lock(
                principal,
                LockInfo {
                    principal_amount: ledger.state.accounts.balance(principal),
                    deposit_tick: now,
                    unlock_tick: height,
                },
            );
            ledger
                .events
                .emit(now, EventTopic::SetUnlockHeight, principal, None, Some(height));
            Ok(())
        })
    }

    /// Lock `amount` of the caller's unallocated balance until `release_tick`
    pub fn add_tier(&mut self, caller: &Principal, amount: Amount, release_tick: Tick) -> Result<()> {
        self.run("add_tier", caller, |ledger, now| {
            ledger
                .state
                .accounts
                .add_tier(caller, amount, release_tick, now)?;
            ledger
                .events
                .emit(now, EventTopic::AddTier, caller, Some(amount), Some(release_tick));
            Ok(())
        })
    }

    /// Withdraw `amount` of unlocked funds
    pub fn withdraw(&mut self, caller: &Principal, amount: Amount) -> Result<()> {
        self.run("withdraw", caller, |ledger, now| {
            ledger.state.accounts.withdraw(caller, amount, now)?;
            ledger.complete_withdrawal(caller, amount, now);
            Ok(())
        })
    }

    /// Withdraw every released tranche (or the whole unlocked single pool)
    pub fn withdraw_released(&mut self, caller: &Principal) -> Result<Amount> {
        self.run("withdraw_released", caller, |ledger, now| {
            let amount = ledger.state.accounts.withdraw_released(caller, now)?;
            ledger.complete_withdrawal(caller, amount, now);
            Ok(amount)
        })
    }

    // Penalty / emergency withdrawal

    /// Withdraw ignoring locks; the owner keeps a penalty
    ///
    /// Returns the payout (`amount - penalty`). The caller's history records
    /// the gross `amount`; the owner's records the penalty.
    pub fn emergency_withdraw(&mut self, caller: &Principal, amount: Amount) -> Result<Amount> {
        self.run("emergency_withdraw", caller, |ledger, now| {
            let balance = ledger
                .state
                .accounts
                .get(caller)
                .map(|a| a.balance)
                .ok_or_else(|| Error::NotFound(format!("no account for {}", caller)))?;
            if amount == 0 || amount > balance {
                return Err(Error::InvalidAmount(format!(
                    "emergency amount {} outside 1..={}",
                    amount, balance
                )));
            }

            let split = penalty::split(amount, ledger.config.penalty_rate_percent)?;
            let owner = ledger.config.owner.clone();
            if owner != *caller
                && ledger
                    .state
                    .accounts
                    .balance(&owner)
                    .checked_add(split.penalty)
                    .is_none()
            {
                return Err(Error::InvalidAmount("owner balance overflow".to_string()));
            }

            ledger.state.accounts.debit_unchecked_lock(caller, amount)?;
            ledger.append_history(caller, TransactionKind::EmergencyWithdrawal, amount, now);
            if split.penalty > 0 {
                ledger.state.accounts.credit_available(&owner, split.penalty, now)?;
                ledger.append_history(&owner, TransactionKind::PenaltyCredit, split.penalty, now);
            }

            ledger.metrics.record_emergency(split.penalty);
            ledger
                .events
                .emit(now, EventTopic::EmergencyWithdraw, caller, Some(amount), None);
            tracing::debug!(
                caller = %caller,
                amount,
                penalty = split.penalty,
                payout = split.payout,
                "Emergency withdrawal"
            );
            Ok(split.payout)
        })
    }

    // Interest

    /// Choose the caller's interest rate (percent, positive)
    pub fn set_interest_rate(&mut self, caller: &Principal, rate: u64) -> Result<()> {
        self.run("set_interest_rate", caller, |ledger, now| {
            ledger.state.interest.set_rate(caller, rate)?;
            ledger
                .events
                .emit(now, EventTopic::SetInterestRate, caller, Some(rate), None);
            Ok(())
        })
    }

    /// Record lock metadata for `principal` (owner only)
    pub fn set_lock_data(&mut self, caller: &Principal, principal: &Principal, lock: LockInfo) -> Result<()> {
        self.run("set_lock_data", caller, |ledger, now| {
            ledger.require_owner(caller)?;
            ledger.state.interest.set_lock(principal, lock);
            ledger.events.emit(
                now,
                EventTopic::SetLockData,
                principal,
                Some(lock.principal_amount),
                Some(lock.unlock_tick),
            );
            Ok(())
        })
    }

    /// Realize the caller's accrued interest once the lock has matured
    ///
    /// Consumes the lock metadata, so a second call fails with `NotFound`.
    pub fn credit_interest(&mut self, caller: &Principal) -> Result<Amount> {
        self.run("credit_interest", caller, |ledger, now| {
            let lock = ledger
                .state
                .interest
                .lock(caller)
                .ok_or_else(|| Error::NotFound(format!("no lock data for {}", caller)))?;
            if now < lock.unlock_tick {
                return Err(Error::NotUnlocked(format!(
                    "lock matures at {}, now {}",
                    lock.unlock_tick, now
                )));
            }

            let interest = ledger
                .state
                .interest
                .accrued(caller, ledger.config.default_interest_rate)?;
            if interest > 0 {
                ledger.state.accounts.credit_available(caller, interest, now)?;
                ledger.append_history(caller, TransactionKind::InterestCredit, interest, now);
            }
            ledger.state.interest.take_lock(caller);
            ledger
                .events
                .emit(now, EventTopic::CreditInterest, caller, Some(interest), None);
            Ok(interest)
        })
    }

    // Transaction history

    /// Append a record on behalf of `principal` (recorder only)
    pub fn record_transaction(
        &mut self,
        caller: &Principal,
        principal: &Principal,
        kind: TransactionKind,
        amount: Amount,
        tick: Tick,
    ) -> Result<TransactionRecord> {
        self.run("record_transaction", caller, |ledger, now| {
            if *caller != ledger.config.recorder {
                return Err(Error::Unauthorized(format!(
                    "{} is not the recorder",
                    caller
                )));
            }
            let record = ledger.append_history(principal, kind, amount, tick);
            ledger
                .events
                .emit(now, EventTopic::RecordTransaction, principal, Some(amount), Some(tick));
            Ok(record)
        })
    }

    // Reminders

    /// Schedule a reminder for the caller; returns its id
    pub fn set_reminder(&mut self, caller: &Principal, message: &str, due_tick: Tick) -> Result<u64> {
        self.run("set_reminder", caller, |ledger, now| {
            let id = ledger.state.reminders.set(caller, message, due_tick, now)?;
            ledger.metrics.record_reminder("scheduled");
            ledger
                .events
                .emit(now, EventTopic::SetReminder, caller, None, Some(due_tick));
            Ok(id)
        })
    }

    /// Acknowledge delivery of `principal`'s reminder `id`
    ///
    /// Only the reminder's owner may mark it. Marking twice succeeds
    /// without effect.
    pub fn mark_as_notified(&mut self, caller: &Principal, principal: &Principal, id: u64) -> Result<()> {
        self.run("mark_as_notified", caller, |ledger, now| {
            if caller != principal {
                return Err(Error::Unauthorized(format!(
                    "{} cannot mark reminders of {}",
                    caller, principal
                )));
            }
            if ledger.state.reminders.mark_notified(principal, id)? {
                ledger.metrics.record_reminder("notified");
                ledger
                    .events
                    .emit(now, EventTopic::MarkAsNotified, principal, None, Some(id));
            }
            Ok(())
        })
    }

    // Read-only queries

    /// Total balance (0 for unknown principals)
    pub fn get_balance(&self, principal: &Principal) -> Amount {
        self.state.accounts.balance(principal)
    }

    /// Balance withdrawable now
    pub fn get_unlocked_balance(&self, principal: &Principal) -> Amount {
        let now = self.current_tick();
        self.state
            .accounts
            .get(principal)
            .map(|a| a.unlocked_balance(now))
            .unwrap_or(0)
    }

    /// Balance still locked now
    pub fn get_locked_balance(&self, principal: &Principal) -> Amount {
        let now = self.current_tick();
        self.state
            .accounts
            .get(principal)
            .map(|a| a.locked_balance(now))
            .unwrap_or(0)
    }

    /// Unlock tick (0 for unknown principals)
    ///
    /// For tiered accounts this is the release tick of the last tranche,
    /// i.e. the tick from which the whole balance is withdrawable.
    pub fn get_unlock_height(&self, principal: &Principal) -> Tick {
        match self.state.accounts.get(principal) {
            None => 0,
            Some(account) => account.unlock_tick().unwrap_or_else(|| {
                account
                    .tranches()
                    .last()
                    .map(|t| t.release_tick)
                    .unwrap_or(0)
            }),
        }
    }

    /// Tranches of a tiered account (empty otherwise)
    pub fn get_tiers(&self, principal: &Principal) -> Vec<Tranche> {
        self.state
            .accounts
            .get(principal)
            .map(|a| a.tranches().to_vec())
            .unwrap_or_default()
    }

    /// Copy of the account, if any
    pub fn get_account(&self, principal: &Principal) -> Option<Account> {
        self.state.accounts.get(principal).cloned()
    }

    /// Interest owed; zero without lock metadata
    pub fn estimate_interest(&self, principal: &Principal) -> Amount {
        self.state
            .interest
            .estimate(principal, self.config.default_interest_rate)
    }

    /// Interest owed; `NotFound` without lock metadata
    pub fn calculate_accrued_interest(&self, principal: &Principal) -> Result<Amount> {
        self.state
            .interest
            .accrued(principal, self.config.default_interest_rate)
    }

    /// Effective interest rate (percent)
    pub fn get_interest_rate(&self, principal: &Principal) -> u64 {
        self.state
            .interest
            .rate(principal, self.config.default_interest_rate)
    }

    /// Lock metadata, if any
    pub fn get_lock_data(&self, principal: &Principal) -> Option<LockInfo> {
        self.state.interest.lock(principal)
    }

    /// History record at `index`
    pub fn get_transaction(&self, principal: &Principal, index: u64) -> Result<TransactionRecord> {
        self.state.history.get(principal, index)
    }

    /// Number of history records
    pub fn get_transaction_count(&self, principal: &Principal) -> u64 {
        self.state.history.count(principal)
    }

    /// Whole history in order
    pub fn get_all_transactions(&self, principal: &Principal) -> Vec<TransactionRecord> {
        self.state.history.all(principal)
    }

    /// History filtered to one kind (parsed from its name)
    pub fn get_summary_by_type(&self, principal: &Principal, kind: &str) -> Result<TransactionSummary> {
        self.state.history.summary_by_type(principal, kind)
    }

    /// Recompute `principal`'s history digest chain
    pub fn verify_history(&self, principal: &Principal) -> Result<()> {
        self.state.history.verify(principal)
    }

    /// Merkle root of `principal`'s history
    pub fn history_root(&self, principal: &Principal) -> [u8; 32] {
        self.state.history.root(principal)
    }

    /// Un-notified reminders, by due tick then id
    pub fn get_upcoming_reminders(&self, principal: &Principal) -> Vec<Reminder> {
        self.state.reminders.upcoming(principal)
    }

    /// Un-notified reminders that are due now
    pub fn get_due_reminders(&self, principal: &Principal) -> Vec<Reminder> {
        self.state.reminders.due(principal, self.current_tick())
    }

    /// Recently emitted events, oldest first
    pub fn recent_events(&self) -> Vec<LedgerEvent> {
        self.events.recent()
    }

    /// Retained events for one topic
    pub fn events_by_topic(&self, topic: EventTopic) -> Vec<LedgerEvent> {
        self.events.by_topic(topic)
    }

    /// Verify every account partition and history chain
    pub fn check_invariants(&self) -> Result<()> {
        for principal in self.state.accounts.principals() {
            self.state.accounts.check_partition(principal)?;
        }
        for principal in self.state.history.principals() {
            self.state.history.verify(principal)?;
        }
        Ok(())
    }

    // Internals

    fn run<T>(
        &mut self,
        operation: &'static str,
        caller: &Principal,
        apply: impl FnOnce(&mut Self, Tick) -> Result<T>,
    ) -> Result<T> {
        let now = self.current_tick();
        let _span = tracing::debug_span!("ledger_op", operation, caller = %caller, tick = now).entered();

        let result = apply(self, now);
        match &result {
            Ok(_) => tracing::debug!(operation, "Operation applied"),
            Err(e) => {
                self.metrics.record_rejection(operation, e.code());
                if e.is_rejection() {
                    tracing::warn!(operation, code = e.code(), error = %e, "Operation rejected");
                } else {
                    tracing::error!(operation, error = %e, "Operation failed");
                }
            }
        }
        result
    }

    fn require_owner(&self, caller: &Principal) -> Result<()> {
        if *caller != self.config.owner {
            return Err(Error::OwnerOnly(format!("{} is not the owner", caller)));
        }
        Ok(())
    }

    fn append_history(
        &mut self,
        principal: &Principal,
        kind: TransactionKind,
        amount: Amount,
        tick: Tick,
    ) -> TransactionRecord {
        self.metrics.history_records_total.inc();
        self.state.history.append(principal, kind, amount, tick)
    }

    fn complete_withdrawal(&mut self, caller: &Principal, amount: Amount, now: Tick) {
        self.append_history(caller, TransactionKind::Withdrawal, amount, now);
        self.metrics.withdrawals_total.inc();
        self.events
            .emit(now, EventTopic::Withdraw, caller, Some(amount), None);
    }
}
