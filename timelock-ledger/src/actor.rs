//! Single-writer sequencer for the ledger
//!
//! All mutations funnel through one Tokio task, so they are applied one at a
//! time in mailbox order. Reads go straight to the shared ledger under a
//! read lock and never wait behind the mailbox.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │             SequencerHandle (Clone)                   │
//! │   async mutators ──┐          read(|ledger| ...) ─┐   │
//! └────────────────────┼──────────────────────────────┼───┘
//!                      │ mpsc::channel (bounded)      │
//!                      ▼                              │
//! ┌──────────────────────────────────────────────────┐ │
//! │              Sequencer (Single Task)              │ │
//! │   write lock → apply → StateStore::save()         │ │
//! └─────────────────────┬────────────────────────────┘ │
//!                       ▼                              ▼
//!            Arc<RwLock<TimelockLedger>> ◄──────────────┘
//! ```

use crate::{
    clock::TickSource,
    config::Config,
    ledger::TimelockLedger,
    storage::StateStore,
    types::{Amount, LockInfo, Principal, Tick, TransactionKind, TransactionRecord},
    Error, Result,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Mutation sent to the sequencer
#[derive(Debug)]
pub enum Command {
    /// Deposit available funds
    Deposit {
        caller: Principal,
        amount: Amount,
        response: Reply<()>,
    },

    /// Deposit into a tranche
    DepositLocked {
        caller: Principal,
        amount: Amount,
        release_tick: Tick,
        response: Reply<()>,
    },

    /// Set an account's unlock tick
    SetUnlockHeight {
        caller: Principal,
        principal: Principal,
        height: Tick,
        response: Reply<()>,
    },

    /// Carve a tranche out of the unallocated balance
    AddTier {
        caller: Principal,
        amount: Amount,
        release_tick: Tick,
        response: Reply<()>,
    },

    /// Withdraw unlocked funds
    Withdraw {
        caller: Principal,
        amount: Amount,
        response: Reply<()>,
    },

    /// Withdraw everything released
    WithdrawReleased {
        caller: Principal,
        response: Reply<Amount>,
    },

    /// Withdraw early under penalty
    EmergencyWithdraw {
        caller: Principal,
        amount: Amount,
        response: Reply<Amount>,
    },

    /// Choose interest rate
    SetInterestRate {
        caller: Principal,
        rate: u64,
        response: Reply<()>,
    },

    /// Record lock metadata
    SetLockData {
        caller: Principal,
        principal: Principal,
        lock: LockInfo,
        response: Reply<()>,
    },

    /// Realize accrued interest
    CreditInterest {
        caller: Principal,
        response: Reply<Amount>,
    },

    /// Append a history record on someone's behalf
    RecordTransaction {
        caller: Principal,
        principal: Principal,
        kind: TransactionKind,
        amount: Amount,
        tick: Tick,
        response: Reply<TransactionRecord>,
    },

    /// Schedule a reminder
    SetReminder {
        caller: Principal,
        message: String,
        due_tick: Tick,
        response: Reply<u64>,
    },

    /// Acknowledge a reminder
    MarkAsNotified {
        caller: Principal,
        principal: Principal,
        id: u64,
        response: Reply<()>,
    },

    /// Stop the sequencer after a final snapshot
    Shutdown { response: Reply<()> },
}

/// Task applying commands against the shared ledger
pub struct Sequencer {
    ledger: Arc<RwLock<TimelockLedger>>,
    store: Arc<dyn StateStore>,
    mailbox: mpsc::Receiver<Command>,
    persist: bool,
}

impl Sequencer {
    /// Run the sequencer loop until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        while let Some(command) = self.mailbox.recv().await {
            match command {
                Command::Shutdown { response } => {
                    let result = self.persist_now();
                    tracing::info!("Sequencer shutting down");
                    let _ = response.send(result);
                    return;
                }
                command => self.handle(command),
            }
        }
        tracing::info!("Sequencer mailbox closed");
    }

    fn handle(&self, command: Command) {
        match command {
            Command::Deposit {
                caller,
                amount,
                response,
            } => {
                let _ = response.send(self.apply(|l| l.deposit(&caller, amount)));
            }

            Command::DepositLocked {
                caller,
                amount,
                release_tick,
                response,
            } => {
                let result = self.apply(|l| l.deposit_locked(&caller, amount, release_tick));
                let _ = response.send(result);
            }

            Command::SetUnlockHeight {
                caller,
                principal,
                height,
                response,
            } => {
                let result = self.apply(|l| l.set_unlock_height(&caller, &principal, height));
                let _ = response.send(result);
            }

            Command::AddTier {
                caller,
                amount,
                release_tick,
                response,
            } => {
                let result = self.apply(|l| l.add_tier(&caller, amount, release_tick));
                let _ = response.send(result);
            }

            Command::Withdraw {
                caller,
                amount,
                response,
            } => {
                let _ = response.send(self.apply(|l| l.withdraw(&caller, amount)));
            }

            Command::WithdrawReleased { caller, response } => {
                let _ = response.send(self.apply(|l| l.withdraw_released(&caller)));
            }

            Command::EmergencyWithdraw {
                caller,
                amount,
                response,
            } => {
                let _ = response.send(self.apply(|l| l.emergency_withdraw(&caller, amount)));
            }

            Command::SetInterestRate {
                caller,
                rate,
                response,
            } => {
                let _ = response.send(self.apply(|l| l.set_interest_rate(&caller, rate)));
            }

            Command::SetLockData {
                caller,
                principal,
                lock,
                response,
            } => {
                let result = self.apply(|l| l.set_lock_data(&caller, &principal, lock));
                let _ = response.send(result);
            }

            Command::CreditInterest { caller, response } => {
                let _ = response.send(self.apply(|l| l.credit_interest(&caller)));
            }

            Command::RecordTransaction {
                caller,
                principal,
                kind,
                amount,
                tick,
                response,
            } => {
                let result =
                    self.apply(|l| l.record_transaction(&caller, &principal, kind, amount, tick));
                let _ = response.send(result);
            }

            Command::SetReminder {
                caller,
                message,
                due_tick,
                response,
            } => {
                let result = self.apply(|l| l.set_reminder(&caller, &message, due_tick));
                let _ = response.send(result);
            }

            Command::MarkAsNotified {
                caller,
                principal,
                id,
                response,
            } => {
                let result = self.apply(|l| l.mark_as_notified(&caller, &principal, id));
                let _ = response.send(result);
            }

            Command::Shutdown { .. } => {
                // Handled in run loop
            }
        }
    }

    /// Apply one mutation and persist the resulting state.
    ///
    /// If the snapshot cannot be saved the write is rolled back before the
    /// error is returned, so memory never runs ahead of the store.
    fn apply<T>(&self, op: impl FnOnce(&mut TimelockLedger) -> Result<T>) -> Result<T> {
        let mut ledger = self.ledger.write();
        if !self.persist {
            return op(&mut ledger);
        }

        let checkpoint = ledger.checkpoint();
        let value = op(&mut ledger)?;
        if let Err(e) = self.store.save(ledger.state()) {
            tracing::error!(error = %e, "Snapshot persist failed, rolling back write");
            ledger.rollback(checkpoint);
            return Err(e);
        }
        Ok(value)
    }

    fn persist_now(&self) -> Result<()> {
        if !self.persist {
            return Ok(());
        }
        self.store.save(self.ledger.read().state())
    }
}

/// Handle for submitting commands and reading ledger state
#[derive(Clone)]
pub struct SequencerHandle {
    sender: mpsc::Sender<Command>,
    ledger: Arc<RwLock<TimelockLedger>>,
}

impl std::fmt::Debug for SequencerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencerHandle")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl SequencerHandle {
    /// Run a read-only query against the current state
    pub fn read<R>(&self, query: impl FnOnce(&TimelockLedger) -> R) -> R {
        query(&self.ledger.read())
    }

    /// Deposit available funds
    pub async fn deposit(&self, caller: Principal, amount: Amount) -> Result<()> {
        self.request(|response| Command::Deposit {
            caller,
            amount,
            response,
        })
        .await
    }

    /// Deposit into a tranche released at `release_tick`
    pub async fn deposit_locked(&self, caller: Principal, amount: Amount, release_tick: Tick) -> Result<()> {
        self.request(|response| Command::DepositLocked {
            caller,
            amount,
            release_tick,
            response,
        })
        .await
    }

    /// Set `principal`'s unlock tick (owner only)
    pub async fn set_unlock_height(&self, caller: Principal, principal: Principal, height: Tick) -> Result<()> {
        self.request(|response| Command::SetUnlockHeight {
            caller,
            principal,
            height,
            response,
        })
        .await
    }

    /// Lock part of the unallocated balance until `release_tick`
    pub async fn add_tier(&self, caller: Principal, amount: Amount, release_tick: Tick) -> Result<()> {
        self.request(|response| Command::AddTier {
            caller,
            amount,
            release_tick,
            response,
        })
        .await
    }

    /// Withdraw unlocked funds
    pub async fn withdraw(&self, caller: Principal, amount: Amount) -> Result<()> {
        self.request(|response| Command::Withdraw {
            caller,
            amount,
            response,
        })
        .await
    }

    /// Withdraw everything released
    pub async fn withdraw_released(&self, caller: Principal) -> Result<Amount> {
        self.request(|response| Command::WithdrawReleased { caller, response })
            .await
    }

    /// Withdraw early; returns the payout
    pub async fn emergency_withdraw(&self, caller: Principal, amount: Amount) -> Result<Amount> {
        self.request(|response| Command::EmergencyWithdraw {
            caller,
            amount,
            response,
        })
        .await
    }

    /// Choose interest rate
    pub async fn set_interest_rate(&self, caller: Principal, rate: u64) -> Result<()> {
        self.request(|response| Command::SetInterestRate {
            caller,
            rate,
            response,
        })
        .await
    }

    /// Record lock metadata (owner only)
    pub async fn set_lock_data(&self, caller: Principal, principal: Principal, lock: LockInfo) -> Result<()> {
        self.request(|response| Command::SetLockData {
            caller,
            principal,
            lock,
            response,
        })
        .await
    }

    /// Realize accrued interest
    pub async fn credit_interest(&self, caller: Principal) -> Result<Amount> {
        self.request(|response| Command::CreditInterest { caller, response })
            .await
    }

    /// Append a record on `principal`'s behalf (recorder only)
    pub async fn record_transaction(
        &self,
        caller: Principal,
        principal: Principal,
        kind: TransactionKind,
        amount: Amount,
        tick: Tick,
    ) -> Result<TransactionRecord> {
        self.request(|response| Command::RecordTransaction {
            caller,
            principal,
            kind,
            amount,
            tick,
            response,
        })
        .await
    }

    /// Schedule a reminder
    pub async fn set_reminder(&self, caller: Principal, message: impl Into<String>, due_tick: Tick) -> Result<u64> {
        let message = message.into();
        self.request(|response| Command::SetReminder {
            caller,
            message,
            due_tick,
            response,
        })
        .await
    }

    /// Acknowledge a reminder
    pub async fn mark_as_notified(&self, caller: Principal, principal: Principal, id: u64) -> Result<()> {
        self.request(|response| Command::MarkAsNotified {
            caller,
            principal,
            id,
            response,
        })
        .await
    }

    /// Persist a final snapshot and stop the sequencer
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response| Command::Shutdown { response }).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Sequencer mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }
}

/// Restore the latest snapshot (if any) and spawn the sequencer task
pub fn spawn_sequencer(
    config: &Config,
    clock: Arc<dyn TickSource>,
    store: Arc<dyn StateStore>,
) -> Result<SequencerHandle> {
    let ledger = match store.load()? {
        Some(state) => {
            tracing::info!("Restoring ledger from snapshot");
            TimelockLedger::from_state(config.ledger.clone(), clock, state)?
        }
        None => TimelockLedger::new(config.ledger.clone(), clock)?,
    };
    let ledger = Arc::new(RwLock::new(ledger));

    // Bounded channel for backpressure
    let (tx, rx) = mpsc::channel(config.sequencer.mailbox_capacity.max(1));
    let sequencer = Sequencer {
        ledger: ledger.clone(),
        store,
        mailbox: rx,
        persist: config.sequencer.persist_snapshots,
    };

    tokio::spawn(async move {
        sequencer.run().await;
    });

    Ok(SequencerHandle { sender: tx, ledger })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, ledger::LedgerState, storage::MemoryStore};

    fn user() -> Principal {
        Principal::new("user")
    }

    fn owner() -> Principal {
        Principal::new("owner")
    }

    /// Store whose writes always fail
    struct FailingStore;

    impl StateStore for FailingStore {
        fn load(&self) -> Result<Option<LedgerState>> {
            Ok(None)
        }

        fn save(&self, _state: &LedgerState) -> Result<()> {
            Err(Error::Storage("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_persist_rolls_back_write() {
        let clock = Arc::new(ManualClock::new(1));
        let handle = spawn_sequencer(&Config::default(), clock, Arc::new(FailingStore)).unwrap();

        for _ in 0..2 {
            let err = handle.deposit(user(), 100).await.unwrap_err();
            assert!(matches!(err, Error::Storage(_)));
        }

        assert_eq!(handle.read(|l| l.get_balance(&user())), 0);
        assert_eq!(handle.read(|l| l.get_transaction_count(&user())), 0);
        assert!(handle.read(|l| l.recent_events()).is_empty());
        handle.read(|l| l.check_invariants()).unwrap();
    }

    #[tokio::test]
    async fn test_sequencer_spawn_and_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1));
        let handle = spawn_sequencer(&Config::default(), clock, store.clone()).unwrap();

        handle.shutdown().await.unwrap();
        assert_eq!(store.save_count(), 1);

        let err = handle.deposit(user(), 1).await.unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }

    #[tokio::test]
    async fn test_writes_visible_to_reads() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(50));
        let handle = spawn_sequencer(&Config::default(), clock.clone(), store).unwrap();

        handle.deposit(user(), 500).await.unwrap();
        handle.set_unlock_height(owner(), user(), 100).await.unwrap();
        assert!(matches!(
            handle.withdraw(user(), 100).await,
            Err(Error::NotUnlocked(_))
        ));

        clock.set(100);
        handle.withdraw(user(), 100).await.unwrap();
        assert_eq!(handle.read(|l| l.get_balance(&user())), 400);
        assert_eq!(handle.read(|l| l.get_transaction_count(&user())), 2);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_from_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1));
        let config = Config::default();

        let handle = spawn_sequencer(&config, clock.clone(), store.clone()).unwrap();
        handle.deposit(user(), 300).await.unwrap();
        let id = handle.set_reminder(user(), "renew", 10).await.unwrap();
        handle.shutdown().await.unwrap();

        let restored = spawn_sequencer(&config, clock, store).unwrap();
        assert_eq!(restored.read(|l| l.get_balance(&user())), 300);
        assert_eq!(restored.read(|l| l.get_upcoming_reminders(&user()))[0].id, id);
        assert_eq!(restored.set_reminder(user(), "next", 20).await.unwrap(), id + 1);
        restored.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejections_do_not_persist() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1));
        let handle = spawn_sequencer(&Config::default(), clock, store.clone()).unwrap();

        assert!(handle.deposit(user(), 0).await.is_err());
        assert_eq!(store.save_count(), 0);
        handle.deposit(user(), 5).await.unwrap();
        assert_eq!(store.save_count(), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_deposits_are_serialized() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1));
        let handle = spawn_sequencer(&Config::default(), clock, store).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move { handle.deposit(user(), 10).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(handle.read(|l| l.get_balance(&user())), 200);
        let records = handle.read(|l| l.get_all_transactions(&user()));
        assert!(records.iter().enumerate().all(|(i, r)| r.index == i as u64));
        handle.read(|l| l.verify_history(&user())).unwrap();
        handle.shutdown().await.unwrap();
    }
}
