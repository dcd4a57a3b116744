//! Timelock Ledger
//!
//! Custodial time-lock savings ledger driven by a logical tick counter.
//!
//! # Architecture
//!
//! - **Accounts**: Balances gated by a single unlock tick or by tranches
//! - **Penalty**: Early exit with a percentage penalty credited to the owner
//! - **Interest**: Simple interest over lock metadata, realized on maturity
//! - **History**: Append-only, hash-chained per-principal audit log
//! - **Reminders**: Per-principal scheduled notifications
//! - **Single Writer**: One sequencer task applies every mutation in order
//!
//! # Invariants
//!
//! - Tranche amounts always sum to the account balance
//! - No withdrawal without unlock, except emergency withdrawal
//! - Rejected operations leave state untouched
//! - History indices are gapless and records are never mutated

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod accounts;
pub mod actor;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod history;
pub mod interest;
pub mod ledger;
pub mod metrics;
pub mod penalty;
pub mod reminders;
pub mod storage;
pub mod types;

// Re-exports
pub use actor::{spawn_sequencer, SequencerHandle};
pub use clock::{ManualClock, TickSource};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventTopic, LedgerEvent};
pub use ledger::{LedgerState, TimelockLedger};
pub use storage::{MemoryStore, StateStore};
pub use types::{
    Account, Amount, LockInfo, PenaltySplit, Principal, Reminder, Tick, Tranche,
    TransactionKind, TransactionRecord, TransactionSummary, UnlockPolicy,
};
