//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode snapshots, ordered maps)
//! - Exact arithmetic (integer amounts, checked updates)
//! - Value-copy reads across component boundaries

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical clock value supplied by the sequencer
pub type Tick = u64;

/// Ledger amount in the smallest unit
pub type Amount = u64;

/// Caller or account identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Create new principal
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A portion of a tiered balance locked until `release_tick`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tranche {
    /// Remaining amount (zero means consumed)
    pub amount: Amount,

    /// First tick at which the tranche may be withdrawn
    pub release_tick: Tick,
}

impl Tranche {
    /// Whether the tranche is withdrawable at `now`
    pub fn is_released(&self, now: Tick) -> bool {
        now >= self.release_tick
    }
}

/// How an account's balance is gated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockPolicy {
    /// Whole balance gated by one tick
    Single {
        /// Unlock tick (withdrawal allowed once `now >= unlock_tick`)
        unlock_tick: Tick,
    },

    /// Balance partitioned into tranches, kept sorted by release tick
    /// with creation order breaking ties
    Tiered {
        /// Live tranches
        tranches: Vec<Tranche>,
    },
}

impl Default for UnlockPolicy {
    fn default() -> Self {
        UnlockPolicy::Single { unlock_tick: 0 }
    }
}

/// Per-principal account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Total funds owned, locked and unlocked
    pub balance: Amount,

    /// Unlock policy
    pub policy: UnlockPolicy,
}

impl Account {
    /// Unlock tick of a single-policy account; `None` when tiered
    pub fn unlock_tick(&self) -> Option<Tick> {
        match self.policy {
            UnlockPolicy::Single { unlock_tick } => Some(unlock_tick),
            UnlockPolicy::Tiered { .. } => None,
        }
    }

    /// Tranches of a tiered account (empty for single policy)
    pub fn tranches(&self) -> &[Tranche] {
        match &self.policy {
            UnlockPolicy::Single { .. } => &[],
            UnlockPolicy::Tiered { tranches } => tranches,
        }
    }

    /// Balance withdrawable at `now`
    pub fn unlocked_balance(&self, now: Tick) -> Amount {
        match &self.policy {
            UnlockPolicy::Single { unlock_tick } => {
                if now >= *unlock_tick {
                    self.balance
                } else {
                    0
                }
            }
            UnlockPolicy::Tiered { tranches } => tranches
                .iter()
                .filter(|t| t.is_released(now))
                .map(|t| t.amount)
                .sum(),
        }
    }

    /// Balance still locked at `now`
    pub fn locked_balance(&self, now: Tick) -> Amount {
        self.balance - self.unlocked_balance(now)
    }

    /// Whether the account uses tranches
    pub fn is_tiered(&self) -> bool {
        matches!(self.policy, UnlockPolicy::Tiered { .. })
    }
}

/// Lock metadata driving interest computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Principal amount the interest accrues on
    pub principal_amount: Amount,

    /// Tick the funds were locked
    pub deposit_tick: Tick,

    /// Tick the lock matures
    pub unlock_tick: Tick,
}

impl LockInfo {
    /// Lock duration in ticks, clamped to zero
    pub fn duration(&self) -> Tick {
        self.unlock_tick.saturating_sub(self.deposit_tick)
    }
}

/// Kind of a history record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionKind {
    /// Funds deposited
    Deposit = 1,
    /// Funds withdrawn after unlock
    Withdrawal = 2,
    /// Funds withdrawn early under penalty (full debited amount)
    EmergencyWithdrawal = 3,
    /// Penalty credited to the ledger owner
    PenaltyCredit = 4,
    /// Accrued interest credited to the account
    InterestCredit = 5,
}

impl TransactionKind {
    /// All kinds, in tag order
    pub const ALL: [TransactionKind; 5] = [
        TransactionKind::Deposit,
        TransactionKind::Withdrawal,
        TransactionKind::EmergencyWithdrawal,
        TransactionKind::PenaltyCredit,
        TransactionKind::InterestCredit,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::EmergencyWithdrawal => "emergency-withdrawal",
            TransactionKind::PenaltyCredit => "penalty-credit",
            TransactionKind::InterestCredit => "interest-credit",
        }
    }

    /// Parse from a canonical (kebab) or snake-case name
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "emergency-withdrawal" | "emergency_withdrawal" => {
                Ok(TransactionKind::EmergencyWithdrawal)
            }
            "penalty-credit" | "penalty_credit" => Ok(TransactionKind::PenaltyCredit),
            "interest-credit" | "interest_credit" => Ok(TransactionKind::InterestCredit),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown transaction kind '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

/// Append-only history record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Sequence number, gapless per principal from 0
    pub index: u64,

    /// Kind
    pub kind: TransactionKind,

    /// Amount moved (gross for emergency withdrawals)
    pub amount: Amount,

    /// Tick the record refers to
    pub tick: Tick,

    /// SHA-256 chained over the previous record's digest
    pub digest: [u8; 32],
}

/// Filtered view of a principal's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// Kind filtered on
    pub kind: TransactionKind,

    /// Number of matching records
    pub count: u64,

    /// Sum of matching amounts
    pub total_amount: u128,

    /// Matching records in log order
    pub records: Vec<TransactionRecord>,
}

/// Scheduled notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// Id, unique per principal, starting at 1
    pub id: u64,

    /// Message delivered to the principal
    pub message: String,

    /// Tick the reminder becomes due
    pub due_tick: Tick,

    /// Set once delivery has been acknowledged
    pub notified: bool,
}

/// Result of an emergency withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltySplit {
    /// Gross amount debited from the account
    pub amount: Amount,

    /// Portion retained by the owner
    pub penalty: Amount,

    /// Portion paid out to the caller
    pub payout: Amount,
}
