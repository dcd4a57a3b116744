//! Ledger events
//!
//! Every successful mutation emits one event. Events are kept in a bounded
//! in-memory buffer for observers and mirrored to `tracing`; they are not
//! part of the persisted state (the transaction history is the audit log).

use crate::types::{Amount, Principal, Tick};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Event topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Funds deposited (available or into a tranche)
    Deposit,
    /// Owner set an account's unlock tick
    SetUnlockHeight,
    /// Tranche carved out of the unallocated balance
    AddTier,
    /// Unlocked funds withdrawn
    Withdraw,
    /// Early exit under penalty
    EmergencyWithdraw,
    /// Account chose its interest rate
    SetInterestRate,
    /// Owner recorded lock metadata
    SetLockData,
    /// Accrued interest realized
    CreditInterest,
    /// Recorder appended a history record
    RecordTransaction,
    /// Reminder scheduled
    SetReminder,
    /// Reminder acknowledged
    MarkAsNotified,
}

impl EventTopic {
    /// Topic name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::Deposit => "deposit",
            EventTopic::SetUnlockHeight => "set-unlock-height",
            EventTopic::AddTier => "add-tier",
            EventTopic::Withdraw => "withdraw",
            EventTopic::EmergencyWithdraw => "emergency-withdraw",
            EventTopic::SetInterestRate => "set-interest-rate",
            EventTopic::SetLockData => "set-lock-data",
            EventTopic::CreditInterest => "credit-interest",
            EventTopic::RecordTransaction => "record-transaction",
            EventTopic::SetReminder => "set-reminder",
            EventTopic::MarkAsNotified => "mark-as-notified",
        }
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Emission order across the ledger
    pub sequence: u64,

    /// Tick the event was emitted at
    pub tick: Tick,

    /// Topic
    pub topic: EventTopic,

    /// Principal the event concerns
    pub principal: Principal,

    /// Amount moved, if any
    pub amount: Option<Amount>,

    /// Tick argument (unlock, release, or due tick), if any
    pub target_tick: Option<Tick>,
}

/// Bounded buffer of recent events
#[derive(Debug, Clone)]
pub struct EventBuffer {
    capacity: usize,
    next_sequence: u64,
    events: VecDeque<LedgerEvent>,
}

impl EventBuffer {
    /// Create buffer retaining at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_sequence: 0,
            events: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append an event, evicting the oldest when full
    pub fn emit(
        &mut self,
        tick: Tick,
        topic: EventTopic,
        principal: &Principal,
        amount: Option<Amount>,
        target_tick: Option<Tick>,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        tracing::info!(
            sequence,
            tick,
            topic = %topic,
            principal = %principal,
            amount = ?amount,
            target_tick = ?target_tick,
            "Ledger event"
        );

        if self.capacity == 0 {
            return sequence;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(LedgerEvent {
            sequence,
            tick,
            topic,
            principal: principal.clone(),
            amount,
            target_tick,
        });
        sequence
    }

    /// Retained events, oldest first
    pub fn recent(&self) -> Vec<LedgerEvent> {
        self.events.iter().cloned().collect()
    }

    /// Retained events for one topic
    pub fn by_topic(&self, topic: EventTopic) -> Vec<LedgerEvent> {
        self.events.iter().filter(|e| e.topic == topic).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_evicts_oldest() {
        let mut buffer = EventBuffer::new(2);
        let p = Principal::new("p");
        buffer.emit(1, EventTopic::Deposit, &p, Some(10), None);
        buffer.emit(2, EventTopic::SetUnlockHeight, &p, None, Some(9));
        buffer.emit(3, EventTopic::Withdraw, &p, Some(5), None);

        let recent = buffer.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sequence, 1);
        assert_eq!(recent[1].topic, EventTopic::Withdraw);
    }

    #[test]
    fn test_zero_capacity_still_sequences() {
        let mut buffer = EventBuffer::new(0);
        let p = Principal::new("p");
        assert_eq!(buffer.emit(1, EventTopic::Deposit, &p, Some(1), None), 0);
        assert_eq!(buffer.emit(1, EventTopic::Deposit, &p, Some(1), None), 1);
        assert!(buffer.recent().is_empty());
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(EventTopic::SetUnlockHeight.to_string(), "set-unlock-height");
        assert_eq!(EventTopic::MarkAsNotified.as_str(), "mark-as-notified");
    }
}
