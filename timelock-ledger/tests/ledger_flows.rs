//! End-to-end ledger flows

use std::sync::Arc;
use timelock_ledger::{
    config::LedgerConfig, Error, EventTopic, LockInfo, ManualClock, Principal, TimelockLedger,
    TransactionKind,
};

fn owner() -> Principal {
    Principal::new("owner")
}

fn recorder() -> Principal {
    Principal::new("recorder")
}

fn wallet(n: u32) -> Principal {
    Principal::new(format!("wallet_{}", n))
}

fn create_test_ledger(start: u64) -> (TimelockLedger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    let ledger = TimelockLedger::new(LedgerConfig::default(), clock.clone()).unwrap();
    (ledger, clock)
}

#[test]
fn test_accounts_are_isolated() {
    let (mut ledger, clock) = create_test_ledger(1);
    ledger.deposit(&wallet(1), 200).unwrap();
    ledger.deposit(&wallet(2), 700).unwrap();
    ledger.set_unlock_height(&owner(), &wallet(1), 2).unwrap();
    ledger.set_unlock_height(&owner(), &wallet(2), 11).unwrap();

    clock.advance(2);
    ledger.withdraw(&wallet(1), 100).unwrap();
    assert!(matches!(
        ledger.withdraw(&wallet(2), 100),
        Err(Error::NotUnlocked(_))
    ));

    assert_eq!(ledger.get_balance(&wallet(1)), 100);
    assert_eq!(ledger.get_balance(&wallet(2)), 700);
    assert_eq!(ledger.get_transaction_count(&wallet(1)), 2);
    assert_eq!(ledger.get_transaction_count(&wallet(2)), 1);
}

#[test]
fn test_tiered_release_keeps_locked_funds() {
    let (mut ledger, clock) = create_test_ledger(1);
    ledger.deposit(&wallet(1), 300).unwrap();
    ledger.add_tier(&wallet(1), 100, 2).unwrap();
    ledger.add_tier(&wallet(1), 50, 10).unwrap();

    clock.advance(2);
    assert_eq!(ledger.get_unlocked_balance(&wallet(1)), 250);
    assert_eq!(ledger.withdraw_released(&wallet(1)).unwrap(), 250);
    assert_eq!(ledger.get_balance(&wallet(1)), 50);
    assert_eq!(ledger.get_tiers(&wallet(1)).len(), 1);

    assert!(matches!(
        ledger.withdraw(&wallet(1), 10),
        Err(Error::NotUnlocked(_))
    ));
    assert!(matches!(
        ledger.withdraw_released(&wallet(1)),
        Err(Error::InvalidAmount(_))
    ));
    ledger.check_invariants().unwrap();
}

#[test]
fn test_tiered_accounts_reject_single_unlock() {
    let (mut ledger, _clock) = create_test_ledger(1);
    ledger.deposit_locked(&wallet(1), 100, 5).unwrap();
    assert!(matches!(
        ledger.set_unlock_height(&owner(), &wallet(1), 20),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(ledger.get_unlock_height(&wallet(1)), 5);
}

#[test]
fn test_emptied_tiered_account_accepts_single_unlock() {
    let (mut ledger, _clock) = create_test_ledger(1);
    ledger.deposit_locked(&wallet(1), 100, 5).unwrap();
    ledger.emergency_withdraw(&wallet(1), 100).unwrap();
    assert!(ledger.get_tiers(&wallet(1)).is_empty());

    ledger.set_unlock_height(&owner(), &wallet(1), 20).unwrap();
    assert_eq!(ledger.get_unlock_height(&wallet(1)), 20);
    ledger.check_invariants().unwrap();
}

#[test]
fn test_emergency_withdraw_drains_released_tranches_first() {
    let (mut ledger, clock) = create_test_ledger(1);
    ledger.deposit(&wallet(1), 100).unwrap();
    ledger.deposit_locked(&wallet(1), 200, 50).unwrap();
    clock.advance(1);

    let payout = ledger.emergency_withdraw(&wallet(1), 150).unwrap();
    assert_eq!(payout, 135);
    assert_eq!(ledger.get_balance(&owner()), 15);

    let tiers = ledger.get_tiers(&wallet(1));
    assert_eq!(tiers.len(), 1);
    assert_eq!(tiers[0].amount, 150);
    assert_eq!(tiers[0].release_tick, 50);
    assert_eq!(ledger.get_unlocked_balance(&wallet(1)), 0);
}

#[test]
fn test_interest_lifecycle() {
    let (mut ledger, clock) = create_test_ledger(10);
    ledger.deposit(&wallet(1), 1_000_000).unwrap();
    ledger.set_interest_rate(&wallet(1), 10).unwrap();
    assert_eq!(ledger.get_interest_rate(&wallet(1)), 10);
    assert_eq!(ledger.get_interest_rate(&wallet(2)), 5);
    assert!(matches!(
        ledger.set_interest_rate(&wallet(1), 0),
        Err(Error::InvalidAmount(_))
    ));

    ledger.set_unlock_height(&owner(), &wallet(1), 375).unwrap();
    assert_eq!(
        ledger.get_lock_data(&wallet(1)),
        Some(LockInfo {
            principal_amount: 1_000_000,
            deposit_tick: 10,
            unlock_tick: 375,
        })
    );
    // 1_000_000 * 10 * 365 / 36500
    assert_eq!(ledger.estimate_interest(&wallet(1)), 100_000);

    clock.set(375);
    assert_eq!(ledger.credit_interest(&wallet(1)).unwrap(), 100_000);
    let summary = ledger.get_summary_by_type(&wallet(1), "interest_credit").unwrap();
    assert_eq!(summary.count, 1);
    assert_eq!(summary.total_amount, 100_000);
    assert_eq!(ledger.get_balance(&wallet(1)), 1_100_000);
}

#[test]
fn test_recorder_history_and_summary() {
    let (mut ledger, _clock) = create_test_ledger(1);
    ledger
        .record_transaction(&recorder(), &wallet(1), TransactionKind::Deposit, 1_000_000, 1)
        .unwrap();
    ledger
        .record_transaction(&recorder(), &wallet(1), TransactionKind::Withdrawal, 500_000, 1)
        .unwrap();
    ledger
        .record_transaction(&recorder(), &wallet(1), TransactionKind::Deposit, 250_000, 2)
        .unwrap();

    let summary = ledger.get_summary_by_type(&wallet(1), "deposit").unwrap();
    assert_eq!(summary.count, 2);
    assert_eq!(summary.total_amount, 1_250_000);

    assert!(matches!(
        ledger.get_summary_by_type(&wallet(1), "invalid-type"),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ledger.get_summary_by_type(&owner(), "deposit"),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        ledger.get_transaction(&wallet(1), 3),
        Err(Error::NotFound(_))
    ));

    ledger.verify_history(&wallet(1)).unwrap();
    assert_ne!(ledger.history_root(&wallet(1)), [0u8; 32]);
    // Recorder entries never move funds
    assert_eq!(ledger.get_balance(&wallet(1)), 0);
}

#[test]
fn test_reminder_lifecycle() {
    let (mut ledger, clock) = create_test_ledger(1);
    assert!(matches!(
        ledger.set_reminder(&wallet(1), "Past Reminder", 0),
        Err(Error::InvalidAmount(_))
    ));

    let first = ledger.set_reminder(&wallet(1), "Reminder 1", 20).unwrap();
    let second = ledger.set_reminder(&wallet(1), "Reminder 2", 5).unwrap();
    assert_eq!((first, second), (1, 2));

    let upcoming = ledger.get_upcoming_reminders(&wallet(1));
    assert_eq!(upcoming[0].message, "Reminder 2");
    assert!(ledger.get_due_reminders(&wallet(1)).is_empty());

    clock.set(5);
    let due = ledger.get_due_reminders(&wallet(1));
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, second);

    ledger.mark_as_notified(&wallet(1), &wallet(1), second).unwrap();
    assert!(ledger.get_due_reminders(&wallet(1)).is_empty());
    assert_eq!(ledger.get_upcoming_reminders(&wallet(1)).len(), 1);
    assert!(matches!(
        ledger.mark_as_notified(&wallet(1), &wallet(1), 42),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_events_follow_mutations() {
    let (mut ledger, _clock) = create_test_ledger(1);
    ledger.deposit(&wallet(1), 100).unwrap();
    ledger.set_unlock_height(&owner(), &wallet(1), 10).unwrap();
    ledger.emergency_withdraw(&wallet(1), 50).unwrap();
    let _ = ledger.withdraw(&wallet(1), 10);

    let topics: Vec<EventTopic> = ledger.recent_events().iter().map(|e| e.topic).collect();
    assert_eq!(
        topics,
        vec![
            EventTopic::Deposit,
            EventTopic::SetUnlockHeight,
            EventTopic::EmergencyWithdraw,
        ]
    );
    let events = ledger.recent_events();
    assert_eq!(events[1].target_tick, Some(10));
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let emergencies = ledger.events_by_topic(EventTopic::EmergencyWithdraw);
    assert_eq!(emergencies.len(), 1);
    assert_eq!(emergencies[0].amount, Some(50));
    assert_eq!(ledger.state().accounts.total_balance(), 55);
    assert_eq!(ledger.state().history.total_records(), 3);
}

#[test]
fn test_restore_from_extended_state() {
    let (mut ledger, clock) = create_test_ledger(1);
    ledger.deposit(&wallet(1), 100).unwrap();

    let mut state = ledger.state().clone();
    let json = serde_json::to_value(&state).unwrap();
    assert!(json.get("history").is_some());

    state.accounts.credit_available(&wallet(1), 1, 1).unwrap();
    state.history.append(&wallet(1), TransactionKind::Deposit, 1, 1);
    let restored = TimelockLedger::from_state(LedgerConfig::default(), clock, state).unwrap();
    assert_eq!(restored.get_balance(&wallet(1)), 101);
    restored.verify_history(&wallet(1)).unwrap();
}
