//! Reminder registry

use crate::{
    types::{Principal, Reminder, Tick},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PrincipalReminders {
    last_id: u64,
    // Keyed by id, so iteration is already id-ascending
    entries: BTreeMap<u64, Reminder>,
}

/// Scheduled notifications per principal
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderRegistry {
    principals: BTreeMap<Principal, PrincipalReminders>,
}

impl ReminderRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a reminder; returns its id
    pub fn set(&mut self, principal: &Principal, message: impl Into<String>, due_tick: Tick, now: Tick) -> Result<u64> {
        if due_tick <= now {
            return Err(Error::InvalidAmount(format!(
                "due tick {} is not after current tick {}",
                due_tick, now
            )));
        }

        let slot = self.principals.entry(principal.clone()).or_default();
        let id = slot.last_id + 1;
        slot.last_id = id;
        slot.entries.insert(
            id,
            Reminder {
                id,
                message: message.into(),
                due_tick,
                notified: false,
            },
        );
        Ok(id)
    }

    /// Un-notified reminders ordered by due tick, then id
    pub fn upcoming(&self, principal: &Principal) -> Vec<Reminder> {
        self.pending(principal, |_| true)
    }

    /// Un-notified reminders already due at `now`
    pub fn due(&self, principal: &Principal, now: Tick) -> Vec<Reminder> {
        self.pending(principal, |r| r.due_tick <= now)
    }

    /// Reminder by id
    pub fn get(&self, principal: &Principal, id: u64) -> Option<&Reminder> {
        self.principals.get(principal).and_then(|slot| slot.entries.get(&id))
    }

    /// Flag a reminder as delivered. Returns `true` when the flag changed,
    /// `false` when it was already set.
    pub fn mark_notified(&mut self, principal: &Principal, id: u64) -> Result<bool> {
        let reminder = self
            .principals
            .get_mut(principal)
            .and_then(|slot| slot.entries.get_mut(&id))
            .ok_or_else(|| Error::NotFound(format!("no reminder {} for {}", id, principal)))?;

        if reminder.notified {
            return Ok(false);
        }
        reminder.notified = true;
        Ok(true)
    }

    fn pending(&self, principal: &Principal, keep: impl Fn(&Reminder) -> bool) -> Vec<Reminder> {
        let mut reminders: Vec<Reminder> = self
            .principals
            .get(principal)
            .map(|slot| {
                slot.entries
                    .values()
                    .filter(|r| !r.notified && keep(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Stable sort keeps id order among equal due ticks
        reminders.sort_by_key(|r| r.due_tick);
        reminders
    }
}
