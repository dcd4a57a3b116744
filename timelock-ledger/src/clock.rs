//! Tick source abstraction
//!
//! The ledger reads the tick counter but never owns it; the sequencer (or a
//! test) supplies an implementation.

use crate::types::Tick;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic, non-decreasing logical clock
pub trait TickSource: Send + Sync {
    /// Current tick
    fn current_tick(&self) -> Tick;
}

/// Manually driven clock
#[derive(Debug, Default)]
pub struct ManualClock {
    tick: AtomicU64,
}

impl ManualClock {
    /// Create clock at `start`
    pub fn new(start: Tick) -> Self {
        Self {
            tick: AtomicU64::new(start),
        }
    }

    /// Move the clock forward to `tick`; earlier values are ignored
    pub fn set(&self, tick: Tick) {
        self.tick.fetch_max(tick, Ordering::SeqCst);
    }

    /// Advance by `by` ticks, returning the new tick; saturates at `Tick::MAX`
    pub fn advance(&self, by: Tick) -> Tick {
        let previous = self
            .tick
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(by)))
            .unwrap_or_else(|t| t);
        previous.saturating_add(by)
    }
}

impl TickSource for ManualClock {
    fn current_tick(&self) -> Tick {
        self.tick.load(Ordering::SeqCst)
    }
}
