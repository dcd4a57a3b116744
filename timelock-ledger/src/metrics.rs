//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//! Collectors live on a private registry so several ledgers (tests,
//! embedded instances) can coexist in one process.
//!
//! # Metrics
//!
//! - `timelock_deposits_total` - Successful deposits
//! - `timelock_withdrawals_total` - Successful unlocked withdrawals
//! - `timelock_emergency_withdrawals_total` - Successful emergency withdrawals
//! - `timelock_penalties_collected` - Sum of penalties credited to the owner
//! - `timelock_history_records_total` - History records appended
//! - `timelock_reminders_total` - Reminders scheduled / notified
//! - `timelock_rejections_total` - Operations rejected, by error code

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Successful deposits
    pub deposits_total: IntCounter,

    /// Successful withdrawals
    pub withdrawals_total: IntCounter,

    /// Successful emergency withdrawals
    pub emergency_withdrawals_total: IntCounter,

    /// Penalties collected by the owner
    pub penalties_collected: IntCounter,

    /// History records appended
    pub history_records_total: IntCounter,

    /// Reminders by state (`scheduled`, `notified`)
    pub reminders_total: IntCounterVec,

    /// Rejected operations by error code
    pub rejections_total: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let deposits_total = IntCounter::new("timelock_deposits_total", "Successful deposits")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let withdrawals_total =
            IntCounter::new("timelock_withdrawals_total", "Successful unlocked withdrawals")?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let emergency_withdrawals_total = IntCounter::new(
            "timelock_emergency_withdrawals_total",
            "Successful emergency withdrawals",
        )?;
        registry.register(Box::new(emergency_withdrawals_total.clone()))?;

        let penalties_collected = IntCounter::new(
            "timelock_penalties_collected",
            "Sum of penalties credited to the owner",
        )?;
        registry.register(Box::new(penalties_collected.clone()))?;

        let history_records_total =
            IntCounter::new("timelock_history_records_total", "History records appended")?;
        registry.register(Box::new(history_records_total.clone()))?;

        let reminders_total = IntCounterVec::new(
            Opts::new("timelock_reminders_total", "Reminders by state"),
            &["state"],
        )?;
        registry.register(Box::new(reminders_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("timelock_rejections_total", "Operations rejected, by error code"),
            &["operation", "code"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        Ok(Self {
            deposits_total,
            withdrawals_total,
            emergency_withdrawals_total,
            penalties_collected,
            history_records_total,
            reminders_total,
            rejections_total,
            registry,
        })
    }

    /// Record emergency withdrawal and its penalty
    pub fn record_emergency(&self, penalty: u64) {
        self.emergency_withdrawals_total.inc();
        self.penalties_collected.inc_by(penalty);
    }

    /// Record reminder state change
    pub fn record_reminder(&self, state: &str) {
        self.reminders_total.with_label_values(&[state]).inc();
    }

    /// Record rejected operation
    pub fn record_rejection(&self, operation: &str, code: u32) {
        self.rejections_total
            .with_label_values(&[operation, &code.to_string()])
            .inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
