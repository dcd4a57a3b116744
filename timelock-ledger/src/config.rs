//! Configuration for the ledger

use crate::types::Principal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Data directory for the snapshot store
    pub data_dir: PathBuf,

    /// Ledger identities and rates
    pub ledger: LedgerConfig,

    /// Sequencer configuration
    pub sequencer: SequencerConfig,

    /// RocksDB configuration
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "timelock-ledger".to_string(),
            data_dir: PathBuf::from("./data/timelock"),
            ledger: LedgerConfig::default(),
            sequencer: SequencerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Ledger identities and rates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Owner principal (sets unlock ticks, receives penalties)
    pub owner: Principal,

    /// Recorder principal (appends history on behalf of others)
    pub recorder: Principal,

    /// Emergency withdrawal penalty, percent of the withdrawn amount
    pub penalty_rate_percent: u64,

    /// Interest rate applied when an account has not set its own (percent)
    pub default_interest_rate: u64,

    /// Number of recent events retained in memory
    pub event_buffer_capacity: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            owner: Principal::new("owner"),
            recorder: Principal::new("recorder"),
            penalty_rate_percent: 10,
            default_interest_rate: 5,
            event_buffer_capacity: 1024,
        }
    }
}

/// Sequencer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Bounded mailbox capacity
    pub mailbox_capacity: usize,

    /// Persist a snapshot after every successful write
    pub persist_snapshots: bool,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            persist_snapshots: true,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Retained snapshot generations (older ones are pruned)
    pub retained_snapshots: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            retained_snapshots: 8,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("TIMELOCK_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(owner) = std::env::var("TIMELOCK_OWNER") {
            config.ledger.owner = Principal::new(owner);
        }

        if let Ok(recorder) = std::env::var("TIMELOCK_RECORDER") {
            config.ledger.recorder = Principal::new(recorder);
        }

        if let Ok(rate) = std::env::var("TIMELOCK_PENALTY_RATE") {
            config.ledger.penalty_rate_percent = rate
                .parse()
                .map_err(|e| crate::Error::Config(format!("TIMELOCK_PENALTY_RATE: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> crate::Result<()> {
        self.ledger.validate()
    }
}

impl LedgerConfig {
    /// Check identity and rate constraints
    pub fn validate(&self) -> crate::Result<()> {
        if self.owner == self.recorder {
            return Err(crate::Error::Config(
                "recorder identity must differ from owner".to_string(),
            ));
        }
        if self.penalty_rate_percent > 100 {
            return Err(crate::Error::Config(format!(
                "penalty rate {}% exceeds 100%",
                self.penalty_rate_percent
            )));
        }
        if self.default_interest_rate == 0 {
            return Err(crate::Error::Config(
                "default interest rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
