//! Snapshot storage
//!
//! The sequencer persists a full [`LedgerState`] snapshot after every
//! successful write and restores the latest one on start. Snapshots are
//! bincode-encoded.
//!
//! Backends:
//!
//! - [`MemoryStore`] - in-process, for tests and ephemeral nodes
//! - `RocksStore` - RocksDB, behind the `rocksdb` feature
//!
//! # Column Families (RocksDB)
//!
//! - `snapshots` - Encoded states (key: generation, big-endian u64)
//! - `meta` - Latest generation pointer

use crate::{ledger::LedgerState, Result};
use parking_lot::Mutex;

/// Persistence seam for ledger snapshots
pub trait StateStore: Send + Sync {
    /// Latest persisted state, if any
    fn load(&self) -> Result<Option<LedgerState>>;

    /// Persist `state` as the new latest snapshot
    fn save(&self, state: &LedgerState) -> Result<()>;
}

/// In-memory store keeping only the latest encoded snapshot
#[derive(Debug, Default)]
pub struct MemoryStore {
    latest: Mutex<Option<Vec<u8>>>,
    saves: Mutex<u64>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots written so far
    pub fn save_count(&self) -> u64 {
        *self.saves.lock()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<LedgerState>> {
        match self.latest.lock().as_deref() {
            Some(bytes) => Ok(Some(bincode::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &LedgerState) -> Result<()> {
        let bytes = bincode::serialize(state)?;
        *self.latest.lock() = Some(bytes);
        *self.saves.lock() += 1;
        Ok(())
    }
}

#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;

#[cfg(feature = "rocksdb")]
mod rocks {
    use super::StateStore;
    use crate::{config::Config, ledger::LedgerState, Error, Result};
    use parking_lot::Mutex;
    use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};

    const CF_SNAPSHOTS: &str = "snapshots";
    const CF_META: &str = "meta";
    const KEY_LATEST: &[u8] = b"latest";

    /// RocksDB-backed snapshot store
    pub struct RocksStore {
        db: DB,
        retained: u64,
        // Serializes generation bumps
        generation: Mutex<u64>,
    }

    impl std::fmt::Debug for RocksStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RocksStore")
                .field("path", &self.db.path())
                .field("retained", &self.retained)
                .finish()
        }
    }

    impl RocksStore {
        /// Open or create the database under `config.data_dir`
        pub fn open(config: &Config) -> Result<Self> {
            let path = &config.data_dir;
            std::fs::create_dir_all(path)?;

            let mut db_opts = Options::default();
            db_opts.create_if_missing(true);
            db_opts.create_missing_column_families(true);
            db_opts.set_write_buffer_size(config.storage.write_buffer_size_mb * 1024 * 1024);
            db_opts.set_max_write_buffer_number(config.storage.max_write_buffer_number);
            db_opts.set_max_background_jobs(config.storage.max_background_jobs);

            let cf_descriptors = vec![
                ColumnFamilyDescriptor::new(CF_SNAPSHOTS, Self::cf_options_snapshots()),
                ColumnFamilyDescriptor::new(CF_META, Options::default()),
            ];
            let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

            let store = Self {
                db,
                retained: config.storage.retained_snapshots.max(1),
                generation: Mutex::new(0),
            };
            let latest = store.latest_generation()?.unwrap_or(0);
            *store.generation.lock() = latest;

            tracing::info!(path = ?path, generation = latest, "Opened snapshot store");
            Ok(store)
        }

        fn cf_options_snapshots() -> Options {
            let mut opts = Options::default();
            opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
            opts
        }

        fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
            self.db
                .cf_handle(name)
                .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
        }

        fn latest_generation(&self) -> Result<Option<u64>> {
            let cf = self.cf_handle(CF_META)?;
            match self.db.get_cf(cf, KEY_LATEST)? {
                Some(bytes) => {
                    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        Error::Storage("corrupt latest-generation pointer".to_string())
                    })?;
                    Ok(Some(u64::from_be_bytes(raw)))
                }
                None => Ok(None),
            }
        }
    }

    impl StateStore for RocksStore {
        fn load(&self) -> Result<Option<LedgerState>> {
            let Some(generation) = self.latest_generation()? else {
                return Ok(None);
            };
            let cf = self.cf_handle(CF_SNAPSHOTS)?;
            let bytes = self.db.get_cf(cf, generation.to_be_bytes())?.ok_or_else(|| {
                Error::Storage(format!("snapshot {} missing", generation))
            })?;
            Ok(Some(bincode::deserialize(&bytes)?))
        }

        fn save(&self, state: &LedgerState) -> Result<()> {
            let value = bincode::serialize(state)?;
            let cf_snapshots = self.cf_handle(CF_SNAPSHOTS)?;
            let cf_meta = self.cf_handle(CF_META)?;

            let mut generation = self.generation.lock();
            let next = *generation + 1;

            // Snapshot and pointer land atomically
            let mut batch = WriteBatch::default();
            batch.put_cf(cf_snapshots, next.to_be_bytes(), &value);
            batch.put_cf(cf_meta, KEY_LATEST, next.to_be_bytes());
            if next > self.retained {
                batch.delete_cf(cf_snapshots, (next - self.retained).to_be_bytes());
            }
            self.db.write(batch)?;
            *generation = next;

            tracing::debug!(generation = next, bytes = value.len(), "Snapshot persisted");
            Ok(())
        }
    }

}
