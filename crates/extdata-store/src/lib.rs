//! # Extdata Store
//!
//! Durable, DuckDB-backed storage for fetched tables.
//!
//! The store knows nothing about tables or connectors: it keeps opaque
//! serialized payloads addressed by a fingerprint, together with the time
//! they were retrieved and the TTL that applied. Expiry decisions belong to
//! the caller; the store only answers "what was stored under this key".
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use extdata_store::{CacheRecord, CacheStore, StoreConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CacheStore::open(StoreConfig::default())?;
//!     store.put(&CacheRecord {
//!         fingerprint: "3f2a".to_string(),
//!         source_kind: "web".to_string(),
//!         payload: "{}".to_string(),
//!         retrieved_at: 1_700_000_000,
//!         ttl_secs: 600,
//!     })?;
//!     assert!(store.get("3f2a")?.is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `table_cache` | One row per fingerprint: payload, retrieval time, TTL |
//! | `schema_migrations` | Applied migration versions |

pub mod duckdb;
mod error;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, OptionalExt};
use serde::{Deserialize, Serialize};

pub use duckdb::{PooledConnection, StoreConnectionManager};
pub use error::StoreError;

/// Environment variable naming the extdata home directory.
pub const HOME_ENV: &str = "EXTDATA_HOME";

/// Configuration for the durable cache.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept around.
    pub max_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_store_path(),
            max_pool_size: 4,
        }
    }
}

/// A row of the `table_cache` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Hex fingerprint of the request that produced the payload.
    pub fingerprint: String,
    /// Source kind that produced the payload (`web`, `db`, ...).
    pub source_kind: String,
    /// Serialized table.
    pub payload: String,
    /// Retrieval time, seconds since the Unix epoch (UTC).
    pub retrieved_at: i64,
    /// TTL that applied when the payload was stored.
    pub ttl_secs: u64,
}

/// Durable fingerprint-keyed payload store.
#[derive(Clone)]
pub struct CacheStore {
    manager: StoreConnectionManager,
}

impl CacheStore {
    /// Open a store with the specified configuration, creating the file and
    /// schema if necessary.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = StoreConnectionManager::open(config.db_path, config.max_pool_size)?;
        let store = Self { manager };
        store.initialize()?;
        Ok(store)
    }

    /// Open a store that lives only as long as the process.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let manager = StoreConnectionManager::open_in_memory(2)?;
        let store = Self { manager };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), StoreError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Fetch the record stored under `fingerprint`, expired or not.
    pub fn get(&self, fingerprint: &str) -> Result<Option<CacheRecord>, StoreError> {
        let connection = self.manager.acquire()?;
        let row = connection
            .query_row(
                "SELECT fingerprint, source_kind, payload, retrieved_at, ttl_secs \
                 FROM table_cache WHERE fingerprint = ?",
                [fingerprint],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((fingerprint, source_kind, payload, retrieved_at, ttl_secs)) = row else {
            return Ok(None);
        };

        let ttl_secs = u64::try_from(ttl_secs).map_err(|_| {
            StoreError::InvalidRecord(format!("negative ttl {ttl_secs} for {fingerprint}"))
        })?;

        Ok(Some(CacheRecord {
            fingerprint,
            source_kind,
            payload,
            retrieved_at,
            ttl_secs,
        }))
    }

    /// Insert or overwrite the record for its fingerprint. Last writer wins.
    pub fn put(&self, record: &CacheRecord) -> Result<(), StoreError> {
        let ttl_secs = i64::try_from(record.ttl_secs).unwrap_or(i64::MAX);
        let connection = self.manager.acquire()?;
        connection.execute(
            "INSERT OR REPLACE INTO table_cache \
             (fingerprint, source_kind, payload, retrieved_at, ttl_secs) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                record.fingerprint,
                record.source_kind,
                record.payload,
                record.retrieved_at,
                ttl_secs
            ],
        )?;
        Ok(())
    }

    /// Delete the record stored under `fingerprint`. Returns whether a row was removed.
    pub fn remove(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let connection = self.manager.acquire()?;
        let removed = connection.execute(
            "DELETE FROM table_cache WHERE fingerprint = ?",
            [fingerprint],
        )?;
        Ok(removed > 0)
    }

    /// Delete every record whose TTL has elapsed at `now` (seconds since epoch).
    pub fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let connection = self.manager.acquire()?;
        let removed = connection.execute(
            "DELETE FROM table_cache WHERE retrieved_at + ttl_secs <= ?",
            [now],
        )?;
        Ok(removed)
    }

    /// Delete every record.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let connection = self.manager.acquire()?;
        let removed = connection.execute("DELETE FROM table_cache", [])?;
        Ok(removed)
    }

    /// Number of stored records, including expired ones.
    pub fn len(&self) -> Result<usize, StoreError> {
        let connection = self.manager.acquire()?;
        let count: i64 =
            connection.query_row("SELECT COUNT(*) FROM table_cache", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Path of the database file, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.manager.db_path()
    }
}

/// Resolve the extdata home directory: `EXTDATA_HOME`, then `~/.extdata`,
/// then `./.extdata`.
pub fn resolve_extdata_home() -> PathBuf {
    if let Some(path) = env::var_os(HOME_ENV) {
        return PathBuf::from(path);
    }

    if let Some(home) = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".extdata");
    }

    PathBuf::from(".extdata")
}

/// Default location of the durable cache file.
pub fn default_store_path() -> PathBuf {
    store_path_in(&resolve_extdata_home())
}

/// Location of the durable cache file under `home`.
pub fn store_path_in(home: &Path) -> PathBuf {
    home.join("cache").join("extdata.duckdb")
}
