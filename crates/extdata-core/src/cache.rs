//! Fingerprinted table cache.
//!
//! Entries are addressed by a [`Fingerprint`] derived from everything that
//! determines a fetch result. Expiry is time based only. Whether an expired
//! entry may stand in for a failed live fetch is decided by the connector
//! through [`CachePolicy`]; the cache itself just reports `Fresh`, `Stale` or
//! `Miss`.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use extdata_store::{CacheRecord, CacheStore, StoreError};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::warn;

use crate::source::SourceKind;
use crate::table::Table;
use crate::BoxFuture;

/// Hex SHA-256 cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Feeds length-prefixed `name`/`value` pairs into the digest so that field
/// boundaries can never be confused.
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    pub fn new(kind: SourceKind) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.field("kind", kind.as_str());
        builder
    }

    pub fn field(&mut self, name: &str, value: &str) -> &mut Self {
        for part in [name, value] {
            self.hasher.update((part.len() as u64).to_be_bytes());
            self.hasher.update(part.as_bytes());
        }
        self
    }

    pub fn fields<'a, I>(&mut self, name: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut count = 0_usize;
        for value in values {
            self.field(name, value);
            count += 1;
        }
        self.field(name, &format!("#{count}"))
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.hasher.finalize()))
    }
}

/// Seconds since the Unix epoch (UTC).
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// A stored table with its retrieval time and the TTL that applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub table: Table,
    pub retrieved_at: i64,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        is_expired(self, now)
    }
}

/// An entry is expired once `retrieved_at + ttl` has been reached.
pub fn is_expired(entry: &CacheEntry, now: i64) -> bool {
    let ttl = i64::try_from(entry.ttl_secs).unwrap_or(i64::MAX);
    entry.retrieved_at.saturating_add(ttl) <= now
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Fresh(CacheEntry),
    /// Present but past its TTL.
    Stale(CacheEntry),
    Miss,
}

impl CacheLookup {
    fn classify(entry: Option<CacheEntry>, now: i64) -> Self {
        match entry {
            Some(entry) if entry.is_expired(now) => Self::Stale(entry),
            Some(entry) => Self::Fresh(entry),
            None => Self::Miss,
        }
    }
}

/// How a connector uses the cache for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// 0 disables caching for the request.
    pub ttl_secs: u64,
    /// Serve a stale entry when the live fetch fails.
    pub stale_on_failure: bool,
}

impl CachePolicy {
    pub const fn disabled() -> Self {
        Self {
            ttl_secs: 0,
            stale_on_failure: false,
        }
    }

    pub const fn enabled(&self) -> bool {
        self.ttl_secs > 0
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cached payload is not a table: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("cache task failed: {0}")]
    Task(String),
}

/// Shared cache contract. Safe for concurrent use by independent connectors;
/// concurrent stores under one fingerprint resolve as last writer wins.
pub trait TableCache: Send + Sync {
    fn lookup<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        now: i64,
    ) -> BoxFuture<'a, Result<CacheLookup, CacheError>>;

    fn store<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        kind: SourceKind,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    fn purge_expired(&self, now: i64) -> BoxFuture<'_, Result<usize, CacheError>>;

    fn clear(&self) -> BoxFuture<'_, Result<usize, CacheError>>;
}

/// Process-local cache. Optionally bounded: when full, the entry retrieved
/// longest ago is dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<Fingerprint, CacheEntry>>>,
    max_entries: Option<usize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounded(max_entries: usize) -> Self {
        Self {
            inner: Arc::default(),
            max_entries: Some(max_entries.max(1)),
        }
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl TableCache for MemoryCache {
    fn lookup<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        now: i64,
    ) -> BoxFuture<'a, Result<CacheLookup, CacheError>> {
        Box::pin(async move {
            let map = self.inner.read().await;
            Ok(CacheLookup::classify(map.get(fingerprint).cloned(), now))
        })
    }

    fn store<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        _kind: SourceKind,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut map = self.inner.write().await;
            map.insert(fingerprint.clone(), entry);

            if let Some(max) = self.max_entries {
                while map.len() > max {
                    let oldest = map
                        .iter()
                        .filter(|(key, _)| *key != fingerprint)
                        .min_by_key(|(_, entry)| entry.retrieved_at)
                        .map(|(key, _)| key.clone());
                    match oldest {
                        Some(key) => map.remove(&key),
                        None => break,
                    };
                }
            }
            Ok(())
        })
    }

    fn purge_expired(&self, now: i64) -> BoxFuture<'_, Result<usize, CacheError>> {
        Box::pin(async move {
            let mut map = self.inner.write().await;
            let before = map.len();
            map.retain(|_, entry| !entry.is_expired(now));
            Ok(before - map.len())
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<usize, CacheError>> {
        Box::pin(async move {
            let mut map = self.inner.write().await;
            let removed = map.len();
            map.clear();
            Ok(removed)
        })
    }
}

/// Durable cache over the DuckDB store. Tables are kept as JSON text.
#[derive(Clone)]
pub struct PersistentCache {
    store: CacheStore,
}

impl PersistentCache {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub fn store_handle(&self) -> &CacheStore {
        &self.store
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(CacheStore) -> Result<T, CacheError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || work(store))
            .await
            .map_err(|error| CacheError::Task(error.to_string()))?
    }
}

impl TableCache for PersistentCache {
    fn lookup<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        now: i64,
    ) -> BoxFuture<'a, Result<CacheLookup, CacheError>> {
        let key = fingerprint.as_str().to_owned();
        Box::pin(async move {
            let entry = self
                .blocking(move |store| {
                    let Some(record) = store.get(&key)? else {
                        return Ok(None);
                    };
                    // An unreadable payload is dropped and refetched.
                    let table: Table = match serde_json::from_str(&record.payload) {
                        Ok(table) => table,
                        Err(error) => {
                            warn!(fingerprint = %key, error = %error, "discarding unreadable cache entry");
                            store.remove(&key)?;
                            return Ok(None);
                        }
                    };
                    Ok(Some(CacheEntry {
                        table,
                        retrieved_at: record.retrieved_at,
                        ttl_secs: record.ttl_secs,
                    }))
                })
                .await?;
            Ok(CacheLookup::classify(entry, now))
        })
    }

    fn store<'a>(
        &'a self,
        fingerprint: &'a Fingerprint,
        kind: SourceKind,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        let key = fingerprint.as_str().to_owned();
        Box::pin(async move {
            let payload = serde_json::to_string(&entry.table)?;
            self.blocking(move |store| {
                store.put(&CacheRecord {
                    fingerprint: key,
                    source_kind: kind.as_str().to_owned(),
                    payload,
                    retrieved_at: entry.retrieved_at,
                    ttl_secs: entry.ttl_secs,
                })?;
                Ok(())
            })
            .await
        })
    }

    fn purge_expired(&self, now: i64) -> BoxFuture<'_, Result<usize, CacheError>> {
        Box::pin(self.blocking(move |store| Ok(store.purge_expired(now)?)))
    }

    fn clear(&self) -> BoxFuture<'_, Result<usize, CacheError>> {
        Box::pin(self.blocking(|store| Ok(store.clear()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(value: &str) -> Table {
        Table::from_columns([("v", vec![value.to_string()])]).expect("table")
    }

    fn fingerprint(url: &str) -> Fingerprint {
        let mut builder = FingerprintBuilder::new(SourceKind::Web);
        builder.field("url", url);
        builder.finish()
    }

    #[test]
    fn fingerprint_is_deterministic_and_boundary_safe() {
        assert_eq!(fingerprint("http://a"), fingerprint("http://a"));
        assert_ne!(fingerprint("http://a"), fingerprint("http://b"));
        assert_eq!(fingerprint("x").as_str().len(), 64);

        let mut left = FingerprintBuilder::new(SourceKind::Db);
        left.field("q", "ab").field("p", "c");
        let mut right = FingerprintBuilder::new(SourceKind::Db);
        right.field("q", "a").field("p", "bc");
        assert_ne!(left.finish(), right.finish());
    }

    #[test]
    fn list_fields_include_their_count() {
        let mut one = FingerprintBuilder::new(SourceKind::Db);
        one.fields("param", ["a", "b"]);
        let mut two = FingerprintBuilder::new(SourceKind::Db);
        two.fields("param", ["a"]).fields("param", ["b"]);
        assert_ne!(one.finish(), two.finish());
    }

    #[test]
    fn expiry_boundary() {
        let entry = CacheEntry {
            table: table("x"),
            retrieved_at: 100,
            ttl_secs: 10,
        };
        assert!(!is_expired(&entry, 109));
        assert!(is_expired(&entry, 110));
    }

    #[tokio::test]
    async fn memory_cache_reports_fresh_then_stale() {
        let cache = MemoryCache::new();
        let key = fingerprint("http://a");
        let entry = CacheEntry {
            table: table("x"),
            retrieved_at: 1_000,
            ttl_secs: 60,
        };
        cache
            .store(&key, SourceKind::Web, entry.clone())
            .await
            .expect("store");

        assert_eq!(
            cache.lookup(&key, 1_059).await.expect("lookup"),
            CacheLookup::Fresh(entry.clone())
        );
        assert_eq!(
            cache.lookup(&key, 1_060).await.expect("lookup"),
            CacheLookup::Stale(entry)
        );
        assert_eq!(
            cache.lookup(&fingerprint("other"), 0).await.expect("lookup"),
            CacheLookup::Miss
        );
    }

    #[tokio::test]
    async fn bounded_memory_cache_drops_oldest() {
        let cache = MemoryCache::bounded(2);
        for (index, url) in ["a", "b", "c"].into_iter().enumerate() {
            let entry = CacheEntry {
                table: table(url),
                retrieved_at: index as i64,
                ttl_secs: 100,
            };
            cache
                .store(&fingerprint(url), SourceKind::Web, entry)
                .await
                .expect("store");
        }

        assert_eq!(cache.len().await, 2);
        assert_eq!(
            cache.lookup(&fingerprint("a"), 0).await.expect("lookup"),
            CacheLookup::Miss
        );
    }

    #[tokio::test]
    async fn memory_cache_purges_expired() {
        let cache = MemoryCache::new();
        for (url, ttl) in [("old", 1), ("new", 1_000)] {
            let entry = CacheEntry {
                table: table(url),
                retrieved_at: 0,
                ttl_secs: ttl,
            };
            cache
                .store(&fingerprint(url), SourceKind::Web, entry)
                .await
                .expect("store");
        }
        assert_eq!(cache.purge_expired(10).await.expect("purge"), 1);
        assert_eq!(cache.clear().await.expect("clear"), 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn persistent_cache_round_trips_tables() {
        let cache = PersistentCache::new(CacheStore::open_in_memory().expect("store"));
        let key = fingerprint("http://a");
        let entry = CacheEntry {
            table: table("persisted"),
            retrieved_at: 50,
            ttl_secs: 5,
        };
        cache
            .store(&key, SourceKind::Web, entry.clone())
            .await
            .expect("store");

        assert_eq!(
            cache.lookup(&key, 54).await.expect("lookup"),
            CacheLookup::Fresh(entry.clone())
        );
        assert_eq!(
            cache.lookup(&key, 55).await.expect("lookup"),
            CacheLookup::Stale(entry)
        );
    }
    #[tokio::test]
    async fn persistent_cache_drops_unreadable_entries() {
        let store = CacheStore::open_in_memory().expect("store");
        let key = fingerprint("http://a");
        store
            .put(&CacheRecord {
                fingerprint: key.as_str().to_owned(),
                source_kind: "web".to_owned(),
                payload: "not a table".to_owned(),
                retrieved_at: 50,
                ttl_secs: 5,
            })
            .expect("put");
        let cache = PersistentCache::new(store.clone());

        assert_eq!(cache.lookup(&key, 51).await.expect("lookup"), CacheLookup::Miss);
        assert!(store.is_empty().expect("empty"));
    }
}
