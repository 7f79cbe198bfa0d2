use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::{KeyValueBackend, Namespace, PersistenceResult, StoredRecord};

const SNAPSHOT_VERSION: u32 = 1;

pub const DEFAULT_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    pub budget_bytes: u64,
    pub cache_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreStats {
    pub total_size: u64,
    pub per_namespace: Vec<(Namespace, u64)>,
    pub budget_remaining: u64,
}

#[derive(Serialize, Deserialize)]
struct SnapshotBlob {
    version: u32,
    created_at_unix: i64,
    records: Vec<StoredRecord>,
}

/// Policy layer over a raw [`KeyValueBackend`]: size budget, cache-only LRU
/// eviction, TTL expiry, and atomic snapshot/restore. All mutations are
/// serialized through one lock (single local client, no multi-process
/// coordination).
pub struct DurableStore {
    backend: Box<dyn KeyValueBackend>,
    config: StoreConfig,
    write_lock: Mutex<()>,
}

impl DurableStore {
    pub fn new(backend: Box<dyn KeyValueBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn get(&self, namespace: Namespace, key: &str) -> PersistenceResult<Option<String>> {
        let Some(record) = self.backend.read(namespace, key)? else {
            return Ok(None);
        };

        if namespace.is_cache() {
            let now = unix_now();
            if self.is_expired(&record, now) {
                let _guard = self.lock_writes()?;
                self.backend.remove(namespace, key)?;
                return Ok(None);
            }
            self.backend.touch(namespace, key, now)?;
        }

        Ok(Some(record.value))
    }

    pub fn put(&self, namespace: Namespace, key: &str, value: &str) -> PersistenceResult<()> {
        let record = StoredRecord::new(namespace, key, value, unix_now());
        if record.size_bytes > self.config.budget_bytes {
            return Err(store_full_error(record.size_bytes, self.config.budget_bytes));
        }

        let _guard = self.lock_writes()?;

        let replaced_size = self
            .backend
            .read(namespace, key)?
            .map(|existing| existing.size_bytes)
            .unwrap_or(0);
        let occupied = self.total_size()? - replaced_size;

        if occupied + record.size_bytes > self.config.budget_bytes {
            let needed = occupied + record.size_bytes - self.config.budget_bytes;
            let freed = self.evict_cache_lru(needed, namespace, key)?;
            if freed < needed {
                return Err(store_full_error(
                    occupied + record.size_bytes - freed,
                    self.config.budget_bytes,
                ));
            }
        }

        self.backend.write(&record)
    }

    pub fn delete(&self, namespace: Namespace, key: &str) -> PersistenceResult<()> {
        let _guard = self.lock_writes()?;
        self.backend.remove(namespace, key)
    }

    pub fn list_all(&self, namespace: Namespace) -> PersistenceResult<Vec<(String, String)>> {
        let records = self.backend.list(namespace)?;
        Ok(records
            .into_iter()
            .map(|record| (record.key, record.value))
            .collect())
    }

    /// Removes cache entries untouched for longer than the configured TTL,
    /// independent of size pressure. Returns how many were removed.
    pub fn sweep_expired(&self) -> PersistenceResult<usize> {
        let now = unix_now();
        let _guard = self.lock_writes()?;

        let mut removed = 0;
        for namespace in Namespace::ALL {
            if !namespace.is_cache() {
                continue;
            }
            for record in self.backend.list(namespace)? {
                if self.is_expired(&record, now) {
                    self.backend.remove(namespace, &record.key)?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> PersistenceResult<StoreStats> {
        let mut per_namespace = Vec::with_capacity(Namespace::ALL.len());
        let mut total_size = 0;
        for namespace in Namespace::ALL {
            let size: u64 = self
                .backend
                .list(namespace)?
                .iter()
                .map(|record| record.size_bytes)
                .sum();
            total_size += size;
            per_namespace.push((namespace, size));
        }

        Ok(StoreStats {
            total_size,
            per_namespace,
            budget_remaining: self.config.budget_bytes.saturating_sub(total_size),
        })
    }

    /// Full-state export of every namespace except the backup slot itself.
    pub fn snapshot(&self) -> PersistenceResult<String> {
        let mut records = Vec::new();
        for namespace in Namespace::ALL {
            if namespace == Namespace::Backup {
                continue;
            }
            records.extend(self.backend.list(namespace)?);
        }

        let blob = SnapshotBlob {
            version: SNAPSHOT_VERSION,
            created_at_unix: unix_now(),
            records,
        };
        serde_json::to_string(&blob).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("failed to serialize store snapshot: {error}"),
            )
        })
    }

    /// All-or-nothing import of a snapshot blob. A blob that fails to parse
    /// or validate leaves the prior state untouched.
    pub fn restore(&self, blob: &str) -> PersistenceResult<()> {
        let parsed: SnapshotBlob = serde_json::from_str(blob).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Corrupt,
                format!("snapshot blob is not valid: {error}"),
            )
        })?;
        if parsed.version != SNAPSHOT_VERSION {
            return Err(CoreError::new(
                CoreErrorKind::Corrupt,
                format!("unsupported snapshot version '{}'", parsed.version),
            ));
        }

        let mut replacement = Vec::with_capacity(parsed.records.len());
        for record in parsed.records {
            if record.namespace == Namespace::Backup {
                return Err(CoreError::new(
                    CoreErrorKind::Corrupt,
                    "snapshot blob must not contain backup records",
                ));
            }
            // Sizes are recomputed rather than trusted from the blob.
            replacement.push(StoredRecord::new(
                record.namespace,
                record.key,
                record.value,
                record.last_access_unix,
            ));
        }

        let _guard = self.lock_writes()?;
        replacement.extend(self.backend.list(Namespace::Backup)?);
        self.backend.replace_all(&replacement)
    }

    fn is_expired(&self, record: &StoredRecord, now_unix: i64) -> bool {
        let ttl_secs = self.config.cache_ttl.as_secs() as i64;
        now_unix - record.last_access_unix > ttl_secs
    }

    /// Evicts least-recently-accessed cache entries until `needed` bytes are
    /// freed. Never touches projects, settings, backup, or queue records.
    fn evict_cache_lru(
        &self,
        needed: u64,
        incoming_namespace: Namespace,
        incoming_key: &str,
    ) -> PersistenceResult<u64> {
        let mut candidates = Vec::new();
        for namespace in Namespace::ALL {
            if !namespace.is_cache() {
                continue;
            }
            for record in self.backend.list(namespace)? {
                if namespace == incoming_namespace && record.key == incoming_key {
                    continue;
                }
                candidates.push(record);
            }
        }
        candidates.sort_by_key(|record| record.last_access_unix);

        let mut freed = 0;
        let mut evicted = 0;
        for record in candidates {
            if freed >= needed {
                break;
            }
            self.backend.remove(record.namespace, &record.key)?;
            freed += record.size_bytes;
            evicted += 1;
        }

        if evicted > 0 {
            tracing::debug!(evicted, freed, needed, "evicted cache entries for size budget");
        }
        Ok(freed)
    }

    fn total_size(&self) -> PersistenceResult<u64> {
        let mut total = 0;
        for namespace in Namespace::ALL {
            total += self
                .backend
                .list(namespace)?
                .iter()
                .map(|record| record.size_bytes)
                .sum::<u64>();
        }
        Ok(total)
    }

    fn lock_writes(&self) -> PersistenceResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| CoreError::new(CoreErrorKind::Internal, "store write lock was poisoned"))
    }
}

fn store_full_error(required: u64, budget: u64) -> CoreError {
    CoreError::new(
        CoreErrorKind::StoreFull,
        format!("store budget exceeded: {required} bytes required, budget is {budget}"),
    )
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}
