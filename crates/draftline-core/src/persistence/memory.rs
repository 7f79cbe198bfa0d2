use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::{KeyValueBackend, Namespace, PersistenceResult, StoredRecord};

/// Heap-backed medium for tests and for degraded operation when no durable
/// medium is available.
#[derive(Default)]
pub struct InMemoryBackend {
    records: Mutex<HashMap<(Namespace, String), StoredRecord>>,
    writes: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating operations applied so far. Lets tests assert that
    /// an operation performed no persisted writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> PersistenceResult<std::sync::MutexGuard<'_, HashMap<(Namespace, String), StoredRecord>>> {
        self.records.lock().map_err(|_| {
            CoreError::new(
                CoreErrorKind::Internal,
                "in-memory backend mutex was poisoned",
            )
        })
    }
}

impl KeyValueBackend for InMemoryBackend {
    fn read(&self, namespace: Namespace, key: &str) -> PersistenceResult<Option<StoredRecord>> {
        let records = self.lock()?;
        Ok(records.get(&(namespace, key.to_string())).cloned())
    }

    fn write(&self, record: &StoredRecord) -> PersistenceResult<()> {
        let mut records = self.lock()?;
        records.insert((record.namespace, record.key.clone()), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, namespace: Namespace, key: &str) -> PersistenceResult<()> {
        let mut records = self.lock()?;
        records.remove(&(namespace, key.to_string()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn list(&self, namespace: Namespace) -> PersistenceResult<Vec<StoredRecord>> {
        let records = self.lock()?;
        let mut matching: Vec<StoredRecord> = records
            .values()
            .filter(|record| record.namespace == namespace)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(matching)
    }

    fn touch(
        &self,
        namespace: Namespace,
        key: &str,
        accessed_at_unix: i64,
    ) -> PersistenceResult<()> {
        let mut records = self.lock()?;
        if let Some(record) = records.get_mut(&(namespace, key.to_string())) {
            record.last_access_unix = accessed_at_unix;
        }
        Ok(())
    }

    fn replace_all(&self, replacement: &[StoredRecord]) -> PersistenceResult<()> {
        let mut next = HashMap::with_capacity(replacement.len());
        for record in replacement {
            next.insert((record.namespace, record.key.clone()), record.clone());
        }

        let mut records = self.lock()?;
        *records = next;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
