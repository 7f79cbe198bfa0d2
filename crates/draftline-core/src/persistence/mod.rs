pub mod memory;
pub mod store;

pub use memory::InMemoryBackend;
pub use store::{DurableStore, StoreConfig, StoreStats};

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::CoreError;

pub type PersistenceResult<T> = Result<T, CoreError>;

/// Key scope inside the store. Cache namespaces may be evicted under size
/// pressure; projects and settings never are.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Projects,
    Settings,
    ApiCache,
    FileCache,
    Backup,
    Queue,
}

impl Namespace {
    pub const ALL: [Namespace; 6] = [
        Namespace::Projects,
        Namespace::Settings,
        Namespace::ApiCache,
        Namespace::FileCache,
        Namespace::Backup,
        Namespace::Queue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Projects => "projects",
            Self::Settings => "settings",
            Self::ApiCache => "api_cache",
            Self::FileCache => "file_cache",
            Self::Backup => "backup",
            Self::Queue => "queue",
        }
    }

    pub fn is_cache(&self) -> bool {
        matches!(self, Self::ApiCache | Self::FileCache)
    }
}

impl FromStr for Namespace {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|namespace| namespace.as_str() == raw)
            .ok_or(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub namespace: Namespace,
    pub key: String,
    pub value: String,
    pub size_bytes: u64,
    pub last_access_unix: i64,
}

impl StoredRecord {
    pub fn new(namespace: Namespace, key: impl Into<String>, value: impl Into<String>, now_unix: i64) -> Self {
        let key = key.into();
        let value = value.into();
        let size_bytes = (key.len() + value.len()) as u64;
        Self {
            namespace,
            key,
            value,
            size_bytes,
            last_access_unix: now_unix,
        }
    }
}

/// Raw storage medium. Policy (budget, TTL, eviction, atomic restore) lives
/// in [`DurableStore`]; implementations only move records.
pub trait KeyValueBackend: Send + Sync {
    fn read(&self, namespace: Namespace, key: &str) -> PersistenceResult<Option<StoredRecord>>;

    fn write(&self, record: &StoredRecord) -> PersistenceResult<()>;

    fn remove(&self, namespace: Namespace, key: &str) -> PersistenceResult<()>;

    fn list(&self, namespace: Namespace) -> PersistenceResult<Vec<StoredRecord>>;

    fn touch(&self, namespace: Namespace, key: &str, accessed_at_unix: i64)
    -> PersistenceResult<()>;

    /// Replaces the entire contents in one atomic step. Either every record
    /// lands or none do; used by snapshot restore.
    fn replace_all(&self, records: &[StoredRecord]) -> PersistenceResult<()>;
}

impl<T: KeyValueBackend + ?Sized> KeyValueBackend for std::sync::Arc<T> {
    fn read(&self, namespace: Namespace, key: &str) -> PersistenceResult<Option<StoredRecord>> {
        (**self).read(namespace, key)
    }

    fn write(&self, record: &StoredRecord) -> PersistenceResult<()> {
        (**self).write(record)
    }

    fn remove(&self, namespace: Namespace, key: &str) -> PersistenceResult<()> {
        (**self).remove(namespace, key)
    }

    fn list(&self, namespace: Namespace) -> PersistenceResult<Vec<StoredRecord>> {
        (**self).list(namespace)
    }

    fn touch(
        &self,
        namespace: Namespace,
        key: &str,
        accessed_at_unix: i64,
    ) -> PersistenceResult<()> {
        (**self).touch(namespace, key, accessed_at_unix)
    }

    fn replace_all(&self, records: &[StoredRecord]) -> PersistenceResult<()> {
        (**self).replace_all(records)
    }
}
