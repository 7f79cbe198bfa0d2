use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use draftline_core::models::CoreErrorKind;
use draftline_core::persistence::{
    DurableStore, KeyValueBackend, Namespace, StoreConfig, StoredRecord,
};
use draftline_core::sqlite::{SqliteBackend, current_schema_version};

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("draftline-{test_name}-{nanos}.sqlite3"))
}

fn migrated_backend(test_name: &str) -> SqliteBackend {
    let backend = SqliteBackend::new(test_db_path(test_name));
    backend.migrate_to_latest().unwrap();
    backend
}

fn record(namespace: Namespace, key: &str, value: &str) -> StoredRecord {
    StoredRecord::new(namespace, key, value, 1_700_000_000)
}

#[test]
fn fresh_database_reports_version_zero() {
    let backend = SqliteBackend::new(test_db_path("version-zero"));
    assert_eq!(backend.current_version().unwrap(), 0);
}

#[test]
fn migrate_to_latest_walks_all_versions() {
    let backend = SqliteBackend::new(test_db_path("migrate-latest"));
    backend.migrate_to_latest().unwrap();
    assert_eq!(backend.current_version().unwrap(), current_schema_version());

    // Idempotent when already at the target.
    backend.migrate_to_latest().unwrap();
    assert_eq!(backend.current_version().unwrap(), current_schema_version());
}

#[test]
fn down_migration_walks_back_to_zero() {
    let backend = migrated_backend("migrate-down");
    backend.apply_migration(0).unwrap();
    assert_eq!(backend.current_version().unwrap(), 0);

    // With the schema rolled back, store operations must refuse to run.
    let error = backend.read(Namespace::Projects, "p1").unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Io);
}

#[test]
fn undefined_migration_target_is_rejected() {
    let backend = SqliteBackend::new(test_db_path("bad-target"));
    let error = backend
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Io);
}

#[test]
fn unmigrated_database_rejects_store_operations() {
    let backend = SqliteBackend::new(test_db_path("unmigrated"));
    let error = backend.write(&record(Namespace::Projects, "p1", "doc")).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::Io);
    assert!(error.message.contains("not initialized"));
}

#[test]
fn write_read_remove_round_trip() {
    let backend = migrated_backend("round-trip");

    backend.write(&record(Namespace::Projects, "p1", "doc one")).unwrap();
    let read = backend.read(Namespace::Projects, "p1").unwrap().unwrap();
    assert_eq!(read.value, "doc one");
    assert_eq!(read.size_bytes, 9);
    assert_eq!(read.last_access_unix, 1_700_000_000);

    // Upsert replaces in place.
    backend.write(&record(Namespace::Projects, "p1", "doc two")).unwrap();
    let read = backend.read(Namespace::Projects, "p1").unwrap().unwrap();
    assert_eq!(read.value, "doc two");

    backend.remove(Namespace::Projects, "p1").unwrap();
    assert!(backend.read(Namespace::Projects, "p1").unwrap().is_none());
}

#[test]
fn list_is_scoped_to_namespace_and_ordered_by_key() {
    let backend = migrated_backend("list-scope");
    backend.write(&record(Namespace::ApiCache, "b", "2")).unwrap();
    backend.write(&record(Namespace::ApiCache, "a", "1")).unwrap();
    backend.write(&record(Namespace::Projects, "z", "3")).unwrap();

    let cached = backend.list(Namespace::ApiCache).unwrap();
    let keys: Vec<&str> = cached.iter().map(|record| record.key.as_str()).collect();
    assert_eq!(keys, ["a", "b"]);
}

#[test]
fn touch_updates_only_access_time() {
    let backend = migrated_backend("touch");
    backend.write(&record(Namespace::FileCache, "f1", "bytes")).unwrap();

    backend.touch(Namespace::FileCache, "f1", 1_800_000_000).unwrap();
    let read = backend.read(Namespace::FileCache, "f1").unwrap().unwrap();
    assert_eq!(read.last_access_unix, 1_800_000_000);
    assert_eq!(read.value, "bytes");
}

#[test]
fn records_survive_reopening_the_database() {
    let path = test_db_path("reopen");
    {
        let backend = SqliteBackend::new(&path);
        backend.migrate_to_latest().unwrap();
        backend.write(&record(Namespace::Settings, "cfg", "persisted")).unwrap();
    }

    let reopened = SqliteBackend::new(&path);
    assert_eq!(reopened.current_version().unwrap(), current_schema_version());
    let read = reopened.read(Namespace::Settings, "cfg").unwrap().unwrap();
    assert_eq!(read.value, "persisted");
}

#[test]
fn replace_all_swaps_full_contents() {
    let backend = migrated_backend("replace-all");
    backend.write(&record(Namespace::Projects, "old", "gone")).unwrap();
    backend.write(&record(Namespace::Settings, "old", "gone")).unwrap();

    let replacement = vec![
        record(Namespace::Projects, "new", "kept"),
        record(Namespace::Backup, "latest", "blob"),
    ];
    backend.replace_all(&replacement).unwrap();

    assert!(backend.read(Namespace::Projects, "old").unwrap().is_none());
    assert!(backend.read(Namespace::Settings, "old").unwrap().is_none());
    assert!(backend.read(Namespace::Projects, "new").unwrap().is_some());
    assert!(backend.read(Namespace::Backup, "latest").unwrap().is_some());
}

#[test]
fn durable_store_policies_apply_over_sqlite() {
    let backend = migrated_backend("policy-layer");
    let store = DurableStore::new(Box::new(backend), StoreConfig::default());

    store.put(Namespace::Projects, "p1", "doc").unwrap();
    assert_eq!(
        store.get(Namespace::Projects, "p1").unwrap().as_deref(),
        Some("doc")
    );

    let blob = store.snapshot().unwrap();
    store.delete(Namespace::Projects, "p1").unwrap();
    store.restore(&blob).unwrap();
    assert_eq!(
        store.get(Namespace::Projects, "p1").unwrap().as_deref(),
        Some("doc")
    );
}
