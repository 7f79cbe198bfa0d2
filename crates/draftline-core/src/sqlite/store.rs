use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};

use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::{KeyValueBackend, Namespace, PersistenceResult, StoredRecord};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration};

const MIGRATIONS_TABLE: &str = "draftline_schema_migrations";

pub struct SqliteBackend {
    database_path: PathBuf,
}

impl SqliteBackend {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    pub fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        if target_version > 0 && migration(target_version).is_none() {
            return Err(storage_error_text(
                "apply_migration",
                format!("migration version '{target_version}' is not defined"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    let migration =
                        migration(version).expect("validated migration version must exist");
                    apply_up_migration(connection, migration)?;
                }
            } else if target_version < current_version {
                for version in ((target_version + 1)..=current_version).rev() {
                    let migration =
                        migration(version).expect("validated migration version must exist");
                    apply_down_migration(connection, migration)?;
                }
            }

            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl KeyValueBackend for SqliteBackend {
    fn read(&self, namespace: Namespace, key: &str) -> PersistenceResult<Option<StoredRecord>> {
        self.with_connection("read", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT namespace, key, value, size_bytes, last_access_unix
FROM kv_records
WHERE namespace = ?1 AND key = ?2
",
            )?;
            let mut rows = statement.query(params![namespace.as_str(), key])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            Ok(Some(record_from_row(row)?))
        })
    }

    fn write(&self, record: &StoredRecord) -> PersistenceResult<()> {
        self.with_connection("write", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO kv_records (namespace, key, value, size_bytes, last_access_unix)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(namespace, key) DO UPDATE SET
    value = excluded.value,
    size_bytes = excluded.size_bytes,
    last_access_unix = excluded.last_access_unix
",
                params![
                    record.namespace.as_str(),
                    record.key.as_str(),
                    record.value.as_str(),
                    to_i64(record.size_bytes)?,
                    record.last_access_unix,
                ],
            )?;
            Ok(())
        })
    }

    fn remove(&self, namespace: Namespace, key: &str) -> PersistenceResult<()> {
        self.with_connection("remove", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "DELETE FROM kv_records WHERE namespace = ?1 AND key = ?2",
                params![namespace.as_str(), key],
            )?;
            Ok(())
        })
    }

    fn list(&self, namespace: Namespace) -> PersistenceResult<Vec<StoredRecord>> {
        self.with_connection("list", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT namespace, key, value, size_bytes, last_access_unix
FROM kv_records
WHERE namespace = ?1
ORDER BY key
",
            )?;
            let rows = statement.query_map(params![namespace.as_str()], record_from_row)?;
            rows.collect()
        })
    }

    fn touch(
        &self,
        namespace: Namespace,
        key: &str,
        accessed_at_unix: i64,
    ) -> PersistenceResult<()> {
        self.with_connection("touch", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
UPDATE kv_records
SET last_access_unix = ?3
WHERE namespace = ?1 AND key = ?2
",
                params![namespace.as_str(), key, accessed_at_unix],
            )?;
            Ok(())
        })
    }

    fn replace_all(&self, records: &[StoredRecord]) -> PersistenceResult<()> {
        self.with_connection("replace_all", |connection| {
            ensure_schema_ready(connection)?;
            let transaction = connection.transaction()?;

            transaction.execute("DELETE FROM kv_records", [])?;
            {
                let mut statement = transaction.prepare(
                    "
INSERT INTO kv_records (namespace, key, value, size_bytes, last_access_unix)
VALUES (?1, ?2, ?3, ?4, ?5)
",
                )?;
                for record in records {
                    statement.execute(params![
                        record.namespace.as_str(),
                        record.key.as_str(),
                        record.value.as_str(),
                        to_i64(record.size_bytes)?,
                        record.last_access_unix,
                    ])?;
                }
            }

            transaction.commit()?;
            Ok(())
        })
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
",
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version <= 0 {
        return Err(storage_error_sqlite(
            "database schema is not initialized; apply migrations before store operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRecord> {
    let namespace_raw: String = row.get(0)?;
    let key: String = row.get(1)?;
    let value: String = row.get(2)?;
    let size_bytes: i64 = row.get(3)?;
    let last_access_unix: i64 = row.get(4)?;

    Ok(StoredRecord {
        namespace: parse_namespace(&namespace_raw)?,
        key,
        value,
        size_bytes: i64_to_u64(size_bytes)?,
        last_access_unix,
    })
}

fn parse_namespace(raw: &str) -> rusqlite::Result<Namespace> {
    raw.parse::<Namespace>().map_err(|_| {
        storage_error_sqlite(&format!(
            "unknown namespace '{raw}' found in persisted sqlite record"
        ))
    })
}

fn storage_error(operation: &str, error: rusqlite::Error) -> CoreError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError::new(
        CoreErrorKind::Io,
        format!("sqlite backend '{operation}' failed: {}", message.as_ref()),
    )
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn to_i64(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| storage_error_sqlite("value exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative size in sqlite record"))
}
