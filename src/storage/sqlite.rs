//! SQLite backend
//!
//! Transactional storage on rusqlite. The table layout is versioned; a
//! connection to a database stamped with another layout drops and recreates
//! the table before anything is served.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use super::StoreError;
use crate::error::{CacheError, Result};

/// Version of the table layout written by this crate.
pub const LAYOUT_VERSION: &str = "1";

// == Database Location ==
/// Where the host keeps the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database, gone when the engine is dropped
    Memory,
    File(PathBuf),
}

// == SQLite Backend ==
/// SQLite-based backend.
///
/// Blocking rusqlite calls run on the tokio blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    /// Table name derived from the storage prefix
    table: String,
    /// Byte budget across keys and payloads
    capacity: u64,
}

impl SqliteBackend {
    /// Opens the database and migrates it to [`LAYOUT_VERSION`] if needed.
    pub async fn connect(location: DatabaseLocation, prefix: &str, capacity: u64) -> Result<Self> {
        let table = table_name(prefix);
        let table_for_open = table.clone();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let mut conn = match &location {
                DatabaseLocation::Memory => Connection::open_in_memory(),
                DatabaseLocation::File(path) => Connection::open(path),
            }
            .map_err(|e| CacheError::Storage(format!("could not open database: {}", e)))?;

            let stored = stored_layout_version(&conn, &table_for_open).map_err(|e| {
                CacheError::Migration(format!("could not read layout version: {}", e))
            })?;
            if stored.as_deref() != Some(LAYOUT_VERSION) {
                info!(
                    "Migrating table {} from layout {:?} to {}",
                    table_for_open, stored, LAYOUT_VERSION
                );
                migrate(&mut conn, &table_for_open)
                    .map_err(|e| CacheError::Migration(e.to_string()))?;
            }

            Ok(conn)
        })
        .await
        .map_err(|e| CacheError::Storage(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table,
            capacity,
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> std::result::Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str, u64) -> std::result::Result<T, StoreError>
            + Send
            + 'static,
    {
        let conn = self.conn.clone();
        let table = self.table.clone();
        let capacity = self.capacity;

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::Backend(format!("database lock poisoned: {}", e)))?;
            op(&mut guard, &table, capacity)
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }

    /// Inserts or replaces a row inside one transaction.
    pub async fn put(&self, key: &str, blob: &str) -> std::result::Result<(), StoreError> {
        let key = key.to_string();
        let blob = blob.to_string();

        self.with_conn(move |conn, table, capacity| {
            let tx = conn.transaction().map_err(sql_error)?;

            let used: i64 = tx
                .query_row(
                    &format!(
                        "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(payload AS BLOB))), 0)
                         FROM {} WHERE key != ?1",
                        table
                    ),
                    params![key],
                    |row| row.get(0),
                )
                .map_err(sql_error)?;

            if used as u64 + (key.len() + blob.len()) as u64 > capacity {
                debug!("Rejecting write of {}: {} bytes in use", key, used);
                return Err(StoreError::QuotaExceeded);
            }

            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (key, payload) VALUES (?1, ?2)",
                    table
                ),
                params![key, blob],
            )
            .map_err(sql_error)?;

            tx.commit().map_err(sql_error)
        })
        .await
    }

    pub async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        let key = key.to_string();

        self.with_conn(move |conn, table, _| {
            conn.query_row(
                &format!("SELECT payload FROM {} WHERE key = ?1", table),
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error)
        })
        .await
    }

    pub async fn remove(&self, key: &str) -> std::result::Result<(), StoreError> {
        let key = key.to_string();

        self.with_conn(move |conn, table, _| {
            conn.execute(&format!("DELETE FROM {} WHERE key = ?1", table), params![key])
                .map(|_| ())
                .map_err(sql_error)
        })
        .await
    }

    /// Number of rows currently stored.
    pub async fn len(&self) -> std::result::Result<usize, StoreError> {
        self.with_conn(|conn, table, _| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count as usize)
            .map_err(sql_error)
        })
        .await
    }
}

/// Keeps alphanumerics and underscores so the prefix is a safe identifier.
fn table_name(prefix: &str) -> String {
    let name: String = prefix
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("cache_{}", name)
    } else {
        name
    }
}

fn meta_table(table: &str) -> String {
    format!("{}_meta", table)
}

/// The layout version stamped in the meta table.
///
/// A missing table or row means nothing was stamped yet; any other failure
/// is reported so a transient error never leads to a migration.
fn stored_layout_version(conn: &Connection, table: &str) -> rusqlite::Result<Option<String>> {
    let result = conn.query_row(
        &format!(
            "SELECT value FROM {} WHERE name = 'layout_version'",
            meta_table(table)
        ),
        [],
        |row| row.get(0),
    );

    match result {
        Ok(version) => Ok(Some(version)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(rusqlite::Error::SqliteFailure(_, Some(message)))
            if message.starts_with("no such table") =>
        {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Drops and recreates the entry table, then stamps the layout version.
fn migrate(conn: &mut Connection, table: &str) -> rusqlite::Result<()> {
    let meta = meta_table(table);
    let tx = conn.transaction()?;

    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {table};
         CREATE TABLE {table} (key TEXT PRIMARY KEY, payload TEXT NOT NULL);
         CREATE TABLE IF NOT EXISTS {meta} (name TEXT PRIMARY KEY, value TEXT NOT NULL);"
    ))?;
    tx.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (name, value) VALUES ('layout_version', ?1)",
            meta
        ),
        params![LAYOUT_VERSION],
    )?;

    tx.commit()
}

fn sql_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::DiskFull => {
            StoreError::QuotaExceeded
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_backend(capacity: u64) -> SqliteBackend {
        SqliteBackend::connect(DatabaseLocation::Memory, "Test", capacity)
            .await
            .unwrap()
    }

    #[test]
    fn test_table_name_sanitized() {
        assert_eq!(table_name("My-App Cache"), "MyAppCache");
        assert_eq!(table_name("---"), "cache_");
        assert_eq!(table_name("1st"), "cache_1st");
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let db = memory_backend(1024).await;

        db.put("key1", "value1").await.unwrap();
        assert_eq!(db.get("key1").await.unwrap().as_deref(), Some("value1"));

        db.put("key1", "value2").await.unwrap();
        assert_eq!(db.get("key1").await.unwrap().as_deref(), Some("value2"));
        assert_eq!(db.len().await.unwrap(), 1);

        db.remove("key1").await.unwrap();
        db.remove("key1").await.unwrap();
        assert!(db.get("key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_rejects_write() {
        let db = memory_backend(12).await;

        db.put("a", "12345").await.unwrap();
        assert_eq!(db.put("b", "1234567").await, Err(StoreError::QuotaExceeded));

        // Replacing an existing row only counts the new size
        db.put("a", "1234567890").await.unwrap();
        assert_eq!(db.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_rows_with_same_layout() {
        let dir = tempfile::tempdir().unwrap();
        let location = DatabaseLocation::File(dir.path().join("cache.db"));

        {
            let db = SqliteBackend::connect(location.clone(), "Test", 1024)
                .await
                .unwrap();
            db.put("kept", "value").await.unwrap();
        }

        let db = SqliteBackend::connect(location, "Test", 1024).await.unwrap();
        assert_eq!(db.get("kept").await.unwrap().as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn test_layout_mismatch_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE Test (key TEXT PRIMARY KEY, payload TEXT NOT NULL);
                 CREATE TABLE Test_meta (name TEXT PRIMARY KEY, value TEXT NOT NULL);
                 INSERT INTO Test VALUES ('stale', 'old');
                 INSERT INTO Test_meta VALUES ('layout_version', '0');",
            )
            .unwrap();
        }

        let db = SqliteBackend::connect(DatabaseLocation::File(path), "Test", 1024)
            .await
            .unwrap();
        assert!(db.get("stale").await.unwrap().is_none());
        assert_eq!(db.len().await.unwrap(), 0);
    }

    #[test]
    fn test_stored_layout_version_absent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_layout_version(&conn, "Test").unwrap(), None);

        conn.execute_batch(
            "CREATE TABLE Test_meta (name TEXT PRIMARY KEY, value TEXT NOT NULL);",
        )
        .unwrap();
        assert_eq!(stored_layout_version(&conn, "Test").unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreadable_layout_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE Test (key TEXT PRIMARY KEY, payload TEXT NOT NULL);
                 CREATE TABLE Test_meta (name TEXT PRIMARY KEY);
                 INSERT INTO Test VALUES ('kept', 'value');",
            )
            .unwrap();
            assert!(stored_layout_version(&conn, "Test").is_err());
        }

        let location = DatabaseLocation::File(path.clone());
        let result = SqliteBackend::connect(location, "Test", 1024).await;
        assert!(matches!(result, Err(CacheError::Migration(_))));

        let conn = Connection::open(&path).unwrap();
        let payload: String = conn
            .query_row("SELECT payload FROM Test WHERE key = 'kept'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(payload, "value");
    }

    #[tokio::test]
    async fn test_unmigratable_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        std::fs::write(&path, "not a database\n".repeat(64)).unwrap();

        let result = SqliteBackend::connect(DatabaseLocation::File(path), "Test", 1024).await;
        assert!(matches!(result, Err(CacheError::Migration(_))));
    }
}
