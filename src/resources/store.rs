//! SQLite-backed relational store.
//!
//! Writes accumulate in an implicit transaction that is committed by the
//! checkpoint job (and once more on close). All connection access happens on
//! the blocking pool behind a mutex, so async workers never block on disk.

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{Resource, ResourceHandle};
use crate::types::{Error, Result, StoreConfig};

pub use rusqlite::types::Value as SqlValue;

/// Schema shipped with the crate, used when no schema file is on disk.
pub const BUNDLED_SCHEMA: &str = include_str!("../../data/build.sql");

/// Shared store connection.
#[derive(Debug)]
pub struct Store {
    conn: Arc<Mutex<Option<Connection>>>,
    path: PathBuf,
}

impl Store {
    /// Open the database, enable WAL and apply the schema script.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let schema = match tokio::fs::read_to_string(&config.schema_path).await {
            Ok(script) => script,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    "schema_file_missing: path={}, using bundled schema",
                    config.schema_path.display()
                );
                BUNDLED_SCHEMA.to_string()
            }
            Err(e) => return Err(e.into()),
        };
        Self::open_with_schema(&config.path, schema).await
    }

    pub async fn open_with_schema(path: &Path, schema: String) -> Result<Self> {
        let path = path.to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&open_path)?;
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get(0))?;
            tracing::debug!("store_journal_mode: mode={}", mode);
            conn.execute_batch(&schema)?;
            Ok(conn)
        })
        .await
        .map_err(|e| Error::internal(format!("store open task failed: {}", e)))??;

        tracing::info!("store_opened: path={}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::internal("store connection lock poisoned"))?;
            let conn = guard.as_mut().ok_or_else(|| Error::not_acquired("store"))?;
            f(conn)
        })
        .await
        .map_err(|e| Error::internal(format!("store task failed: {}", e)))?
    }

    /// Execute a statement inside the pending transaction.
    pub async fn execute(&self, sql: impl Into<String>, params: Vec<SqlValue>) -> Result<usize> {
        let sql = sql.into();
        self.with_conn(move |conn| {
            if conn.is_autocommit() {
                conn.execute_batch("BEGIN DEFERRED")?;
            }
            let changed = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
            Ok(changed)
        })
        .await
    }

    /// Run a query and collect every row as raw values.
    pub async fn query(&self, sql: impl Into<String>, params: Vec<SqlValue>) -> Result<Vec<Vec<SqlValue>>> {
        let sql = sql.into();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns = stmt.column_count();
            let rows = stmt.query_map(
                rusqlite::params_from_iter(params.iter()),
                |row| -> rusqlite::Result<Vec<SqlValue>> {
                    (0..columns).map(|i| row.get::<_, SqlValue>(i)).collect()
                },
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Append one row to the command log.
    pub async fn record_command(&self, command: &str, caller: &str, outcome: &str) -> Result<()> {
        self.execute(
            "INSERT INTO command_log (command, caller, outcome) VALUES (?1, ?2, ?3)",
            vec![
                SqlValue::Text(command.to_string()),
                SqlValue::Text(caller.to_string()),
                SqlValue::Text(outcome.to_string()),
            ],
        )
        .await
        .map(|_| ())
    }

    /// True when uncommitted writes are pending.
    pub async fn has_pending(&self) -> Result<bool> {
        self.with_conn(|conn| Ok(!conn.is_autocommit())).await
    }

    /// Commit pending writes. Returns false if there was nothing to commit.
    pub async fn commit(&self) -> Result<bool> {
        self.with_conn(|conn| {
            if conn.is_autocommit() {
                return Ok(false);
            }
            conn.execute_batch("COMMIT")?;
            Ok(true)
        })
        .await
    }

    /// Commit and close the connection. Later calls fail with `NotAcquired`.
    pub async fn close(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::internal("store connection lock poisoned"))?;
            let Some(conn) = guard.take() else {
                return Ok(());
            };
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
            conn.close().map_err(|(_, e)| Error::from(e))
        })
        .await
        .map_err(|e| Error::internal(format!("store close task failed: {}", e)))??;

        tracing::info!("store_closed: path={}", self.path.display());
        Ok(())
    }
}

/// Registry handle producing a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreHandle {
    name: String,
    config: StoreConfig,
}

impl StoreHandle {
    pub const DEFAULT_NAME: &'static str = "store";

    pub fn new(config: StoreConfig) -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            config,
        }
    }
}

#[async_trait]
impl ResourceHandle for StoreHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Result<Resource> {
        Ok(Arc::new(Store::open(&self.config).await?))
    }

    async fn release(&self, resource: Resource) -> Result<()> {
        let store = resource
            .downcast::<Store>()
            .map_err(|_| Error::internal(format!("resource '{}' is not a store", self.name)))?;
        store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("data").join("db.sqlite3"),
            schema_path: dir.path().join("missing.sql"),
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_with_bundled_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&config_in(&dir)).await.unwrap();

        let rows = store
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'command_log'",
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_schema_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir);
        config.schema_path = dir.path().join("build.sql");
        std::fs::write(&config.schema_path, "CREATE TABLE custom (id INTEGER);").unwrap();

        let store = Store::open(&config).await.unwrap();
        let rows = store
            .query("SELECT name FROM sqlite_master WHERE name = 'custom'", vec![])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_writes_pending_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&config_in(&dir)).await.unwrap();

        assert!(!store.commit().await.unwrap());
        store.record_command("ping", "42", "ok").await.unwrap();
        assert!(store.has_pending().await.unwrap());

        assert!(store.commit().await.unwrap());
        assert!(!store.has_pending().await.unwrap());

        let rows = store
            .query("SELECT command, caller FROM command_log", vec![])
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                SqlValue::Text("ping".to_string()),
                SqlValue::Text("42".to_string())
            ]]
        );
    }

    #[tokio::test]
    async fn test_close_commits_and_blocks_further_use() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let store = Store::open(&config).await.unwrap();
        store.record_command("deploy", "7", "ok").await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(store.commit().await, Err(Error::NotAcquired(_))));
        store.close().await.unwrap();

        let reopened = Store::open(&config).await.unwrap();
        let rows = reopened.query("SELECT id FROM command_log", vec![]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
