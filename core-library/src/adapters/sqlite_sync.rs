//! Synchronous Callback Driver
//!
//! Wraps a single `rusqlite` connection. A transaction body is one
//! synchronous closure executed on the blocking pool: nothing inside it can
//! suspend, and the connection mutex makes every transaction exclusive.
//!
//! Completion is confirmed by a trailing `SELECT 1` before commit; any error
//! inside the body triggers an explicit rollback.

use async_trait::async_trait;
use bridge_traits::database::{DatabaseDriver, QueryRow, QueryValue, Statement, TxMode};
use bridge_traits::error::{BridgeError, Result};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const MEMORY_PATH: &str = ":memory:";

/// [`DatabaseDriver`] over one blocking SQLite connection
pub struct SqliteSyncDriver {
    conn: Arc<Mutex<Option<Connection>>>,
}

fn db_error(e: rusqlite::Error) -> BridgeError {
    BridgeError::DatabaseError(e.to_string())
}

fn to_value(param: &QueryValue) -> Value {
    match param {
        QueryValue::Null => Value::Null,
        QueryValue::Integer(i) => Value::Integer(*i),
        QueryValue::Real(r) => Value::Real(*r),
        QueryValue::Text(s) => Value::Text(s.clone()),
        QueryValue::Blob(b) => Value::Blob(b.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> QueryValue {
    match value {
        ValueRef::Null => QueryValue::Null,
        ValueRef::Integer(i) => QueryValue::Integer(i),
        ValueRef::Real(r) => QueryValue::Real(r),
        ValueRef::Text(t) => QueryValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => QueryValue::Blob(b.to_vec()),
    }
}

/// Run one statement and collect whatever rows it yields
fn run_statement(conn: &Connection, statement: &Statement) -> rusqlite::Result<Vec<QueryRow>> {
    let mut stmt = conn.prepare_cached(&statement.sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query(params_from_iter(statement.params.iter().map(to_value)))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            record.insert(name.clone(), from_value_ref(row.get_ref(index)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn run_in_transaction<T, F>(conn: &mut Connection, mode: TxMode, body: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
{
    let behavior = if mode.is_write() {
        TransactionBehavior::Immediate
    } else {
        TransactionBehavior::Deferred
    };
    let tx = conn.transaction_with_behavior(behavior).map_err(db_error)?;

    let outcome = body(&tx).and_then(|value| {
        tx.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(value)
    });

    match outcome {
        Ok(value) => {
            tx.commit().map_err(db_error)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback() {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(db_error(e))
        }
    }
}

impl SqliteSyncDriver {
    /// Open (or create) the database at `path`; `:memory:` opens a private in-memory store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let in_memory = path.as_os_str() == MEMORY_PATH;

        let conn = if in_memory {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(db_error)?;

        if !in_memory {
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(db_error)?;
            debug!(journal_mode = %mode, "Journal mode set");
        }
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(db_error)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_error)?;

        info!(path = %path.display(), "Opened synchronous SQLite driver");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(MEMORY_PATH)
    }

    /// Run `body` as one synchronous transaction on the blocking pool.
    pub async fn with_transaction<T, F>(&self, mode: TxMode, body: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_connection(move |conn| run_in_transaction(conn, mode, body))
            .await
    }

    async fn with_connection<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| BridgeError::DatabaseError("Connection lock poisoned".to_string()))?;
            let conn = guard
                .as_mut()
                .ok_or_else(|| BridgeError::Disconnected("Connection closed".to_string()))?;
            work(conn)
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Blocking task failed: {}", e)))?
    }
}

#[async_trait]
impl DatabaseDriver for SqliteSyncDriver {
    fn name(&self) -> &'static str {
        "sqlite-sync"
    }

    async fn transaction(&self, batch: Vec<Statement>, mode: TxMode) -> Result<Vec<Vec<QueryRow>>> {
        self.with_transaction(mode, move |tx| {
            batch
                .iter()
                .map(|statement| run_statement(tx, statement))
                .collect()
        })
        .await
    }

    async fn execute_one(&self, sql: &str, params: &[QueryValue]) -> Result<Vec<QueryRow>> {
        let statement = Statement::new(sql, params.to_vec());
        self.with_connection(move |conn| run_statement(conn, &statement).map_err(db_error))
            .await
    }

    /// Trial objects never survive: the probe always rolls back.
    async fn probe(&self, trial: Vec<Statement>) -> bool {
        let accepted = self
            .with_connection(move |conn| {
                let tx = conn.transaction().map_err(db_error)?;
                let accepted = trial.iter().all(|s| run_statement(&tx, s).is_ok());
                tx.rollback().map_err(db_error)?;
                Ok(accepted)
            })
            .await;
        matches!(accepted, Ok(true))
    }

    async fn close(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let taken = conn.lock().ok().and_then(|mut guard| guard.take());
            if let Some(conn) = taken {
                conn.close().map_err(|(_, e)| db_error(e))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Blocking task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn driver_with_table() -> SqliteSyncDriver {
        let driver = SqliteSyncDriver::open_in_memory().unwrap();
        driver
            .execute_one("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();
        driver
    }

    #[tokio::test]
    async fn test_transaction_returns_rows_per_statement() {
        let driver = driver_with_table().await;

        let results = driver
            .transaction(
                vec![
                    Statement::new("INSERT INTO t (id, name) VALUES (?, ?)", vec![1.into(), "a".into()]),
                    Statement::new("INSERT INTO t (id, name) VALUES (?, ?)", vec![2.into(), QueryValue::Null]),
                    Statement::bare("SELECT id, name FROM t ORDER BY id"),
                ],
                TxMode::ReadWrite,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_empty());
        assert_eq!(results[2].len(), 2);
        assert_eq!(results[2][0].get("name"), Some(&QueryValue::Text("a".into())));
        assert_eq!(results[2][1].get("name"), Some(&QueryValue::Null));
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back() {
        let driver = driver_with_table().await;

        let err = driver
            .transaction(
                vec![
                    Statement::new("INSERT INTO t (id) VALUES (?)", vec![1.into()]),
                    Statement::new("INSERT INTO t (id) VALUES (?)", vec![1.into()]),
                ],
                TxMode::ReadWrite,
            )
            .await;
        assert!(err.is_err());

        let rows = driver.execute_one("SELECT COUNT(*) AS n FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].get("n"), Some(&QueryValue::Integer(0)));
    }

    #[tokio::test]
    async fn test_probe_leaves_no_trace() {
        let driver = SqliteSyncDriver::open_in_memory().unwrap();

        assert!(
            driver
                .probe(vec![Statement::bare(
                    "CREATE TABLE p (id INTEGER PRIMARY KEY) WITHOUT ROWID"
                )])
                .await
        );
        assert!(
            driver
                .probe(vec![Statement::bare("CREATE VIRTUAL TABLE f USING fts5(body)")])
                .await
        );
        assert!(!driver.probe(vec![Statement::bare("CREATE NONSENSE")]).await);

        let rows = driver
            .execute_one("SELECT name FROM sqlite_master WHERE name IN ('p', 'f')", &[])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_with_transaction_closure() {
        let driver = driver_with_table().await;

        let count = driver
            .with_transaction(TxMode::ReadWrite, |tx| {
                tx.execute("INSERT INTO t (id, name) VALUES (7, 'x')", [])?;
                tx.query_row("SELECT COUNT(*) FROM t", [], |row| row.get::<_, i64>(0))
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_closed_driver_reports_disconnected() {
        let driver = driver_with_table().await;
        driver.close().await.unwrap();

        let err = driver.execute_one("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, BridgeError::Disconnected(_)));
    }
}
