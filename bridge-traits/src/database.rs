//! Database Driver Abstraction
//!
//! A single contract over two structurally different transaction models:
//! - Synchronous callback transactions, where the whole body runs without
//!   suspending (rusqlite on a blocking thread).
//! - Message-passed transactions, where every statement crosses into an
//!   isolated execution unit that owns the engine.
//!
//! Transaction bodies are ordered batches of [`Statement`]s. A read that
//! decides later writes goes through [`DatabaseDriver::execute_one`] first;
//! the writes then ship as one batch.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::database::{DatabaseDriver, Statement, TxMode};
//!
//! let results = driver
//!     .transaction(
//!         vec![
//!             Statement::new("DELETE FROM songs WHERE lang = ?", vec!["en".into()]),
//!             Statement::bare("SELECT COUNT(*) AS total FROM songs"),
//!         ],
//!         TxMode::ReadWrite,
//!     )
//!     .await?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// One result row, keyed by column name
pub type QueryRow = HashMap<String, QueryValue>;

/// SQLite storage classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl QueryValue {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            QueryValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    /// Integers widen; averages written by SQLite may come back either way
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            QueryValue::Real(r) => Some(r),
            QueryValue::Integer(i) => Some(i as f64),
            _ => None,
        }
    }

    /// Flags are stored as 0/1 integers
    pub fn as_bool(&self) -> Option<bool> {
        self.as_i64().map(|i| i != 0)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! query_value_from {
    ($($ty:ty => |$v:ident| $conv:expr),* $(,)?) => {
        $(impl From<$ty> for QueryValue {
            fn from($v: $ty) -> Self {
                $conv
            }
        })*
    };
}

query_value_from! {
    i64 => |v| QueryValue::Integer(v),
    i32 => |v| QueryValue::Integer(i64::from(v)),
    bool => |v| QueryValue::Integer(i64::from(v)),
    f64 => |v| QueryValue::Real(v),
    String => |v| QueryValue::Text(v),
    &str => |v| QueryValue::Text(v.to_owned()),
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => QueryValue::Null,
        }
    }
}

// =============================================================================
// Statements
// =============================================================================

/// One SQL statement with positional parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<QueryValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<QueryValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Statement without parameters
    pub fn bare(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

impl TxMode {
    pub fn is_write(self) -> bool {
        matches!(self, TxMode::ReadWrite)
    }
}

// =============================================================================
// Database Driver Trait
// =============================================================================

/// Rows per transaction when a driver has no dedicated bulk path
pub const DEFAULT_BULK_CHUNK: usize = 500;

/// Backend driver contract shared by every local storage engine.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; the orchestrator imports several
/// languages concurrently through one shared driver.
///
/// ## Transaction Semantics
///
/// [`transaction`](Self::transaction) runs every statement of the batch in
/// order inside one engine transaction and returns one row set per
/// statement. If any statement fails the whole transaction is rolled back
/// and the error is returned. Write transactions never partially overlap.
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Short driver name for logs
    fn name(&self) -> &'static str;

    /// Run `batch` atomically and return the rows each statement produced
    async fn transaction(&self, batch: Vec<Statement>, mode: TxMode) -> Result<Vec<Vec<QueryRow>>>;

    /// Run a single statement outside an explicit transaction
    async fn execute_one(&self, sql: &str, params: &[QueryValue]) -> Result<Vec<QueryRow>>;

    /// Try `trial` and report whether the engine accepted it.
    ///
    /// Failure is the expected "capability absent" answer, never an error.
    async fn probe(&self, trial: Vec<Statement>) -> bool {
        self.transaction(trial, TxMode::ReadWrite).await.is_ok()
    }

    /// Whether [`bulk_insert`](Self::bulk_insert) ships the batch in one call
    fn supports_bulk_insert(&self) -> bool {
        false
    }

    /// Run a large write batch.
    ///
    /// The default splits it into write transactions of
    /// [`DEFAULT_BULK_CHUNK`] statements.
    async fn bulk_insert(&self, batch: Vec<Statement>) -> Result<()> {
        let mut batch = batch;
        while !batch.is_empty() {
            let rest = batch.split_off(batch.len().min(DEFAULT_BULK_CHUNK));
            self.transaction(batch, TxMode::ReadWrite).await?;
            batch = rest;
        }
        Ok(())
    }

    /// Release the underlying engine
    async fn close(&self) -> Result<()>;
}

/// Read a typed column out of a [`QueryRow`].
///
/// Required kinds (`i64`, `String`) return early with
/// [`BridgeError::DatabaseError`](crate::BridgeError) when the column is
/// missing or has another type; `bool` reads a missing column as false and
/// the `Option` kinds map NULL to `None`.
#[macro_export]
macro_rules! get_column {
    ($row:expr, $col:expr, i64) => {
        $row.get($col).and_then(|v| v.as_i64()).ok_or_else(|| {
            $crate::BridgeError::DatabaseError(format!("column '{}' is not an integer", $col))
        })?
    };
    ($row:expr, $col:expr, String) => {
        $row.get($col)
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                $crate::BridgeError::DatabaseError(format!("column '{}' is not text", $col))
            })?
    };
    ($row:expr, $col:expr, bool) => {
        $row.get($col).and_then(|v| v.as_bool()).unwrap_or(false)
    };
    ($row:expr, $col:expr, Option<String>) => {
        $row.get($col).and_then(|v| v.as_str()).map(str::to_owned)
    };
    ($row:expr, $col:expr, Option<i64>) => {
        $row.get($col).and_then(|v| v.as_i64())
    };
}
