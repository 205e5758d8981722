//! Execution unit side of the worker driver.
//!
//! Owns the `sqlx` pool on a dedicated thread with its own current-thread
//! runtime. Every open transaction is a task holding a `sqlx::Transaction`
//! and draining its own command queue, so statements of one transaction run
//! in arrival order while other transactions and reads proceed.

use bridge_traits::database::{QueryRow, QueryValue, Statement, TxMode};
use bridge_traits::error::{BridgeError, Result};
use bytes::Bytes;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::protocol::{self, Envelope, WorkerRequest, WorkerResponse};

const MAX_CONNECTIONS: u32 = 4;

enum TxCommand {
    Execute(Statement, oneshot::Sender<Bytes>),
    Commit(oneshot::Sender<Bytes>),
    Rollback(oneshot::Sender<Bytes>),
}

fn respond(reply: oneshot::Sender<Bytes>, response: WorkerResponse) {
    let payload = match protocol::encode(&response) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "Failed to encode worker response");
            return;
        }
    };
    // The caller may have given up waiting
    let _ = reply.send(payload);
}

fn rows_or_error(result: std::result::Result<Vec<QueryRow>, sqlx::Error>) -> WorkerResponse {
    match result {
        Ok(rows) => WorkerResponse::Rows(rows),
        Err(e) => WorkerResponse::Error(e.to_string()),
    }
}

fn done_or_error(result: std::result::Result<(), sqlx::Error>) -> WorkerResponse {
    match result {
        Ok(()) => WorkerResponse::Done,
        Err(e) => WorkerResponse::Error(e.to_string()),
    }
}

/// Convert a sqlx row to a QueryRow
fn row_to_query_row(row: &SqliteRow) -> QueryRow {
    let mut result = HashMap::new();

    for column in row.columns() {
        let ordinal = column.ordinal();
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(ordinal) {
            v.map(QueryValue::Integer).unwrap_or(QueryValue::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(ordinal) {
            v.map(QueryValue::Real).unwrap_or(QueryValue::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(ordinal) {
            v.map(QueryValue::Text).unwrap_or(QueryValue::Null)
        } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(ordinal) {
            v.map(QueryValue::Blob).unwrap_or(QueryValue::Null)
        } else {
            QueryValue::Null
        };

        result.insert(column.name().to_string(), value);
    }

    result
}

fn bind_params<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [QueryValue],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    let mut query = query;
    for param in params {
        query = match param {
            QueryValue::Null => query.bind(None::<i64>),
            QueryValue::Integer(i) => query.bind(*i),
            QueryValue::Real(r) => query.bind(*r),
            QueryValue::Text(s) => query.bind(s.as_str()),
            QueryValue::Blob(b) => query.bind(b.as_slice()),
        };
    }
    query
}

async fn run_statement(
    conn: &mut SqliteConnection,
    statement: &Statement,
) -> std::result::Result<Vec<QueryRow>, sqlx::Error> {
    let rows = bind_params(sqlx::query(&statement.sql), &statement.params)
        .fetch_all(conn)
        .await?;
    Ok(rows.iter().map(row_to_query_row).collect())
}

async fn run_bulk(pool: &SqlitePool, statements: &[Statement]) -> std::result::Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in statements {
        bind_params(sqlx::query(&statement.sql), &statement.params)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await
}

/// Start the execution unit on its own thread.
///
/// `ready` resolves once the pool is open, or with the error that prevented it.
pub(crate) fn spawn(
    path: PathBuf,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    ready: oneshot::Sender<Result<()>>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("songbook-db-worker".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready.send(Err(BridgeError::Io(e)));
                    return;
                }
            };

            runtime.block_on(async move {
                match WorkerExecutor::open(&path).await {
                    Ok(executor) => {
                        let _ = ready.send(Ok(()));
                        executor.run(inbox).await;
                    }
                    Err(e) => {
                        let _ = ready.send(Err(e));
                    }
                }
            });
        })
}

/// Owns the pool and routes requests to transaction tasks
pub struct WorkerExecutor {
    pool: SqlitePool,
    transactions: HashMap<u64, mpsc::UnboundedSender<TxCommand>>,
}

impl WorkerExecutor {
    async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to open worker pool");
                BridgeError::DatabaseError(format!("Connection pool creation failed: {}", e))
            })?;

        info!(path = %path.display(), "Worker execution unit ready");
        Ok(Self {
            pool,
            transactions: HashMap::new(),
        })
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Envelope>) {
        while let Some(Envelope { payload, reply }) = inbox.recv().await {
            let request = match protocol::decode::<WorkerRequest>(&payload) {
                Ok(request) => request,
                Err(e) => {
                    respond(reply, WorkerResponse::Error(e.to_string()));
                    continue;
                }
            };

            match request {
                WorkerRequest::Begin { tx, mode } => self.begin(tx, mode, reply),
                WorkerRequest::Execute { tx, statement } => {
                    self.forward(tx, TxCommand::Execute(statement, reply), false)
                }
                WorkerRequest::Commit { tx } => self.forward(tx, TxCommand::Commit(reply), true),
                WorkerRequest::Rollback { tx } => {
                    self.forward(tx, TxCommand::Rollback(reply), true)
                }
                WorkerRequest::Query { statement } => {
                    let pool = self.pool.clone();
                    tokio::spawn(async move {
                        let result = match pool.acquire().await {
                            Ok(mut conn) => run_statement(&mut *conn, &statement).await,
                            Err(e) => Err(e),
                        };
                        respond(reply, rows_or_error(result));
                    });
                }
                WorkerRequest::BulkExec { statements } => {
                    let pool = self.pool.clone();
                    tokio::spawn(async move {
                        debug!(statements = statements.len(), "Running bulk batch");
                        respond(reply, done_or_error(run_bulk(&pool, &statements).await));
                    });
                }
                WorkerRequest::Close => {
                    // Dropping the queues rolls back anything still open
                    self.transactions.clear();
                    self.pool.close().await;
                    info!("Worker execution unit closed");
                    respond(reply, WorkerResponse::Done);
                    return;
                }
            }
        }
        debug!("Worker inbox closed");
        self.pool.close().await;
    }

    fn begin(&mut self, tx_id: u64, mode: TxMode, reply: oneshot::Sender<Bytes>) {
        let (commands, mut queue) = mpsc::unbounded_channel();
        self.transactions.insert(tx_id, commands);
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let mut tx = match pool.begin().await {
                Ok(tx) => {
                    respond(reply, WorkerResponse::Done);
                    tx
                }
                Err(e) => {
                    respond(reply, WorkerResponse::Error(e.to_string()));
                    return;
                }
            };
            debug!(tx = tx_id, write = mode.is_write(), "Transaction open");

            while let Some(command) = queue.recv().await {
                match command {
                    TxCommand::Execute(statement, reply) => {
                        let result = run_statement(&mut *tx, &statement).await;
                        respond(reply, rows_or_error(result));
                    }
                    TxCommand::Commit(reply) => {
                        respond(reply, done_or_error(tx.commit().await));
                        return;
                    }
                    TxCommand::Rollback(reply) => {
                        respond(reply, done_or_error(tx.rollback().await));
                        return;
                    }
                }
            }
            // Queue dropped without commit; `tx` rolls back on drop
            warn!(tx = tx_id, "Transaction abandoned");
        });
    }

    fn forward(&mut self, tx_id: u64, command: TxCommand, finish: bool) {
        let queue = if finish {
            self.transactions.remove(&tx_id)
        } else {
            self.transactions.get(&tx_id).cloned()
        };

        let Some(queue) = queue else {
            reject(command, format!("Unknown transaction {}", tx_id));
            return;
        };
        if let Err(mpsc::error::SendError(command)) = queue.send(command) {
            reject(command, format!("Transaction {} already finished", tx_id));
        }
    }
}

fn reject(command: TxCommand, message: String) {
    let reply = match command {
        TxCommand::Execute(_, reply) | TxCommand::Commit(reply) | TxCommand::Rollback(reply) => {
            reply
        }
    };
    respond(reply, WorkerResponse::Error(message));
}
