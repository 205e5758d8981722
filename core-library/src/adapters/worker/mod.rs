//! Message-Passed Worker Driver
//!
//! The engine lives in an isolated execution unit (see [`executor`]) that
//! is reachable only through serialized request/reply messages. This side
//! turns the [`DatabaseDriver`] contract into those messages:
//!
//! - Write transactions are serialized by an async mutex; reads are not.
//! - Inside a transaction every statement is dispatched up front and the
//!   replies are awaited together before commit.
//! - [`bulk_insert`](DatabaseDriver::bulk_insert) ships the whole batch in
//!   one message, run as one local transaction on the other side.
//!
//! Message and byte counts are tracked in [`WorkerStats`].

pub mod executor;
pub mod protocol;

use async_trait::async_trait;
use bridge_traits::database::{DatabaseDriver, QueryRow, QueryValue, Statement, TxMode};
use bridge_traits::error::{BridgeError, Result};
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use protocol::{Envelope, WorkerRequest, WorkerResponse};

/// Boundary traffic counters
#[derive(Debug, Default)]
pub struct WorkerStats {
    messages: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub messages: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl WorkerStats {
    fn record_sent(&self, bytes: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// [`DatabaseDriver`] talking to a [`executor::WorkerExecutor`] on its own thread
pub struct WorkerDriver {
    sender: mpsc::UnboundedSender<Envelope>,
    write_gate: Mutex<()>,
    next_tx: AtomicU64,
    stats: Arc<WorkerStats>,
    thread: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WorkerDriver {
    /// Start the execution unit over the database file at `path`.
    ///
    /// Resolves once the unit has opened its pool.
    pub async fn spawn(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (sender, inbox) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = executor::spawn(path.clone(), inbox, ready_tx)?;
        ready_rx
            .await
            .map_err(|_| BridgeError::Disconnected("Worker exited during startup".to_string()))??;

        info!(path = %path.display(), "Worker driver ready");
        Ok(Self {
            sender,
            write_gate: Mutex::new(()),
            next_tx: AtomicU64::new(1),
            stats: Arc::new(WorkerStats::default()),
            thread: std::sync::Mutex::new(Some(handle)),
        })
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Send a request without waiting for its reply
    fn dispatch(&self, request: &WorkerRequest) -> Result<oneshot::Receiver<Bytes>> {
        let payload = protocol::encode(request)?;
        let (reply, receiver) = oneshot::channel();
        self.stats.record_sent(payload.len());
        self.sender
            .send(Envelope { payload, reply })
            .map_err(|_| BridgeError::Disconnected("Worker is not running".to_string()))?;
        Ok(receiver)
    }

    fn receive(
        &self,
        reply: std::result::Result<Bytes, oneshot::error::RecvError>,
    ) -> Result<WorkerResponse> {
        let payload = reply
            .map_err(|_| BridgeError::Disconnected("Worker dropped the reply".to_string()))?;
        self.stats.record_received(payload.len());
        protocol::decode(&payload)
    }

    async fn call(&self, request: &WorkerRequest) -> Result<Vec<QueryRow>> {
        let receiver = self.dispatch(request)?;
        self.receive(receiver.await)?.into_rows()
    }

    async fn rollback(&self, tx: u64) {
        if let Err(e) = self.call(&WorkerRequest::Rollback { tx }).await {
            warn!(tx, error = %e, "Rollback failed");
        }
    }
}

#[async_trait]
impl DatabaseDriver for WorkerDriver {
    fn name(&self) -> &'static str {
        "sqlite-worker"
    }

    async fn transaction(&self, batch: Vec<Statement>, mode: TxMode) -> Result<Vec<Vec<QueryRow>>> {
        let _gate = if mode.is_write() {
            Some(self.write_gate.lock().await)
        } else {
            None
        };

        let tx = self.next_tx.fetch_add(1, Ordering::Relaxed);
        self.call(&WorkerRequest::Begin { tx, mode }).await?;

        let mut pending = Vec::with_capacity(batch.len());
        for statement in batch {
            match self.dispatch(&WorkerRequest::Execute { tx, statement }) {
                Ok(receiver) => pending.push(receiver),
                Err(e) => {
                    self.rollback(tx).await;
                    return Err(e);
                }
            }
        }

        let mut results = Vec::with_capacity(pending.len());
        let mut failure = None;
        for reply in join_all(pending).await {
            match self.receive(reply).and_then(WorkerResponse::into_rows) {
                Ok(rows) => results.push(rows),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            debug!(tx, error = %e, "Statement failed, rolling back");
            self.rollback(tx).await;
            return Err(e);
        }

        self.call(&WorkerRequest::Commit { tx }).await?;
        Ok(results)
    }

    async fn execute_one(&self, sql: &str, params: &[QueryValue]) -> Result<Vec<QueryRow>> {
        self.call(&WorkerRequest::Query {
            statement: Statement::new(sql, params.to_vec()),
        })
        .await
    }

    fn supports_bulk_insert(&self) -> bool {
        true
    }

    async fn bulk_insert(&self, batch: Vec<Statement>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let _gate = self.write_gate.lock().await;
        debug!(statements = batch.len(), "Shipping bulk batch");
        self.call(&WorkerRequest::BulkExec { statements: batch })
            .await
            .map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        self.call(&WorkerRequest::Close).await?;

        let handle = self.thread.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| BridgeError::OperationFailed(format!("Join failed: {}", e)))?
                .map_err(|_| BridgeError::OperationFailed("Worker thread panicked".to_string()))?;
        }
        Ok(())
    }
}
