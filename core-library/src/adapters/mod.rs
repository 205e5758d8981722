//! Backend driver implementations
//!
//! Both drivers implement [`bridge_traits::database::DatabaseDriver`] over
//! SQLite; they differ in how a transaction body reaches the engine.

pub mod sqlite_sync;
pub mod worker;

pub use sqlite_sync::SqliteSyncDriver;
pub use worker::{WorkerDriver, WorkerStats, WorkerStatsSnapshot};
