//! # Language Sync Module
//!
//! Keeps locally stored language partitions synchronized with the remote
//! song catalog.
//!
//! ## Overview
//!
//! This module manages:
//! - Diffing the desired language list against what the store holds
//! - Downloading and importing partitions with bounded parallelism
//! - Removing languages that are no longer wanted
//! - Refreshing stale partitions and repair-fetching single songs
//!
//! ## Components
//!
//! - **Language State Machine** (`state`): absent/downloading/importing/present/removing
//! - **Partitions** (`partition`): wire payload parsing, with key decompression
//! - **Progress** (`progress`): weighted download/import blend across languages
//! - **Last Update Map** (`last_update`): per-language import timestamps
//! - **Remote Catalog** (`catalog`): what the orchestrator needs from the network
//! - **Sync Coordinator** (`coordinator`): populate, refresh and repair

pub mod catalog;
pub mod coordinator;
pub mod error;
pub mod last_update;
pub mod partition;
pub mod progress;
pub mod state;

pub use catalog::{DownloadProgress, LanguageIndex, RemoteCatalog};
pub use coordinator::{PopulateReport, Repaired, SyncConfig, SyncCoordinator};
pub use error::{Result, SyncError};
pub use last_update::{LastUpdateMap, LAST_UPDATE_KEY};
pub use partition::{parse_partition, Partition};
pub use progress::ProgressTracker;
pub use state::{LanguageState, LanguageStates};
