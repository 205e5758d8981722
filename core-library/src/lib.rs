//! # Song Store Core
//!
//! Relational storage, query compilation and the backend contract for the
//! offline song corpus.
//!
//! ## Overview
//!
//! This crate owns:
//! - The wire key codec and the song/source/album models
//! - Schema DDL, capability probing and the schema-version marker
//! - The filter-to-SQL query compiler and row upsert builders
//! - [`SongRepository`](repository::SongRepository), the data access layer
//! - The [`SongDatabase`](contract::SongDatabase) contract shared by every backend
//! - Two [`DatabaseDriver`](bridge_traits::database::DatabaseDriver) implementations:
//!   a synchronous callback driver and a message-passed worker driver

pub mod adapters;
pub mod codec;
pub mod contract;
pub mod error;
pub mod import;
pub mod models;
pub mod pagination;
pub mod query;
pub mod repository;
pub mod schema;
pub mod text;

pub use contract::{DatabaseCommon, ProgressFn, SongDatabase};
pub use error::{LibraryError, Result};
pub use models::{Album, MetaFilter, MetaResult, SearchResult, Song, Source};
pub use pagination::{Page, PageRequest};
pub use query::{QuerySpec, SearchKind, SongFilter, SortOrder};
pub use repository::SongRepository;
pub use schema::{Capabilities, FtsVariant, SchemaManager, SchemaState};
