//! # Core Store
//!
//! SQLite persistence for the mirror.
//!
//! - [`db`]: connection pool with WAL and embedded migrations
//! - [`sync_state`]: per-collection cursor and lease rows
//! - [`tables`]: element tables, idempotent upserts and atomic page
//!   application
//!
//! A page is applied in one transaction: items are upserted, `deletedIds`
//! removed and the cursor advanced together, so the stored cursor never runs
//! ahead of the stored rows.

pub mod db;
pub mod error;
pub mod models;
pub mod sync_state;
pub mod tables;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{Result, StoreError};
pub use models::{Page, PageOutcome, Record};
pub use sync_state::{SqliteSyncStateRepository, SyncStateRecord, SyncStateRepository};
pub use tables::{column_type, TableSync};

pub use sqlx::SqlitePool;
