//! # Sync Module
//!
//! Mirrors schema-discovered collections from a GraphQL endpoint into SQLite.
//!
//! ## Components
//!
//! - **Fetcher** (`fetcher`): one page per call with bounded retry on
//!   `429`/`502`/`504` and quota-aware pacing
//! - **Leases** (`lease`): per-collection advisory locks stamped with this
//!   process's worker id, released on scope exit and on shutdown
//! - **State machine** (`state`): validated per-collection transitions
//! - **Orchestrator** (`orchestrator`): cycles over collections in one-shot
//!   or continuous mode, isolating per-collection failures
//!
//! ## Errors
//!
//! [`SyncError::is_fatal_to_run`] separates failures that end the cycle
//! (schema, auth) from those that only end the current collection.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod lease;
pub mod orchestrator;
pub mod state;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use fetcher::{parse_reset_header, FetchPolicy, PageQuery, PageVariables, RateLimitedFetcher};
pub use lease::{generate_worker_id, LeaseGuard, LeaseManager};
pub use orchestrator::{
    CollectionOutcome, CollectionReport, CycleReport, SyncContext, SyncOrchestrator,
};
pub use state::{CollectionRun, CollectionState};
