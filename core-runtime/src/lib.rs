//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the collection mirror:
//! - Logging and tracing setup
//! - Run configuration
//! - Event bus for sync progress
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its logging conventions and
//! event types. It holds no network or database code.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{Credentials, EndpointSource, MirrorConfig, RunMode};
pub use error::{Error, Result};
pub use events::{EventBus, SyncEvent};
