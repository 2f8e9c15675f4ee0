//! # Host Bridge Traits
//!
//! Capability traits the core requires from its host.
//!
//! ## Overview
//!
//! The schema, auth and sync crates never talk to the network or the wall
//! clock directly. They receive trait objects instead, which keeps the
//! orchestration logic testable against scripted responses and a manual clock.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - One HTTP round trip per call
//! - [`Clock`](time::Clock) - Time source for lease expiry and token caching
//!
//! ## Implementations
//!
//! | Capability | Implementation |
//! |------------|----------------|
//! | `HttpClient` | `bridge_desktop::ReqwestHttpClient` |
//! | `Clock` | [`SystemClock`](time::SystemClock), [`ManualClock`](time::ManualClock) for tests |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert platform-specific errors into it with actionable messages.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single instance can be shared
//! by concurrent collection workers.

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use time::{Clock, ManualClock, SystemClock};
