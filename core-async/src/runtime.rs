//! Runtime utilities that abstract over the underlying async executor.
//!
//! Downstream crates use these wrappers so they never name Tokio directly.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a fresh multi-threaded runtime.
///
/// Used by the `#[core_async::main]` and `#[core_async::test]` macros.
///
/// # Panics
///
/// Panics if the runtime cannot be constructed (e.g. the OS refuses to spawn
/// worker threads). There is nothing useful a caller could do at that point.
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime")
        .block_on(future)
}
