//! Shared test utilities for tollgate integration tests.
//!
//! This crate provides:
//! - [`TracingBackend`]: storage wrapper that records operations, injects
//!   failures and hides objects from listings
//! - [`FaultyCoordinator`]: coordinator wrapper with seeded random and
//!   targeted failures
//! - [`Harness`]: a ready-made external log store over both doubles

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod coordinator;
pub mod harness;
pub mod storage;

pub use coordinator::*;
pub use harness::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tollgate_external=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
