//! # tollgate-external
//!
//! A log store for object stores that cannot be trusted with mutual exclusion
//! or consistent listing on their own. A separate, strongly consistent keyed
//! store (the coordinator) decides which writer owns each commit file name.
//!
//! - [`entry`]: the coordinator record and its attribute encoding
//! - [`coordinator`]: backend contract and [`CoordinatorClient`]
//! - [`memory`] / [`storage_coordinator`]: coordinator backends
//! - [`bootstrap`]: creating and waiting for the coordinator table
//! - [`external_store`]: the write protocol, recovery and read reconciliation
//! - [`registry`]: selecting a log store implementation by name
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tollgate_core::prelude::*;
//! use tollgate_external::{ExternalLogStore, ExternalStoreConfig, MemoryCoordinator};
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # rt.block_on(async {
//! let base = StorageLogStore::new(Arc::new(MemoryBackend::new()), "memory://");
//! let store = ExternalLogStore::connect(
//!     base,
//!     Arc::new(MemoryCoordinator::new()),
//!     &ExternalStoreConfig::default(),
//! )
//! .await?;
//!
//! let commit = "t/_delta_log/00000000000000000000.json";
//! store.write(commit, &["{}".to_string()], false).await?;
//! let again = store.write(commit, &["{}".to_string()], false).await;
//! assert!(again.unwrap_err().is_already_exists());
//! # Ok::<(), tollgate_core::Error>(())
//! # }).unwrap();
//! ```

#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod entry;
pub mod external_store;
pub mod memory;
pub mod registry;
pub mod storage_coordinator;

pub use bootstrap::{BootstrapOutcome, Sleeper, TableBootstrapper, TokioSleeper};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ExternalStoreConfig;
pub use coordinator::{
    AttributeValue, CoordinatorBackend, CoordinatorClient, Item, ItemKey, PutCondition,
    PutOutcome, TableStatus,
};
pub use entry::CommitEntry;
pub use external_store::ExternalLogStore;
pub use memory::MemoryCoordinator;
pub use registry::{LogStoreContext, LogStoreFactory, LogStoreRegistry};
pub use storage_coordinator::StorageCoordinator;
