//! # tollgate-core
//!
//! Shared primitives for the tollgate log stores:
//!
//! - **Errors**: one error taxonomy for coordinator and object-store failures
//! - **Storage**: the object-store backend contract with conditional writes,
//!   an in-memory backend and an `object_store`-backed one
//! - **Log store contract**: the read/write/list interface table logs need,
//!   plus a native implementation for backends that already guarantee it
//! - **Configuration**: dual-prefixed setting resolution and credential
//!   provider selection
//! - **Observability**: logging initialization
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tollgate_core::prelude::*;
//!
//! # futures::executor::block_on(async {
//! let store = StorageLogStore::new(Arc::new(MemoryBackend::new()), "memory://");
//! store
//!     .write("t/_delta_log/00000000000000000000.json", &["{}".to_string()], false)
//!     .await?;
//! let listed = store.list_from("t/_delta_log/00000000000000000000.json").await?;
//! assert_eq!(listed.len(), 1);
//! # Ok::<(), tollgate_core::Error>(())
//! # }).unwrap();
//! ```

#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod credentials;
pub mod error;
pub mod log_store;
pub mod object_store_backend;
pub mod observability;
pub mod paths;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::credentials::CredentialsProvider;
    pub use crate::error::{Error, Result};
    pub use crate::log_store::{FileStatus, LogLines, LogStore, StorageLogStore};
    pub use crate::object_store_backend::ObjectStoreBackend;
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

pub use config::Settings;
pub use credentials::CredentialsProvider;
pub use error::{Error, Result};
pub use log_store::{FileStatus, LogLines, LogStore, StorageLogStore};
pub use object_store_backend::ObjectStoreBackend;
pub use observability::{LogFormat, init_logging};
pub use paths::PathResolver;
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
