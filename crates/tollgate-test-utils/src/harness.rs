//! Pre-wired external log store for integration tests.

use std::sync::Arc;

use tollgate_core::log_store::StorageLogStore;
use tollgate_core::paths::{DELTA_LOG_DIR, commit_file_name};
use tollgate_external::{
    CoordinatorClient, ExternalLogStore, ExternalStoreConfig, FixedClock, MemoryCoordinator,
};

use crate::coordinator::FaultyCoordinator;
use crate::storage::TracingBackend;

/// Store root used by [`Harness`].
pub const ROOT: &str = "memory://";

/// Commit time reported by the harness clock until changed.
pub const START_TIME: i64 = 100;

/// An external log store over a [`TracingBackend`] and a
/// [`FaultyCoordinator`] wrapping a [`MemoryCoordinator`].
///
/// Every store handed out by [`Harness::writer`] shares the same object store
/// and coordinator, standing in for separate processes.
#[derive(Debug)]
pub struct Harness {
    /// Object store.
    pub storage: TracingBackend,
    /// Coordinator state.
    pub coordinator: MemoryCoordinator,
    /// Fault injection in front of `coordinator`.
    pub faulty: Arc<FaultyCoordinator>,
    /// Commit-time clock.
    pub clock: Arc<FixedClock>,
    /// Coordinator table name.
    pub table_name: String,
}

impl Harness {
    /// Creates the doubles and bootstraps the coordinator table.
    pub async fn new() -> Self {
        let coordinator = MemoryCoordinator::new();
        let faulty = Arc::new(FaultyCoordinator::new(Arc::new(coordinator.clone())));
        let config = ExternalStoreConfig::default();
        CoordinatorClient::connect(faulty.clone(), &config)
            .await
            .expect("bootstrap coordinator table");

        Self {
            storage: TracingBackend::new(),
            coordinator,
            faulty,
            clock: Arc::new(FixedClock::new(START_TIME)),
            table_name: config.table_name,
        }
    }

    /// Returns a new store instance sharing this harness's state.
    pub fn writer(&self) -> ExternalLogStore {
        let base = StorageLogStore::new(Arc::new(self.storage.clone()), ROOT);
        let client = CoordinatorClient::new(self.faulty.clone(), self.table_name.clone());
        ExternalLogStore::new(base, client).with_clock(self.clock.clone())
    }

    /// Fully qualified table path for `table`.
    pub fn table_path(table: &str) -> String {
        format!("{ROOT}{table}")
    }

    /// Backend key of commit `version` of `table`.
    pub fn commit_key(table: &str, version: u64) -> String {
        format!("{table}/{DELTA_LOG_DIR}/{}", commit_file_name(version))
    }
}
