//! Coordinator table bootstrap.
//!
//! Runs once when a client is constructed: describe the table, create it if it
//! is missing and wait for it to become active. Concurrent bootstrappers are
//! safe; losing the creation race is not an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tollgate_core::error::{Error, Result};

use crate::coordinator::{
    CoordinatorBackend, CreateTableOutcome, KeySchema, ProvisionedThroughput, TableSpec,
    TableStatus,
};

/// Default number of describe attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default wait between describe attempts while the table is being created.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How the table came to be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// This bootstrapper issued the successful create.
    Created,
    /// The table existed, or another process created it.
    AlreadyExisted,
}

#[derive(Debug)]
enum State {
    Describe,
    Missing,
    Creating,
    Active,
}

/// Ensures a coordinator table exists and is active.
pub struct TableBootstrapper {
    backend: Arc<dyn CoordinatorBackend>,
    table: String,
    spec: TableSpec,
    sleeper: Arc<dyn Sleeper>,
    max_attempts: u32,
    retry_interval: Duration,
}

impl std::fmt::Debug for TableBootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableBootstrapper")
            .field("table", &self.table)
            .field("spec", &self.spec)
            .field("max_attempts", &self.max_attempts)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

impl TableBootstrapper {
    /// Creates a bootstrapper for `table` with the standard key schema.
    #[must_use]
    pub fn new(
        backend: Arc<dyn CoordinatorBackend>,
        table: impl Into<String>,
        throughput: ProvisionedThroughput,
    ) -> Self {
        Self {
            backend,
            table: table.into(),
            spec: TableSpec {
                key_schema: KeySchema::default(),
                throughput,
            },
            sleeper: Arc::new(TokioSleeper),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Replaces the sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Sets the maximum number of describe attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the wait between attempts.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Drives the table to `ACTIVE`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnexpectedTableStatus`] if the table reports a status other
    ///   than missing, creating or active
    /// - [`Error::BootstrapTimeout`] if it is not active after the configured
    ///   number of describe attempts
    /// - storage errors from the coordinator
    #[tracing::instrument(skip(self), fields(table = %self.table))]
    pub async fn run(&self) -> Result<BootstrapOutcome> {
        let mut created = false;
        let mut attempts = 0_u32;
        let mut state = State::Describe;

        loop {
            state = match state {
                State::Describe => {
                    if attempts >= self.max_attempts {
                        tracing::error!(attempts, "coordinator table did not become active");
                        return Err(Error::BootstrapTimeout {
                            table: self.table.clone(),
                            attempts,
                        });
                    }
                    attempts += 1;
                    match self.backend.describe_table(&self.table).await? {
                        None => State::Missing,
                        Some(TableStatus::Creating) => State::Creating,
                        Some(TableStatus::Active) => State::Active,
                        Some(TableStatus::Other(status)) => {
                            tracing::error!(%status, "unexpected coordinator table status");
                            return Err(Error::UnexpectedTableStatus {
                                table: self.table.clone(),
                                status,
                            });
                        }
                    }
                }
                State::Missing => {
                    match self.backend.create_table(&self.table, &self.spec).await? {
                        CreateTableOutcome::Created => {
                            tracing::info!(
                                rcu = self.spec.throughput.read_capacity_units,
                                wcu = self.spec.throughput.write_capacity_units,
                                "creating coordinator table"
                            );
                            created = true;
                        }
                        CreateTableOutcome::AlreadyExists => {
                            tracing::debug!("coordinator table created concurrently");
                        }
                    }
                    State::Describe
                }
                State::Creating => {
                    tracing::debug!(attempts, "waiting for coordinator table");
                    self.sleeper.sleep(self.retry_interval).await;
                    State::Describe
                }
                State::Active => {
                    return Ok(if created {
                        BootstrapOutcome::Created
                    } else {
                        BootstrapOutcome::AlreadyExisted
                    });
                }
            };
        }
    }
}
