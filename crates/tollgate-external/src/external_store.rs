//! Log store that uses a coordinator for mutual exclusion and consistent
//! listing on object stores that provide neither.
//!
//! ## Write protocol
//!
//! For `write(path, lines, overwrite = false)` on `{table}/_delta_log/{file}`:
//!
//! 0. fail with [`Error::AlreadyExists`] if `{file}` is already in the store;
//!    for commit `N`, make sure commit `N-1` is materialized, recovering it
//!    from its coordinator entry if needed
//! 1. **stage**: write the payload to `_delta_log/.tmp/{file}.{uuid}.tmp`
//! 2. **claim**: put an incomplete entry for `(table, file)` with the
//!    key-absent condition; losing the claim is [`Error::AlreadyExists`]
//! 3. **materialize**: copy the staged object to the final path
//! 4. **commit**: overwrite the entry as complete with the commit time
//!
//! A claim put that fails without a definite outcome is settled by reading
//! the entry back; the staged object is kept unless another writer's entry
//! is found.
//!
//! Steps 3 and 4 are the recovery procedure applied to the writer's own
//! entry. If they fail the claim stays incomplete and the writer gets
//! [`Error::CommitIncomplete`]; the next writer, lister or reader completes
//! the entry from its own staged object.
//!
//! Files outside a `_delta_log/` directory and overwrites bypass the
//! coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use tollgate_core::error::{Error, Result};
use tollgate_core::log_store::{FileStatus, LogLines, LogStore, StorageLogStore, encode_lines};
use tollgate_core::paths::{
    DELTA_LOG_DIR, commit_file_name, join, parse_commit_version, split_parent,
};

use crate::clock::{Clock, SystemClock};
use crate::config::ExternalStoreConfig;
use crate::coordinator::{CoordinatorBackend, CoordinatorClient, PutOutcome};
use crate::entry::{CommitEntry, temp_path_for};

/// Attempts made to complete an incomplete entry.
pub const FIX_ATTEMPTS: u32 = 3;

/// Coordinator-backed [`LogStore`].
#[derive(Clone)]
pub struct ExternalLogStore {
    base: StorageLogStore,
    client: CoordinatorClient,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ExternalLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalLogStore")
            .field("base", &self.base)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

/// Location of a file inside a table log.
struct LogLocation<'a> {
    log_dir: &'a str,
    table_key: &'a str,
    file_name: &'a str,
}

fn log_location(key: &str) -> Option<LogLocation<'_>> {
    let (log_dir, file_name) = split_parent(key);
    let (table_key, dir_name) = split_parent(log_dir);
    (dir_name == DELTA_LOG_DIR).then_some(LogLocation {
        log_dir,
        table_key,
        file_name,
    })
}

impl ExternalLogStore {
    /// Creates a store over `base` coordinated through `client`.
    #[must_use]
    pub fn new(base: StorageLogStore, client: CoordinatorClient) -> Self {
        Self {
            base,
            client,
            clock: Arc::new(SystemClock),
        }
    }

    /// Bootstraps the configured coordinator table and creates the store.
    ///
    /// # Errors
    ///
    /// Returns the bootstrap error if the table cannot be made active.
    pub async fn connect(
        base: StorageLogStore,
        backend: Arc<dyn CoordinatorBackend>,
        config: &ExternalStoreConfig,
    ) -> Result<Self> {
        let client = CoordinatorClient::connect(backend, config).await?;
        Ok(Self::new(base, client))
    }

    /// Replaces the commit-time clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying object-store log store.
    #[must_use]
    pub fn base(&self) -> &StorageLogStore {
        &self.base
    }

    /// The coordinator client.
    #[must_use]
    pub fn client(&self) -> &CoordinatorClient {
        &self.client
    }

    fn table_path(&self, table_key: &str) -> String {
        self.base.resolver().qualify(table_key)
    }

    async fn copy_object(&self, from_key: &str, to_key: &str) -> Result<()> {
        let data = self.base.storage().get(from_key).await?;
        self.base.put_key(to_key, data, true).await
    }

    async fn try_fix(&self, entry: &CommitEntry) -> Result<()> {
        let resolver = self.base.resolver();
        let final_key = resolver.key(&entry.absolute_file_path())?;
        if self.base.head_key(&final_key).await?.is_none() {
            let temp_key = resolver.key(&entry.absolute_temp_path())?;
            self.copy_object(&temp_key, &final_key).await?;
        }
        let completed = entry.as_complete(self.clock.now_epoch_seconds());
        if self.client.put_conditional(&completed, true).await? == PutOutcome::Conflict {
            tracing::debug!("commit entry was already completed");
        }
        Ok(())
    }

    /// Completes an incomplete entry from its own staged object.
    ///
    /// Copies the staged object to the final path unless the final object is
    /// already present, then marks the entry complete. Complete entries are
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns the last failure after [`FIX_ATTEMPTS`] attempts.
    #[tracing::instrument(
        skip(self, entry),
        fields(table_path = %entry.table_path(), file_name = %entry.file_name())
    )]
    pub async fn fix_delta_log(&self, entry: &CommitEntry) -> Result<()> {
        if entry.complete() {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_fix(entry).await {
                Ok(()) => {
                    tracing::info!(temp_path = %entry.temp_path(), attempt, "completed commit entry");
                    return Ok(());
                }
                Err(e) if attempt < FIX_ATTEMPTS => {
                    tracing::warn!(error = %e, attempt, "failed to complete commit entry, retrying");
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "failed to complete commit entry");
                    return Err(e);
                }
            }
        }
    }

    async fn ensure_previous_commit(
        &self,
        location: &LogLocation<'_>,
        table_path: &str,
        version: u64,
    ) -> Result<()> {
        let previous = commit_file_name(version);
        match self.client.get_entry(table_path, &previous).await? {
            Some(entry) if !entry.complete() => self.fix_delta_log(&entry).await,
            Some(_) => Ok(()),
            None => {
                let previous_key = join(location.log_dir, &previous);
                if self.base.head_key(&previous_key).await?.is_some() {
                    Ok(())
                } else {
                    Err(Error::storage(format!(
                        "previous commit {} does not exist",
                        self.base.resolver().qualify(&previous_key)
                    )))
                }
            }
        }
    }

    async fn remove_staged(&self, temp_key: &str) {
        if let Err(e) = self.base.storage().delete(temp_key).await {
            tracing::debug!(temp_key, error = %e, "failed to remove staged object");
        }
    }

    /// Settles a claim whose put failed without a definite answer.
    ///
    /// The put may have been applied before the failure was reported, so the
    /// stored entry decides: `Some(true)` if it is ours, `Some(false)` if
    /// another writer holds it, `None` if nothing can be told. The staged
    /// object must survive unless the result is `Some(false)`.
    async fn reconcile_claim(&self, entry: &CommitEntry) -> Option<bool> {
        match self
            .client
            .get_entry(entry.table_path(), entry.file_name())
            .await
        {
            Ok(Some(stored)) => {
                let ours = stored.temp_path() == entry.temp_path();
                tracing::warn!(
                    file_name = %entry.file_name(),
                    ours,
                    "claim failed but an entry is stored"
                );
                Some(ours)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(file_name = %entry.file_name(), error = %e, "failed to re-read claim");
                None
            }
        }
    }

    async fn write_coordinated(
        &self,
        key: &str,
        location: &LogLocation<'_>,
        data: Bytes,
    ) -> Result<()> {
        let resolver = self.base.resolver();
        if self.base.head_key(key).await?.is_some() {
            return Err(Error::already_exists(resolver.qualify(key)));
        }

        let table_path = self.table_path(location.table_key);
        if let Some(version) = parse_commit_version(location.file_name).filter(|v| *v > 0) {
            self.ensure_previous_commit(location, &table_path, version - 1)
                .await?;
        }

        let temp_path = temp_path_for(location.file_name, &Uuid::new_v4().to_string());
        let temp_key = join(location.log_dir, &temp_path);
        self.base.put_key(&temp_key, data, true).await?;

        let entry = CommitEntry::new(table_path, location.file_name, temp_path);
        let claimed = match self.client.put_conditional(&entry, false).await {
            Ok(PutOutcome::Written) => true,
            Ok(PutOutcome::Conflict) => false,
            Err(e) => match self.reconcile_claim(&entry).await {
                Some(claimed) => claimed,
                None => return Err(e),
            },
        };
        if !claimed {
            tracing::debug!(file_name = %location.file_name, "commit claimed by another writer");
            self.remove_staged(&temp_key).await;
            return Err(Error::already_exists(resolver.qualify(key)));
        }

        self.fix_delta_log(&entry)
            .await
            .map_err(|e| Error::CommitIncomplete {
                path: resolver.qualify(key),
                message: "failed to materialize claimed commit".to_string(),
                source: Box::new(e),
            })
    }

    /// File status for a completed entry, from its final object or, if that
    /// is not visible yet, its staged object.
    async fn status_of_entry(&self, entry: &CommitEntry) -> Result<Option<FileStatus>> {
        let resolver = self.base.resolver();
        let final_key = resolver.key(&entry.absolute_file_path())?;
        let meta = match self.base.head_key(&final_key).await? {
            Some(meta) => Some(meta),
            None => {
                let temp_key = resolver.key(&entry.absolute_temp_path())?;
                self.base.head_key(&temp_key).await?
            }
        };
        Ok(meta.map(|meta| FileStatus {
            path: resolver.qualify(&final_key),
            size: meta.size,
            last_modified: meta.last_modified,
        }))
    }

    async fn read_entry(&self, entry: &CommitEntry) -> Result<Option<Bytes>> {
        self.fix_delta_log(entry).await?;
        let resolver = self.base.resolver();
        for path in [entry.absolute_file_path(), entry.absolute_temp_path()] {
            match self.base.storage().get(&resolver.key(&path)?).await {
                Ok(data) => return Ok(Some(data)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl LogStore for ExternalLogStore {
    #[tracing::instrument(skip(self))]
    async fn read(&self, path: &str) -> Result<LogLines> {
        let key = self.base.resolver().key(path)?;
        match self.base.storage().get(&key).await {
            Ok(data) => return Ok(LogLines::new(data)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if let Some(location) = log_location(&key) {
            let table_path = self.table_path(location.table_key);
            if let Some(entry) = self.client.get_entry(&table_path, location.file_name).await? {
                if let Some(data) = self.read_entry(&entry).await? {
                    tracing::debug!("served file through coordinator entry");
                    return Ok(LogLines::new(data));
                }
            }
        }
        Err(Error::NotFound(format!(
            "file not found: {}",
            self.base.resolver().qualify(&key)
        )))
    }

    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    async fn write(&self, path: &str, lines: &[String], overwrite: bool) -> Result<()> {
        let key = self.base.resolver().key(path)?;
        let data = encode_lines(lines);
        if overwrite {
            return self.base.put_key(&key, data, true).await;
        }
        match log_location(&key) {
            Some(location) => self.write_coordinated(&key, &location, data).await,
            None => self.base.put_key(&key, data, false).await,
        }
    }

    #[tracing::instrument(skip(self))]
    async fn list_from(&self, path: &str) -> Result<Vec<FileStatus>> {
        let key = self.base.resolver().key(path)?;
        let Some(location) = log_location(&key) else {
            return self.base.list_from(path).await;
        };

        let table_path = self.table_path(location.table_key);
        let latest = self.client.get_latest_entry(&table_path).await?;
        if let Some(entry) = &latest {
            self.fix_delta_log(entry).await?;
        }

        let listed = self.base.list_dir(location.log_dir).await?;
        if listed.is_none() && latest.is_none() {
            return Err(Error::NotFound(format!(
                "no such directory: {}",
                self.base.resolver().qualify(location.log_dir)
            )));
        }
        let mut files: Vec<FileStatus> = listed
            .unwrap_or_default()
            .into_iter()
            .filter(|status| status.file_name() >= location.file_name)
            .collect();

        if let Some(entry) = latest {
            let hidden = entry.file_name() >= location.file_name
                && !files.iter().any(|s| s.file_name() == entry.file_name());
            if hidden {
                if let Some(status) = self.status_of_entry(&entry).await? {
                    tracing::debug!(
                        file_name = %entry.file_name(),
                        "listing missing committed file, added from coordinator"
                    );
                    let at = files.partition_point(|s| s.file_name() < entry.file_name());
                    files.insert(at, status);
                }
            }
        }
        Ok(files)
    }

    fn resolve_path_on_physical_storage(&self, path: &str) -> Result<String> {
        self.base.resolver().resolve(path)
    }

    fn is_partial_write_visible(&self, _path: &str) -> bool {
        false
    }
}
