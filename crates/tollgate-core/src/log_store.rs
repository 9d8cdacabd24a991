//! The log-store contract and its native, storage-backed implementation.
//!
//! Every implementation of [`LogStore`] must provide three guarantees for the
//! files it writes:
//!
//! 1. **Atomic visibility** - when [`LogStore::is_partial_write_visible`] is
//!    false, a file is either fully visible or not visible at all.
//! 2. **Mutual exclusion** - only one writer can create the file at a given
//!    final path; everyone else gets [`Error::AlreadyExists`].
//! 3. **Consistent listing** - once a write completes, every later
//!    [`LogStore::list_from`] of that directory includes it.
//!
//! [`StorageLogStore`] gets all three from the backend itself and is only
//! correct on backends with atomic create-if-absent and consistent listing.
//! `tollgate-external` layers a coordinator on top of it for backends that
//! lack them.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::paths::{self, PathResolver};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Status of one file returned by [`LogStore::list_from`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Fully qualified path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileStatus {
    /// Returns the final path segment.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Lines of a log file, produced lazily with line terminators removed.
///
/// The sequence is finite and cannot be restarted. Release it with
/// [`LogLines::close`] once done; dropping it releases it as well.
#[derive(Debug)]
pub struct LogLines {
    data: Bytes,
    pos: usize,
}

impl LogLines {
    /// Wraps the raw bytes of a log file.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Releases the underlying buffer.
    pub fn close(self) {}
}

impl Iterator for LogLines {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let (line, consumed) = match rest.iter().position(|b| *b == b'\n') {
            Some(idx) => (&rest[..idx], idx + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Some(
            std::str::from_utf8(line)
                .map(str::to_string)
                .map_err(|e| Error::serialization(format!("log line is not UTF-8: {e}"))),
        )
    }
}

/// Joins lines into a log file payload (`\n`-separated, no trailing newline).
#[must_use]
pub fn encode_lines(lines: &[String]) -> Bytes {
    Bytes::from(lines.join("\n"))
}

/// File operations required to read and write a table log.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Loads the file at `path` and returns its lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the file does not exist, or a storage
    /// error if the path cannot be resolved or read.
    async fn read(&self, path: &str) -> Result<LogLines>;

    /// Writes `lines` to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the file exists and `overwrite` is
    /// false. The existence check and the creation are a single indivisible
    /// step with respect to other writers.
    async fn write(&self, path: &str, lines: &[String], overwrite: bool) -> Result<()>;

    /// Lists the files in the directory of `path` whose names are
    /// lexicographically greater than or equal to the name of `path`,
    /// sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the directory does not exist.
    async fn list_from(&self, path: &str) -> Result<Vec<FileStatus>>;

    /// Returns the fully qualified path for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `path` is outside the store.
    fn resolve_path_on_physical_storage(&self, path: &str) -> Result<String>;

    /// Whether partially written files can be observed for `path`.
    fn is_partial_write_visible(&self, path: &str) -> bool;
}

/// Log store relying on the backend's own conditional writes and listing.
#[derive(Clone)]
pub struct StorageLogStore {
    storage: Arc<dyn StorageBackend>,
    resolver: PathResolver,
}

impl std::fmt::Debug for StorageLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLogStore")
            .field("root", &self.resolver.root())
            .finish_non_exhaustive()
    }
}

impl StorageLogStore {
    /// Creates a log store over `storage`, whose keys live under `root`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, root: impl Into<String>) -> Self {
        Self {
            storage,
            resolver: PathResolver::new(root),
        }
    }

    /// Returns the storage backend.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Returns the path resolver.
    #[must_use]
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Returns the object's metadata, or `None` if it is missing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend fails.
    pub async fn head_key(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.storage.head(key).await
    }

    /// Converts backend metadata into a [`FileStatus`].
    #[must_use]
    pub fn status_of(&self, meta: &ObjectMeta) -> FileStatus {
        FileStatus {
            path: self.resolver.qualify(&meta.path),
            size: meta.size,
            last_modified: meta.last_modified,
        }
    }

    /// Lists the direct children of directory `dir_key`, sorted by name.
    ///
    /// Returns `None` when no object exists under the directory at all. Nested
    /// objects (such as the `.tmp/` staging area) count towards existence but
    /// are not listed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend listing fails.
    pub async fn list_dir(&self, dir_key: &str) -> Result<Option<Vec<FileStatus>>> {
        let prefix = if dir_key.is_empty() {
            String::new()
        } else {
            format!("{dir_key}/")
        };
        let objects = self.storage.list(&prefix).await?;
        if objects.is_empty() {
            return Ok(None);
        }

        let mut children: Vec<FileStatus> = objects
            .iter()
            .filter(|meta| {
                meta.path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|meta| self.status_of(meta))
            .collect();
        children.sort_by(|a, b| a.file_name().as_bytes().cmp(b.file_name().as_bytes()));
        Ok(Some(children))
    }

    /// Writes `data` to `key`, creating it only if absent unless `overwrite`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the object exists and `overwrite`
    /// is false.
    pub async fn put_key(&self, key: &str, data: Bytes, overwrite: bool) -> Result<()> {
        let precondition = if overwrite {
            WritePrecondition::None
        } else {
            WritePrecondition::DoesNotExist
        };
        match self.storage.put(key, data, precondition).await? {
            WriteResult::Success { .. } => Ok(()),
            WriteResult::PreconditionFailed { .. } => {
                Err(Error::already_exists(self.resolver.qualify(key)))
            }
        }
    }
}

#[async_trait]
impl LogStore for StorageLogStore {
    async fn read(&self, path: &str) -> Result<LogLines> {
        let key = self.resolver.key(path)?;
        let data = self.storage.get(&key).await?;
        Ok(LogLines::new(data))
    }

    async fn write(&self, path: &str, lines: &[String], overwrite: bool) -> Result<()> {
        let key = self.resolver.key(path)?;
        self.put_key(&key, encode_lines(lines), overwrite).await
    }

    async fn list_from(&self, path: &str) -> Result<Vec<FileStatus>> {
        let key = self.resolver.key(path)?;
        let (dir, start) = paths::split_parent(&key);
        let Some(children) = self.list_dir(dir).await? else {
            return Err(Error::NotFound(format!(
                "no such directory: {}",
                self.resolver.qualify(dir)
            )));
        };
        Ok(children
            .into_iter()
            .filter(|status| status.file_name().as_bytes() >= start.as_bytes())
            .collect())
    }

    fn resolve_path_on_physical_storage(&self, path: &str) -> Result<String> {
        self.resolver.resolve(path)
    }

    fn is_partial_write_visible(&self, _path: &str) -> bool {
        // Object stores publish whole objects on put.
        false
    }
}
