//! Storage wrapper with operation tracing and fault injection.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tollgate_core::error::{Error, Result};
use tollgate_core::storage::{
    MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation.
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Precondition used.
        precondition: WritePrecondition,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

/// In-memory storage that records operations and misbehaves on request.
///
/// Listings can be made to lag behind writes with [`Self::hide_from_listing`],
/// the way an eventually consistent object store would.
#[derive(Debug, Clone, Default)]
pub struct TracingBackend {
    inner: MemoryBackend,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    fail_put_paths: Arc<Mutex<Vec<String>>>,
    hidden_paths: Arc<Mutex<Vec<String>>>,
}

impl TracingBackend {
    /// Creates a new empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Fails every operation on paths starting with `prefix`.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(prefix.into());
    }

    /// Fails puts to paths starting with `prefix`.
    pub fn inject_put_failure(&self, prefix: impl Into<String>) {
        self.fail_put_paths.lock().expect("lock").push(prefix.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_paths.lock().expect("lock").clear();
        self.fail_put_paths.lock().expect("lock").clear();
    }

    /// Omits objects whose paths start with `prefix` from listings.
    pub fn hide_from_listing(&self, prefix: impl Into<String>) {
        self.hidden_paths.lock().expect("lock").push(prefix.into());
    }

    /// Makes every object visible to listings again.
    pub fn reveal_listing(&self) {
        self.hidden_paths.lock().expect("lock").clear();
    }

    /// Returns every stored path, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .inner
            .list("")
            .await
            .expect("list")
            .into_iter()
            .map(|meta| meta.path)
            .collect();
        paths.sort();
        paths
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check(list: &Mutex<Vec<String>>, path: &str) -> Result<()> {
        if list.lock().expect("lock").iter().any(|p| path.starts_with(p)) {
            return Err(Error::storage(format!("injected failure for path: {path}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        Self::check(&self.fail_paths, path)?;
        self.record(StorageOp::Get {
            path: path.to_string(),
        });
        self.inner.get(path).await
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        Self::check(&self.fail_paths, path)?;
        Self::check(&self.fail_put_paths, path)?;
        self.record(StorageOp::Put {
            path: path.to_string(),
            precondition: precondition.clone(),
        });
        self.inner.put(path, data, precondition).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        Self::check(&self.fail_paths, path)?;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        Self::check(&self.fail_paths, prefix)?;
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });
        let hidden = self.hidden_paths.lock().expect("lock").clone();
        Ok(self
            .inner
            .list(prefix)
            .await?
            .into_iter()
            .filter(|meta| !hidden.iter().any(|h| meta.path.starts_with(h)))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        Self::check(&self.fail_paths, path)?;
        self.record(StorageOp::Head {
            path: path.to_string(),
        });
        self.inner.head(path).await
    }
}
