//! Storage backend abstraction for object storage (S3, GCS, local, memory).
//!
//! This is the contract the log stores build on. Two properties matter to the
//! commit protocol and vary between real backends:
//! - whether `put` with [`WritePrecondition::DoesNotExist`] is honoured
//!   atomically (GCS, Azure, local: yes; S3 historically: no);
//! - whether `list` reflects every completed `put` (memory, GCS: yes; S3
//!   behind some gateways and caches: not always).
//!
//! Backends that lack either property are exactly the ones that need the
//! coordinator in `tollgate-external`.
//!
//! The version token is an opaque `String` so backends can use numeric
//! generations, `ETag`s or version ids.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if object does not exist.
    DoesNotExist,
    /// Write only if object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

impl WritePrecondition {
    /// Whether a write may proceed given the object's current version, `None`
    /// when the object is absent.
    #[must_use]
    pub fn is_met_by(&self, current_version: Option<&str>) -> bool {
        match (self, current_version) {
            (Self::None, _) | (Self::DoesNotExist, None) => true,
            (Self::DoesNotExist, Some(_)) | (Self::MatchesVersion(_), None) => false,
            (Self::MatchesVersion(expected), Some(current)) => expected == current,
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Write succeeded, returns new version token.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed, returns current version token.
    PreconditionFailed {
        /// The current version that caused the precondition to fail.
        current_version: String,
    },
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Object version token for CAS operations.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for object storage.
///
/// Paths are backend-relative keys using `/` as separator, without a leading
/// slash (for example `tables/sales/_delta_log/00000000000000000000.json`).
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads entire object.
    ///
    /// Returns `Error::NotFound` if object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes with optional precondition.
    ///
    /// Returns `WriteResult::PreconditionFailed` if precondition not met.
    /// Never returns error for precondition failure - that's a normal result.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object.
    ///
    /// Succeeds even if object doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix, recursively.
    ///
    /// Returns empty vec if no objects match.
    ///
    /// **Ordering**: Results are returned in arbitrary order that may vary between
    /// backends and invocations. Callers requiring deterministic order should sort
    /// the results.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// In-memory storage backend for tests and single-process use.
///
/// Versions are per-object generation counters starting at 1.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    generation: u64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_string(),
            size: self.data.len() as u64,
            version: self.generation.to_string(),
            last_modified: Some(self.last_modified),
        }
    }
}

type Objects = HashMap<String, StoredObject>;

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> Result<RwLockReadGuard<'_, Objects>> {
        self.objects.read().map_err(|_| poisoned())
    }

    fn objects_mut(&self) -> Result<RwLockWriteGuard<'_, Objects>> {
        self.objects.write().map_err(|_| poisoned())
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "memory backend lock poisoned".into(),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.objects()?
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects_mut()?;
        let generation = objects.get(path).map(|o| o.generation);
        let current = generation.map(|g| g.to_string());
        if !precondition.is_met_by(current.as_deref()) {
            return Ok(WriteResult::PreconditionFailed {
                current_version: current.unwrap_or_else(|| "0".to_string()),
            });
        }

        let generation = generation.map_or(1, |g| g + 1);
        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                generation,
                last_modified: Utc::now(),
            },
        );
        Ok(WriteResult::Success {
            version: generation.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects_mut()?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        Ok(self
            .objects()?
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, obj)| obj.meta(path))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        Ok(self.objects()?.get(path).map(|obj| obj.meta(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preconditions_against_current_version() {
        assert!(WritePrecondition::None.is_met_by(None));
        assert!(WritePrecondition::None.is_met_by(Some("3")));
        assert!(WritePrecondition::DoesNotExist.is_met_by(None));
        assert!(!WritePrecondition::DoesNotExist.is_met_by(Some("1")));

        let expect_two = WritePrecondition::MatchesVersion("2".into());
        assert!(expect_two.is_met_by(Some("2")));
        assert!(!expect_two.is_met_by(Some("3")));
        assert!(!expect_two.is_met_by(None));
    }

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("hello world");

        let result = backend
            .put("test/file.txt", data.clone(), WritePrecondition::None)
            .await
            .expect("put should succeed");

        assert!(matches!(result, WriteResult::Success { ref version } if version == "1"));

        let retrieved = backend
            .get("test/file.txt")
            .await
            .expect("get should succeed");
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get("missing").await.expect_err("should fail");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_precondition_does_not_exist() {
        let backend = MemoryBackend::new();

        let result = backend
            .put(
                "new.txt",
                Bytes::from("data"),
                WritePrecondition::DoesNotExist,
            )
            .await
            .expect("should succeed");
        assert!(matches!(result, WriteResult::Success { .. }));

        let result = backend
            .put(
                "new.txt",
                Bytes::from("data2"),
                WritePrecondition::DoesNotExist,
            )
            .await
            .expect("should succeed");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));
        assert_eq!(backend.get("new.txt").await.unwrap(), Bytes::from("data"));
    }

    #[tokio::test]
    async fn test_precondition_matches_version() {
        let backend = MemoryBackend::new();

        let result = backend
            .put("gen.txt", Bytes::from("v1"), WritePrecondition::None)
            .await
            .expect("should succeed");
        let WriteResult::Success {
            version: first_version,
        } = result
        else {
            panic!("expected success");
        };

        let result = backend
            .put(
                "gen.txt",
                Bytes::from("v2"),
                WritePrecondition::MatchesVersion(first_version.clone()),
            )
            .await
            .expect("should succeed");
        assert!(matches!(result, WriteResult::Success { .. }));

        // Stale version loses.
        let result = backend
            .put(
                "gen.txt",
                Bytes::from("v3"),
                WritePrecondition::MatchesVersion(first_version),
            )
            .await
            .expect("should succeed");
        assert!(matches!(
            result,
            WriteResult::PreconditionFailed { ref current_version } if current_version == "2"
        ));

        let result = backend
            .put("absent.txt", Bytes::from("x"), WritePrecondition::MatchesVersion("1".into()))
            .await
            .unwrap();
        assert!(matches!(
            result,
            WriteResult::PreconditionFailed { ref current_version } if current_version == "0"
        ));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MemoryBackend::new();

        for path in ["a/1.txt", "a/2.txt", "b/1.txt"] {
            backend
                .put(path, Bytes::from("x"), WritePrecondition::None)
                .await
                .unwrap();
        }

        assert_eq!(backend.list("a/").await.unwrap().len(), 2);
        assert_eq!(backend.list("b/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let backend = MemoryBackend::new();

        backend
            .put("del.txt", Bytes::from("data"), WritePrecondition::None)
            .await
            .unwrap();
        assert!(backend.head("del.txt").await.unwrap().is_some());

        backend.delete("del.txt").await.expect("should succeed");
        backend.delete("del.txt").await.expect("second delete");
        assert!(backend.head("del.txt").await.unwrap().is_none());
    }
}
