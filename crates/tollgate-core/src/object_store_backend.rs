//! [`StorageBackend`] over the `object_store` crate.
//!
//! This is the production backend: S3 (via `AmazonS3Builder`), the local
//! filesystem and the crate's in-memory store all sit behind the same
//! `Arc<dyn ObjectStore>`.
//!
//! Version tokens are the object's `ETag` when the store reports one, then
//! its version id, then its modification time. Preconditions map onto
//! [`PutMode::Create`] and [`PutMode::Update`]; stores that do not implement
//! a mode surface that as a storage error rather than silently writing.

use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};

use crate::credentials::CredentialsProvider;
use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Storage backend backed by any [`ObjectStore`].
#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl ObjectStoreBackend {
    /// Wraps an existing object store.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Creates a backend over the crate's in-memory store.
    #[must_use]
    pub fn memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Creates a backend rooted at a local directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be canonicalized.
    pub fn local(root: impl AsRef<FsPath>) -> Result<Self> {
        let root = root.as_ref();
        let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
            Error::storage_with_source(
                format!("failed to open local store at {}", root.display()),
                e,
            )
        })?;
        Ok(Self::new(Arc::new(store)))
    }

    /// Creates an S3 backend for `bucket`.
    ///
    /// Conditional puts use `ETag` matching, so `DoesNotExist` and
    /// `MatchesVersion` preconditions are enforced by S3 itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be resolved or the builder
    /// rejects the configuration.
    pub fn s3(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        credentials: CredentialsProvider,
    ) -> Result<Self> {
        let mut builder = match credentials {
            CredentialsProvider::Default => AmazonS3Builder::from_env(),
            CredentialsProvider::Environment => {
                let mut builder = AmazonS3Builder::new()
                    .with_access_key_id(required_env("AWS_ACCESS_KEY_ID")?)
                    .with_secret_access_key(required_env("AWS_SECRET_ACCESS_KEY")?);
                if let Ok(token) = std::env::var("AWS_SESSION_TOKEN") {
                    builder = builder.with_token(token);
                }
                builder
            }
            CredentialsProvider::Anonymous => AmazonS3Builder::new().with_skip_signature(true),
        };
        builder = builder
            .with_bucket_name(bucket)
            .with_conditional_put(S3ConditionalPut::ETagMatch);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }
        let store = builder
            .build()
            .map_err(|e| Error::storage_with_source(format!("invalid S3 config for {bucket}"), e))?;
        Ok(Self::new(Arc::new(store)))
    }

    async fn current_version(&self, location: &Path) -> Result<String> {
        match self.store.head(location).await {
            Ok(meta) => Ok(version_token(&meta)),
            Err(object_store::Error::NotFound { .. }) => Ok("0".to_string()),
            Err(e) => Err(map_err(location, e)),
        }
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|e| {
        Error::storage_with_source(format!("failed to initialize credentials: {name}"), e)
    })
}

fn version_token(meta: &object_store::ObjectMeta) -> String {
    meta.e_tag
        .clone()
        .or_else(|| meta.version.clone())
        .unwrap_or_else(|| meta.last_modified.timestamp_micros().to_string())
}

fn to_meta(meta: &object_store::ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        path: meta.location.to_string(),
        size: meta.size as u64,
        version: version_token(meta),
        last_modified: Some(meta.last_modified),
    }
}

fn map_err(location: &Path, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => {
            Error::NotFound(format!("object not found: {location}"))
        }
        other => Error::storage_with_source(format!("object store error at {location}"), other),
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let location = Path::from(path);
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_err(&location, e))?;
        result.bytes().await.map_err(|e| map_err(&location, e))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let location = Path::from(path);
        let mode = match precondition {
            WritePrecondition::DoesNotExist => PutMode::Create,
            WritePrecondition::MatchesVersion(version) => PutMode::Update(UpdateVersion {
                e_tag: Some(version),
                version: None,
            }),
            WritePrecondition::None => PutMode::Overwrite,
        };

        match self
            .store
            .put_opts(&location, PutPayload::from(data), PutOptions::from(mode))
            .await
        {
            Ok(result) => Ok(WriteResult::Success {
                version: result.e_tag.or(result.version).unwrap_or_default(),
            }),
            Err(
                object_store::Error::AlreadyExists { .. }
                | object_store::Error::Precondition { .. },
            ) => Ok(WriteResult::PreconditionFailed {
                current_version: self.current_version(&location).await?,
            }),
            Err(e) => Err(map_err(&location, e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = Path::from(path);
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_err(&location, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let location = Path::from(prefix);
        let metas: Vec<object_store::ObjectMeta> = self
            .store
            .list(Some(&location))
            .try_collect()
            .await
            .map_err(|e| map_err(&location, e))?;

        Ok(metas
            .iter()
            .map(to_meta)
            .filter(|m| m.path.starts_with(prefix))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let location = Path::from(path);
        match self.store.head(&location).await {
            Ok(meta) => Ok(Some(to_meta(&meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_err(&location, e)),
        }
    }
}
