//! Log-store selection by name.
//!
//! The implementation used for a store root is chosen from the setting
//! `delta.logStore.{scheme}.impl`, falling back to [`DEFAULT_LOG_STORE`].
//! Names are resolved against factories registered up front; an unknown name
//! is a configuration error at startup rather than a failure on first write.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tollgate_core::config::Settings;
use tollgate_core::error::{Error, Result};
use tollgate_core::log_store::{LogStore, StorageLogStore};
use tollgate_core::storage::StorageBackend;

use crate::config::ExternalStoreConfig;
use crate::coordinator::CoordinatorBackend;
use crate::external_store::ExternalLogStore;

/// Name of the native storage-backed log store.
pub const STORAGE_LOG_STORE: &str = "storage";
/// Name of the coordinator-backed log store.
pub const EXTERNAL_LOG_STORE: &str = "external";
/// Name used when no implementation is configured for a scheme.
pub const DEFAULT_LOG_STORE: &str = STORAGE_LOG_STORE;

/// Root schemes served by S3.
const S3_SCHEMES: [&str; 2] = ["s3", "s3a"];

/// Names accepted for the coordinator-backed store besides its own.
const EXTERNAL_ALIASES: [&str; 1] = ["io.delta.storage.S3DynamoDBLogStore"];

/// Returns the setting that selects the implementation for `scheme`.
#[must_use]
pub fn log_store_key(scheme: &str) -> String {
    format!("delta.logStore.{scheme}.impl")
}

/// Everything a factory needs to build a store.
#[derive(Clone)]
pub struct LogStoreContext {
    /// Engine settings.
    pub settings: Settings,
    /// Object store holding the table files.
    pub storage: Arc<dyn StorageBackend>,
    /// Root URI of `storage`, e.g. `s3://bucket`.
    pub root: String,
    /// Coordinator for stores that need one. Without it the external store
    /// keeps its coordinator tables in the bucket of an `s3://` root.
    pub coordinator: Option<Arc<dyn CoordinatorBackend>>,
}

impl std::fmt::Debug for LogStoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStoreContext")
            .field("root", &self.root)
            .field("has_coordinator", &self.coordinator.is_some())
            .finish_non_exhaustive()
    }
}

impl LogStoreContext {
    /// Creates a context with empty settings and no coordinator.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, root: impl Into<String>) -> Self {
        Self {
            settings: Settings::new(),
            storage,
            root: root.into(),
            coordinator: None,
        }
    }

    /// Sets the engine settings.
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the coordinator backend.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<dyn CoordinatorBackend>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// URI scheme of the root, e.g. `s3`.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.root.split_once("://").map_or("file", |(scheme, _)| scheme)
    }

    /// Bucket of an `s3://` or `s3a://` root.
    #[must_use]
    pub fn s3_bucket(&self) -> Option<&str> {
        let (scheme, rest) = self.root.split_once("://")?;
        if !S3_SCHEMES.contains(&scheme) {
            return None;
        }
        rest.split('/').next().filter(|bucket| !bucket.is_empty())
    }

    fn coordinator_for(&self, config: &ExternalStoreConfig) -> Result<Arc<dyn CoordinatorBackend>> {
        if let Some(coordinator) = &self.coordinator {
            return Ok(Arc::clone(coordinator));
        }
        let bucket = self.s3_bucket().ok_or_else(|| Error::InvalidConfig {
            key: log_store_key(self.scheme()),
            message: format!(
                "the external log store needs a coordinator backend or an s3 root, got {}",
                self.root
            ),
        })?;
        Ok(Arc::new(config.s3_coordinator(bucket)?))
    }
}

/// Builds a log store from a context.
#[async_trait]
pub trait LogStoreFactory: Send + Sync {
    /// Creates the store.
    async fn create(&self, ctx: &LogStoreContext) -> Result<Arc<dyn LogStore>>;
}

/// Factory for [`StorageLogStore`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageLogStoreFactory;

#[async_trait]
impl LogStoreFactory for StorageLogStoreFactory {
    async fn create(&self, ctx: &LogStoreContext) -> Result<Arc<dyn LogStore>> {
        Ok(Arc::new(StorageLogStore::new(
            Arc::clone(&ctx.storage),
            ctx.root.clone(),
        )))
    }
}

/// Factory for [`ExternalLogStore`]; bootstraps the coordinator table.
///
/// The coordinator is the context's, or else one built by
/// [`ExternalStoreConfig::s3_coordinator`] in the root's bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalLogStoreFactory;

#[async_trait]
impl LogStoreFactory for ExternalLogStoreFactory {
    async fn create(&self, ctx: &LogStoreContext) -> Result<Arc<dyn LogStore>> {
        let config = ExternalStoreConfig::from_settings(&ctx.settings)?;
        let backend = ctx.coordinator_for(&config)?;
        let base = StorageLogStore::new(Arc::clone(&ctx.storage), ctx.root.clone());
        Ok(Arc::new(ExternalLogStore::connect(base, backend, &config).await?))
    }
}

/// Name-to-factory registry.
#[derive(Clone, Default)]
pub struct LogStoreRegistry {
    factories: HashMap<String, Arc<dyn LogStoreFactory>>,
}

impl std::fmt::Debug for LogStoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("LogStoreRegistry")
            .field("names", &names)
            .finish()
    }
}

impl LogStoreRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in stores.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(STORAGE_LOG_STORE, Arc::new(StorageLogStoreFactory));
        let external: Arc<dyn LogStoreFactory> = Arc::new(ExternalLogStoreFactory);
        registry.register(EXTERNAL_LOG_STORE, Arc::clone(&external));
        for alias in EXTERNAL_ALIASES {
            registry.register(alias, Arc::clone(&external));
        }
        registry
    }

    /// Registers `factory` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn LogStoreFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Creates the store registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for unknown names, or the factory's
    /// error.
    pub async fn create(&self, name: &str, ctx: &LogStoreContext) -> Result<Arc<dyn LogStore>> {
        let factory = self.factories.get(name).ok_or_else(|| Error::InvalidConfig {
            key: log_store_key(ctx.scheme()),
            message: format!("unknown log store `{name}`"),
        })?;
        tracing::info!(log_store = name, root = %ctx.root, "creating log store");
        factory.create(ctx).await
    }

    /// Creates the store configured for the context's scheme.
    ///
    /// # Errors
    ///
    /// See [`Self::create`].
    pub async fn open(&self, ctx: &LogStoreContext) -> Result<Arc<dyn LogStore>> {
        let name = ctx
            .settings
            .get(&log_store_key(ctx.scheme()))
            .unwrap_or(DEFAULT_LOG_STORE)
            .trim()
            .to_string();
        self.create(&name, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::memory::MemoryCoordinator;
    use tollgate_core::config::library_key;
    use tollgate_core::storage::MemoryBackend;

    fn ctx() -> LogStoreContext {
        LogStoreContext::new(Arc::new(MemoryBackend::new()), "s3://bucket")
    }

    #[test]
    fn scheme_comes_from_root() {
        assert_eq!(ctx().scheme(), "s3");
        assert_eq!(LogStoreContext::new(Arc::new(MemoryBackend::new()), "/data").scheme(), "file");
        assert_eq!(log_store_key("s3"), "delta.logStore.s3.impl");
    }

    #[tokio::test]
    async fn default_is_storage_store() {
        let registry = LogStoreRegistry::with_builtins();
        let store = registry.open(&ctx()).await.unwrap();
        assert!(!store.is_partial_write_visible("t/_delta_log/x.json"));
        assert!(registry.contains("storage"));
        assert!(registry.contains("io.delta.storage.S3DynamoDBLogStore"));
    }

    #[tokio::test]
    async fn unknown_name_is_rejected() {
        let registry = LogStoreRegistry::with_builtins();
        let ctx = ctx().with_settings(Settings::new().with(log_store_key("s3"), "nope"));
        let err = registry.open(&ctx).await.err().expect("expected open to fail");
        assert!(
            matches!(err, Error::InvalidConfig { ref key, .. } if key == "delta.logStore.s3.impl")
        );
    }

    #[tokio::test]
    async fn external_store_requires_coordinator_off_s3() {
        let registry = LogStoreRegistry::with_builtins();
        let memory_root = LogStoreContext::new(Arc::new(MemoryBackend::new()), "memory://");
        let err = registry.create(EXTERNAL_LOG_STORE, &memory_root).await.err().expect("expected create to fail");
        assert!(
            matches!(err, Error::InvalidConfig { ref key, .. } if key == "delta.logStore.memory.impl"),
            "{err:?}"
        );

        let coordinator = MemoryCoordinator::new();
        let ctx = ctx()
            .with_settings(Settings::new().with(log_store_key("s3"), "external"))
            .with_coordinator(Arc::new(coordinator.clone()));
        registry.open(&ctx).await.unwrap();
        assert!(coordinator.items("delta_log").unwrap().is_empty());
    }

    #[test]
    fn s3_coordinator_is_built_from_settings() {
        assert_eq!(ctx().s3_bucket(), Some("bucket"));
        let nested = LogStoreContext::new(Arc::new(MemoryBackend::new()), "s3a://lake/warehouse");
        assert_eq!(nested.s3_bucket(), Some("lake"));
        assert_eq!(LogStoreContext::new(Arc::new(MemoryBackend::new()), "s3://").s3_bucket(), None);
        assert_eq!(LogStoreContext::new(Arc::new(MemoryBackend::new()), "gs://b").s3_bucket(), None);

        let settings = Settings::new()
            .with(library_key(config::ENDPOINT), "http://localhost:4566")
            .with(library_key(config::REGION), "eu-west-1")
            .with(library_key(config::CREDENTIALS_PROVIDER), "anonymous");
        let config = ExternalStoreConfig::from_settings(&settings).unwrap();
        assert!(nested.coordinator_for(&config).is_ok());

        let supplied = ctx().with_coordinator(Arc::new(MemoryCoordinator::new()));
        let backend = supplied.coordinator_for(&config).unwrap();
        assert!(Arc::ptr_eq(&backend, supplied.coordinator.as_ref().unwrap()));
    }
}
