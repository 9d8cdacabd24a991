//! Coordinator table bootstrap and log-store construction from settings.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tollgate_core::config::{Settings, library_key};
use tollgate_core::error::Error;
use tollgate_core::log_store::LogStore;
use tollgate_core::storage::MemoryBackend;
use tollgate_external::bootstrap::{BootstrapOutcome, Sleeper, TableBootstrapper};
use tollgate_external::coordinator::{CoordinatorBackend, ProvisionedThroughput, TableStatus};
use tollgate_external::registry::{LogStoreContext, LogStoreRegistry, log_store_key};
use tollgate_external::{MemoryCoordinator, StorageCoordinator};

#[derive(Debug, Default)]
struct YieldingSleeper;

#[async_trait]
impl Sleeper for YieldingSleeper {
    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }
}

fn bootstrapper(backend: Arc<dyn CoordinatorBackend>) -> TableBootstrapper {
    TableBootstrapper::new(backend, "delta_log", ProvisionedThroughput::default())
        .with_sleeper(Arc::new(YieldingSleeper))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bootstraps_create_one_table() {
    let coordinator = MemoryCoordinator::new().with_creating_describes(4);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let backend: Arc<dyn CoordinatorBackend> = Arc::new(coordinator.clone());
        tasks.push(tokio::spawn(async move { bootstrapper(backend).run().await }));
    }

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            BootstrapOutcome::Created => created += 1,
            BootstrapOutcome::AlreadyExisted => {}
        }
    }
    assert_eq!(created, 1);
    assert_eq!(
        coordinator.describe_table("delta_log").await.unwrap(),
        Some(TableStatus::Active)
    );
}

#[tokio::test]
async fn bootstrap_is_idempotent_on_storage_coordinator() {
    let backend: Arc<dyn CoordinatorBackend> = Arc::new(StorageCoordinator::new(
        Arc::new(MemoryBackend::new()),
        "_coordinator",
    ));

    assert_eq!(
        bootstrapper(Arc::clone(&backend)).run().await.unwrap(),
        BootstrapOutcome::Created
    );
    assert_eq!(
        bootstrapper(backend).run().await.unwrap(),
        BootstrapOutcome::AlreadyExisted
    );
}

#[tokio::test]
async fn unexpected_status_fails_construction() {
    let coordinator = MemoryCoordinator::new();
    coordinator
        .force_status("delta_log", TableStatus::Other("ARCHIVED".into()))
        .unwrap();

    let registry = LogStoreRegistry::with_builtins();
    let ctx = LogStoreContext::new(Arc::new(MemoryBackend::new()), "s3://bucket")
        .with_settings(Settings::new().with(log_store_key("s3"), "external"))
        .with_coordinator(Arc::new(coordinator));

    let err = registry.open(&ctx).await.err().expect("expected open to fail");
    assert!(matches!(err, Error::UnexpectedTableStatus { .. }), "{err:?}");
}

#[tokio::test]
async fn registry_builds_external_store_from_settings() {
    let coordinator = MemoryCoordinator::new();
    let settings = Settings::new()
        .with(log_store_key("s3"), "io.delta.storage.S3DynamoDBLogStore")
        .with(library_key("ddb.tableName"), "commits")
        .with(library_key("provisionedThroughput.rcu"), "10");
    let ctx = LogStoreContext::new(Arc::new(MemoryBackend::new()), "s3://bucket")
        .with_settings(settings)
        .with_coordinator(Arc::new(coordinator.clone()));

    let store = LogStoreRegistry::with_builtins().open(&ctx).await.unwrap();
    store
        .write(
            "t/_delta_log/00000000000000000000.json",
            &["{}".to_string()],
            false,
        )
        .await
        .unwrap();

    assert_eq!(coordinator.items("commits").unwrap().len(), 1);
    assert!(coordinator.items("delta_log").is_err());
}

#[tokio::test]
async fn unknown_credentials_provider_fails_construction() {
    let settings = Settings::new()
        .with(log_store_key("s3"), "external")
        .with(library_key("credentials.provider"), "com.example.MissingProvider");
    let ctx = LogStoreContext::new(Arc::new(MemoryBackend::new()), "s3://bucket")
        .with_settings(settings)
        .with_coordinator(Arc::new(MemoryCoordinator::new()));

    let err = LogStoreRegistry::with_builtins().open(&ctx).await.err().expect("expected open to fail");
    assert!(matches!(err, Error::Storage { .. }), "{err:?}");
    assert!(
        std::error::Error::source(&err)
            .unwrap()
            .to_string()
            .contains("com.example.MissingProvider")
    );
}
