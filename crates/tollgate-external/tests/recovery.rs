//! Recovery of commits interrupted after the claim, and fault injection.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;

use tollgate_core::error::Error;
use tollgate_core::log_store::{LogStore, StorageLogStore};
use tollgate_core::paths::commit_file_name;
use tollgate_external::coordinator::{CoordinatorBackend, CoordinatorClient, PutOutcome};
use tollgate_external::{CommitEntry, ExternalLogStore, FixedClock, MemoryCoordinator};
use tollgate_test_utils::{
    ErrorRates, FaultyCoordinator, Harness, ROOT, TracingBackend, init_test_logging,
};

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

async fn read_all(store: &ExternalLogStore, key: &str) -> Vec<String> {
    store
        .read(key)
        .await
        .unwrap()
        .collect::<tollgate_core::Result<Vec<_>>>()
        .unwrap()
}

fn store_over(
    storage: &TracingBackend,
    backend: Arc<dyn CoordinatorBackend>,
    clock: &Arc<FixedClock>,
) -> ExternalLogStore {
    ExternalLogStore::new(
        StorageLogStore::new(Arc::new(storage.clone()), ROOT),
        CoordinatorClient::new(backend, "delta_log"),
    )
    .with_clock(clock.clone())
}

async fn harness_with_genesis() -> Harness {
    let harness = Harness::new().await;
    harness
        .writer()
        .write(&Harness::commit_key("T", 0), &lines(&["v0"]), false)
        .await
        .unwrap();
    harness
}

#[tokio::test]
async fn crash_between_claim_and_materialize_is_recovered_by_listing() {
    init_test_logging();
    let harness = harness_with_genesis().await;
    let writer_a = harness.writer();
    let writer_b = harness.writer();
    let final_key = Harness::commit_key("T", 1);

    harness.storage.inject_put_failure(final_key.clone());
    let err = writer_a
        .write(&final_key, &lines(&["a", "b"]), false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CommitIncomplete { .. }), "{err:?}");
    harness.storage.clear_failures();

    let table_path = Harness::table_path("T");
    let entry = writer_b
        .client()
        .get_entry(&table_path, &commit_file_name(1))
        .await
        .unwrap()
        .unwrap();
    assert!(!entry.complete());

    let err = writer_b
        .write(&final_key, &lines(&["c"]), false)
        .await
        .unwrap_err();
    assert!(err.is_already_exists());

    harness.clock.set(200);
    let listed = writer_b.list_from(&Harness::commit_key("T", 0)).await.unwrap();
    let names: Vec<&str> = listed.iter().map(|s| s.file_name()).collect();
    assert_eq!(names, vec![commit_file_name(0), commit_file_name(1)]);

    assert_eq!(read_all(&writer_b, &final_key).await, vec!["a", "b"]);
    let entry = writer_b
        .client()
        .get_entry(&table_path, &commit_file_name(1))
        .await
        .unwrap()
        .unwrap();
    assert!(entry.complete());
    assert_eq!(entry.commit_time(), Some(200));
}

#[tokio::test]
async fn next_writer_recovers_previous_commit_before_claiming() {
    let harness = harness_with_genesis().await;
    let writer_a = harness.writer();
    let writer_b = harness.writer();

    harness
        .storage
        .inject_put_failure(Harness::commit_key("T", 1));
    writer_a
        .write(&Harness::commit_key("T", 1), &lines(&["a"]), false)
        .await
        .unwrap_err();
    harness.storage.clear_failures();

    writer_b
        .write(&Harness::commit_key("T", 2), &lines(&["b"]), false)
        .await
        .unwrap();

    assert_eq!(read_all(&writer_b, &Harness::commit_key("T", 1)).await, vec!["a"]);
    assert_eq!(read_all(&writer_b, &Harness::commit_key("T", 2)).await, vec!["b"]);
}

#[tokio::test]
async fn failed_completion_leaves_visible_file_and_incomplete_entry() {
    let harness = harness_with_genesis().await;
    let writer = harness.writer();
    let key = Harness::commit_key("T", 1);

    harness.faulty.fail_completions(true);
    let err = writer.write(&key, &lines(&["a"]), false).await.unwrap_err();
    assert!(matches!(err, Error::CommitIncomplete { .. }));
    harness.faulty.fail_completions(false);

    assert_eq!(read_all(&writer, &key).await, vec!["a"]);
    let table_path = Harness::table_path("T");
    let entry = writer
        .client()
        .get_entry(&table_path, &commit_file_name(1))
        .await
        .unwrap()
        .unwrap();
    assert!(!entry.complete());

    writer.list_from(&key).await.unwrap();
    let entry = writer
        .client()
        .get_entry(&table_path, &commit_file_name(1))
        .await
        .unwrap()
        .unwrap();
    assert!(entry.complete(), "listing completes the latest entry");
}

#[tokio::test]
async fn failed_claim_is_storage_error_and_keeps_the_staged_payload() {
    let harness = harness_with_genesis().await;
    let writer = harness.writer();
    let key = Harness::commit_key("T", 1);

    harness.faulty.fail_next_puts(1);
    let err = writer.write(&key, &lines(&["a"]), false).await.unwrap_err();
    assert!(matches!(err, Error::Storage { .. }), "{err:?}");

    let staged: Vec<String> = harness
        .storage
        .paths()
        .await
        .into_iter()
        .filter(|p| p.contains("/.tmp/00000000000000000001.json"))
        .collect();
    assert_eq!(staged.len(), 1, "{staged:?}");
    let entry = writer
        .client()
        .get_entry(&Harness::table_path("T"), &commit_file_name(1))
        .await
        .unwrap();
    assert!(entry.is_none());

    writer.write(&key, &lines(&["a"]), false).await.unwrap();
    assert_eq!(read_all(&writer, &key).await, vec!["a"]);
}

#[tokio::test]
async fn claim_applied_despite_lost_acknowledgement_completes_the_commit() {
    init_test_logging();
    let harness = harness_with_genesis().await;
    let writer = harness.writer();
    let key = Harness::commit_key("T", 1);

    harness.faulty.lose_next_put_acks(1);
    writer.write(&key, &lines(&["a", "b"]), false).await.unwrap();

    let entry = writer
        .client()
        .get_entry(&Harness::table_path("T"), &commit_file_name(1))
        .await
        .unwrap()
        .unwrap();
    assert!(entry.complete());
    assert!(
        harness
            .storage
            .paths()
            .await
            .iter()
            .any(|p| p.ends_with(entry.temp_path())),
        "staged payload of the stored claim is kept"
    );

    let listed = writer.list_from(&Harness::commit_key("T", 0)).await.unwrap();
    assert_eq!(listed.len(), 2);
    writer
        .write(&Harness::commit_key("T", 2), &lines(&["c"]), false)
        .await
        .unwrap();
    assert_eq!(read_all(&writer, &key).await, vec!["a", "b"]);
}

#[tokio::test]
async fn lost_acknowledgement_of_a_losing_claim_is_already_exists() {
    let harness = harness_with_genesis().await;
    let winner = harness.writer();
    let loser = harness.writer();
    let key = Harness::commit_key("T", 1);

    let rival = CommitEntry::new(
        Harness::table_path("T"),
        commit_file_name(1),
        ".tmp/rival.tmp",
    );
    winner.client().put_conditional(&rival, false).await.unwrap();

    harness.faulty.lose_next_put_acks(1);
    let err = loser.write(&key, &lines(&["b"]), false).await.unwrap_err();
    assert!(err.is_already_exists(), "{err:?}");
    let staged: Vec<String> = harness
        .storage
        .paths()
        .await
        .into_iter()
        .filter(|p| p.contains("/.tmp/00000000000000000001.json"))
        .collect();
    assert!(staged.is_empty(), "{staged:?}");
}

#[tokio::test]
async fn completion_never_regresses() {
    let harness = harness_with_genesis().await;
    let writer = harness.writer();
    let client = writer.client();
    let table_path = Harness::table_path("T");

    let entry = client
        .get_entry(&table_path, &commit_file_name(0))
        .await
        .unwrap()
        .unwrap();
    assert!(entry.complete());

    let regressed = CommitEntry::new(
        entry.table_path(),
        entry.file_name(),
        entry.temp_path(),
    );
    for overwrite in [false, true] {
        assert_eq!(
            client.put_conditional(&regressed, overwrite).await.unwrap(),
            PutOutcome::Conflict
        );
    }

    harness.clock.set(999);
    writer.fix_delta_log(&regressed).await.unwrap();
    writer.list_from(&Harness::commit_key("T", 0)).await.unwrap();

    let after = client
        .get_entry(&table_path, &commit_file_name(0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after, entry);
}

#[tokio::test]
async fn random_coordinator_faults_preserve_mutual_exclusion() {
    const VERSIONS: u64 = 6;

    let storage = TracingBackend::new();
    let coordinator = MemoryCoordinator::new();
    coordinator
        .create_table("delta_log", &Default::default())
        .await
        .unwrap();
    let faulty = Arc::new(
        FaultyCoordinator::new(Arc::new(coordinator.clone())).with_error_rates(
            ErrorRates {
                put: 0.2,
                get: 0.2,
                query: 0.2,
            },
            7,
        ),
    );
    let clock = Arc::new(FixedClock::new(100));

    let genesis = store_over(&storage, Arc::new(coordinator.clone()), &clock);
    genesis
        .write(&Harness::commit_key("T", 0), &lines(&["v0"]), false)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for writer_id in 0..4 {
        let store = store_over(&storage, faulty.clone(), &clock);
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            for version in 1..=VERSIONS {
                let key = Harness::commit_key("T", version);
                let payload = vec![format!("w{writer_id}")];
                for attempt in 0.. {
                    assert!(attempt < 200, "version {version} never settled");
                    match store.write(&key, &payload, false).await {
                        Ok(()) | Err(Error::CommitIncomplete { .. }) => {
                            claimed.push(version);
                            break;
                        }
                        Err(e) if e.is_already_exists() => break,
                        Err(_) => tokio::task::yield_now().await,
                    }
                }
            }
            (writer_id, claimed)
        }));
    }

    let mut owner = HashMap::new();
    for task in tasks {
        let (writer_id, claimed) = task.await.unwrap();
        for version in claimed {
            assert!(owner.insert(version, writer_id).is_none(), "version {version} claimed twice");
        }
    }
    assert_eq!(owner.len() as u64, VERSIONS);
    assert!(faulty.injected() > 0);

    let reader = store_over(&storage, Arc::new(coordinator.clone()), &clock);
    let listed = reader.list_from(&Harness::commit_key("T", 0)).await.unwrap();
    assert_eq!(listed.len() as u64, VERSIONS + 1);
    for version in 1..=VERSIONS {
        assert_eq!(
            read_all(&reader, &Harness::commit_key("T", version)).await,
            vec![format!("w{}", owner[&version])]
        );
    }
}
