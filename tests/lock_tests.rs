//! Cross-replica lock behavior over a shared store

use std::sync::Arc;

use tradeflow::config::LockConfig;
use tradeflow::error::EngineError;
use tradeflow::locks::DistributedLockManager;
use tradeflow::store::{DocumentStore, SqliteStore};

fn managers(pods: &[&str]) -> (Arc<SqliteStore>, Vec<Arc<DistributedLockManager>>) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let managers = pods
        .iter()
        .map(|pod| {
            Arc::new(DistributedLockManager::new(
                Arc::clone(&store) as Arc<dyn DocumentStore>,
                *pod,
                &LockConfig::default(),
            ))
        })
        .collect();
    (store, managers)
}

#[tokio::test]
async fn test_lock_is_reacquirable_after_success_and_failure() {
    let (_store, managers) = managers(&["pod-a", "pod-b"]);
    let a = &managers[0];
    let b = &managers[1];

    a.execute_with_lock("signal_x", || async { Ok::<_, EngineError>(()) })
        .await
        .unwrap();
    // Released on success: anyone can take it again
    assert!(b.acquire_lock("signal_x", None).await.unwrap());
    assert!(b.release_lock("signal_x").await.unwrap());

    let err = a
        .execute_with_lock("signal_x", || async {
            Err::<(), _>(EngineError::validation("body failed"))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    // Released on failure too
    assert!(b.acquire_lock("signal_x", None).await.unwrap());
}

#[tokio::test]
async fn test_contended_lock_skips_instead_of_waiting() {
    let (_store, managers) = managers(&["pod-a", "pod-b"]);
    let a = Arc::clone(&managers[0]);
    let b = Arc::clone(&managers[1]);

    let (first, second) = tokio::join!(
        a.execute_with_lock("signal_dup", || async {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Ok::<_, EngineError>("ran")
        }),
        async {
            // Give the first closure time to take the lock
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            b.execute_with_lock("signal_dup", || async { Ok::<_, EngineError>("ran") })
                .await
        }
    );

    assert_eq!(first.unwrap(), "ran");
    assert!(matches!(second.unwrap_err(), EngineError::Contention(_)));
}

#[tokio::test]
async fn test_distinct_fingerprints_run_concurrently() {
    let (_store, managers) = managers(&["pod-a", "pod-b"]);
    let a = Arc::clone(&managers[0]);
    let b = Arc::clone(&managers[1]);

    let started = std::time::Instant::now();
    let (first, second) = tokio::join!(
        a.execute_with_lock("signal_one", || async {
            tokio::time::sleep(std::time::Duration::from_millis(80)).await;
            Ok::<_, EngineError>(())
        }),
        b.execute_with_lock("signal_two", || async {
            tokio::time::sleep(std::time::Duration::from_millis(80)).await;
            Ok::<_, EngineError>(())
        })
    );

    first.unwrap();
    second.unwrap();
    // Serialized execution would need at least 160ms
    assert!(
        started.elapsed() < std::time::Duration::from_millis(150),
        "distinct locks must not serialize each other"
    );
}

#[tokio::test]
async fn test_leader_failover_after_stale_heartbeat() {
    let (store, managers) = managers(&["pod-a", "pod-b"]);
    let a = Arc::clone(&managers[0]);
    let b = Arc::clone(&managers[1]);

    assert!(a.try_become_leader().await.unwrap());
    assert!(!b.try_become_leader().await.unwrap());

    // Simulate pod-a going dark: age its heartbeat past the staleness window
    let stale = (chrono::Utc::now() - chrono::Duration::seconds(45)).to_rfc3339();
    store
        .upsert(
            "leader_election",
            &tradeflow::store::Filter::new().eq("status", "leader"),
            &serde_json::json!({
                "last_heartbeat": stale,
                "heartbeat_expires_at": stale,
            }),
        )
        .await
        .unwrap();

    assert!(b.try_become_leader().await.unwrap());
    assert!(b.is_leader());
    assert_eq!(a.current_leader().await.unwrap().as_deref(), Some("pod-b"));

    a.stop().await;
    b.stop().await;
}
