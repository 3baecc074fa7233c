//! Distributed locks and leader election
//!
//! Mutual exclusion across replicas rides on atomic conditional upserts in
//! the shared document store: a lock row is replaced only when its lease
//! has expired or the caller already owns it. A crashed holder leaves its
//! lock to expire via the lease; a recovered holder must assume it lost the
//! lock and rely on idempotency instead of resuming half-done work.
//!
//! Leader election is the same mechanism on a singleton `status=leader`
//! row, kept alive by a heartbeat task and re-challenged by followers once
//! the heartbeat goes stale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::LockConfig;
use crate::error::{EngineError, Result};
use crate::store::{collections, DocumentStore, Eligibility, Filter};

pub struct DistributedLockManager {
    store: Arc<dyn DocumentStore>,
    pod_id: String,
    lock_ttl_secs: i64,
    heartbeat_interval: Duration,
    leader_stale_secs: i64,
    cleanup_interval: Duration,
    is_leader: AtomicBool,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl DistributedLockManager {
    pub fn new(store: Arc<dyn DocumentStore>, pod_id: impl Into<String>, config: &LockConfig) -> Self {
        DistributedLockManager {
            store,
            pod_id: pod_id.into(),
            lock_ttl_secs: config.ttl_secs,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            leader_stale_secs: config.leader_stale_secs,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
            is_leader: AtomicBool::new(false),
            heartbeat_task: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Start the expired-lock sweeper and enter the leader contest
    pub async fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(e) = manager.cleanup_expired_locks().await {
                    error!("lock cleanup failed: {e}");
                }
                sleep(manager.cleanup_interval).await;
            }
        });
        *self.cleanup_task.lock() = Some(handle);

        if let Err(e) = self.try_become_leader().await {
            error!("leader election failed: {e}");
        }
        info!(pod_id = %self.pod_id, leader = self.is_leader(), "lock manager started");
    }

    /// Stop background tasks and relinquish leadership
    pub async fn stop(&self) {
        if let Some(handle) = self.heartbeat_task.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
        }
        if self.is_leader.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.release_leadership().await {
                warn!("failed to release leadership: {e}");
            }
        }
    }

    /// Try to take a named lock with a lease. Returns false when another
    /// live holder owns it.
    pub async fn acquire_lock(&self, lock_name: &str, ttl_secs: Option<i64>) -> Result<bool> {
        let now = Utc::now();
        let ttl = ttl_secs.unwrap_or(self.lock_ttl_secs);
        let expires_at = now + chrono::Duration::seconds(ttl);

        let outcome = self
            .store
            .upsert_if(
                collections::DISTRIBUTED_LOCKS,
                &Filter::new().eq("lock_name", lock_name),
                &json!({
                    "pod_id": self.pod_id,
                    "acquired_at": now.to_rfc3339(),
                    "expires_at": expires_at.to_rfc3339(),
                    "updated_at": now.to_rfc3339(),
                }),
                &Eligibility::ExpiredOrOwnedBy {
                    expires_field: "expires_at".to_string(),
                    owner_field: "pod_id".to_string(),
                    now,
                    owner: self.pod_id.clone(),
                },
            )
            .await?;

        let acquired = outcome.applied();
        debug!(lock_name, pod_id = %self.pod_id, acquired, "lock acquisition attempt");
        Ok(acquired)
    }

    /// Release a lock this pod holds. Releasing a lock held by another pod
    /// is a no-op.
    pub async fn release_lock(&self, lock_name: &str) -> Result<bool> {
        let deleted = self
            .store
            .delete(
                collections::DISTRIBUTED_LOCKS,
                &Filter::new()
                    .eq("lock_name", lock_name)
                    .eq("pod_id", self.pod_id.clone()),
            )
            .await?;
        Ok(deleted > 0)
    }

    /// Run `operation` under the named lock. The lock is released on every
    /// exit path, including an error from the operation. Failure to acquire
    /// surfaces as [`EngineError::Contention`] so the caller can skip.
    pub async fn execute_with_lock<F, Fut, T>(&self, lock_name: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.acquire_lock(lock_name, None).await? {
            return Err(EngineError::Contention(format!(
                "lock '{lock_name}' held by another pod"
            )));
        }

        let result = operation().await;

        if let Err(e) = self.release_lock(lock_name).await {
            warn!(lock_name, "failed to release lock: {e}");
        }

        result
    }

    /// Challenge for leadership. Wins only when no leader row exists or the
    /// incumbent's heartbeat lease has lapsed; the check-and-set is atomic.
    pub async fn try_become_leader(self: &Arc<Self>) -> Result<bool> {
        let now = Utc::now();
        let heartbeat_expires = now + chrono::Duration::seconds(self.leader_stale_secs);

        let outcome = self
            .store
            .upsert_if(
                collections::LEADER_ELECTION,
                &Filter::new().eq("status", "leader"),
                &json!({
                    "pod_id": self.pod_id,
                    "elected_at": now.to_rfc3339(),
                    "last_heartbeat": now.to_rfc3339(),
                    "heartbeat_expires_at": heartbeat_expires.to_rfc3339(),
                    "updated_at": now.to_rfc3339(),
                }),
                &Eligibility::ExpiredOrOwnedBy {
                    expires_field: "heartbeat_expires_at".to_string(),
                    owner_field: "pod_id".to_string(),
                    now,
                    owner: self.pod_id.clone(),
                },
            )
            .await?;

        if outcome.applied() {
            let first_win = !self.is_leader.swap(true, Ordering::SeqCst);
            if first_win {
                info!(pod_id = %self.pod_id, "became leader");
                self.spawn_heartbeat();
            }
            Ok(true)
        } else {
            self.is_leader.store(false, Ordering::SeqCst);
            if let Some(leader) = self.current_leader().await? {
                debug!(pod_id = %self.pod_id, leader, "following");
            }
            Ok(false)
        }
    }

    fn spawn_heartbeat(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while manager.is_leader() {
                if let Err(e) = manager.send_heartbeat().await {
                    error!("leader heartbeat failed: {e}");
                }
                sleep(manager.heartbeat_interval).await;
            }
        });
        *self.heartbeat_task.lock() = Some(handle);
    }

    async fn send_heartbeat(&self) -> Result<()> {
        // Confirm we still own the row before refreshing it; another pod may
        // have taken over while this one was partitioned
        let current = self
            .store
            .find_one(
                collections::LEADER_ELECTION,
                &Filter::new().eq("status", "leader"),
            )
            .await?;

        match current {
            Some(doc) if doc.get("pod_id").and_then(|v| v.as_str()) == Some(&self.pod_id) => {
                let now = Utc::now();
                let heartbeat_expires = now + chrono::Duration::seconds(self.leader_stale_secs);
                self.store
                    .upsert(
                        collections::LEADER_ELECTION,
                        &Filter::new().eq("status", "leader").eq("pod_id", self.pod_id.clone()),
                        &json!({
                            "last_heartbeat": now.to_rfc3339(),
                            "heartbeat_expires_at": heartbeat_expires.to_rfc3339(),
                            "updated_at": now.to_rfc3339(),
                        }),
                    )
                    .await?;
                debug!(pod_id = %self.pod_id, "leader heartbeat sent");
            }
            _ => {
                warn!(pod_id = %self.pod_id, "lost leadership, stopping heartbeat");
                self.is_leader.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn release_leadership(&self) -> Result<()> {
        let deleted = self
            .store
            .delete(
                collections::LEADER_ELECTION,
                &Filter::new()
                    .eq("status", "leader")
                    .eq("pod_id", self.pod_id.clone()),
            )
            .await?;
        if deleted > 0 {
            info!(pod_id = %self.pod_id, "released leadership");
        }
        Ok(())
    }

    /// Pod id of the current leader, if any
    pub async fn current_leader(&self) -> Result<Option<String>> {
        let doc = self
            .store
            .find_one(
                collections::LEADER_ELECTION,
                &Filter::new().eq("status", "leader"),
            )
            .await?;
        Ok(doc
            .and_then(|d| d.get("pod_id").and_then(|v| v.as_str()).map(String::from)))
    }

    /// Leader information for the health endpoint
    pub async fn leader_info(&self) -> Result<serde_json::Value> {
        let doc = self
            .store
            .find_one(
                collections::LEADER_ELECTION,
                &Filter::new().eq("status", "leader"),
            )
            .await?;

        Ok(match doc {
            Some(doc) => json!({
                "leader_pod_id": doc.get("pod_id"),
                "last_heartbeat": doc.get("last_heartbeat"),
                "elected_at": doc.get("elected_at"),
                "is_current_leader": doc.get("pod_id").and_then(|v| v.as_str())
                    == Some(self.pod_id.as_str()),
                "current_pod_id": self.pod_id,
            }),
            None => json!({
                "leader_pod_id": null,
                "status": "no_leader",
                "is_current_leader": false,
                "current_pod_id": self.pod_id,
            }),
        })
    }

    /// Delete locks whose leases have lapsed
    async fn cleanup_expired_locks(&self) -> Result<()> {
        let now = Utc::now();
        let locks = self
            .store
            .find(collections::DISTRIBUTED_LOCKS, &Filter::new())
            .await?;

        let mut removed = 0usize;
        for lock in locks {
            let expired = lock
                .get("expires_at")
                .and_then(|v| v.as_str())
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t < now)
                .unwrap_or(false);
            if !expired {
                continue;
            }
            let (Some(name), Some(expires_at)) = (
                lock.get("lock_name").and_then(|v| v.as_str()),
                lock.get("expires_at").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            // Match on the exact expiry so a lease refreshed since the read
            // is left alone
            removed += self
                .store
                .delete(
                    collections::DISTRIBUTED_LOCKS,
                    &Filter::new()
                        .eq("lock_name", name)
                        .eq("expires_at", expires_at),
                )
                .await?;
        }

        if removed > 0 {
            debug!(removed, "cleaned up expired locks");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn manager(store: &Arc<SqliteStore>, pod: &str) -> Arc<DistributedLockManager> {
        Arc::new(DistributedLockManager::new(
            Arc::clone(store) as Arc<dyn DocumentStore>,
            pod,
            &LockConfig::default(),
        ))
    }

    fn shared_store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_lock_mutual_exclusion() {
        let store = shared_store();
        let a = manager(&store, "pod-a");
        let b = manager(&store, "pod-b");

        assert!(a.acquire_lock("signal_x", None).await.unwrap());
        assert!(!b.acquire_lock("signal_x", None).await.unwrap());

        // Re-entrant for the holder
        assert!(a.acquire_lock("signal_x", None).await.unwrap());

        assert!(a.release_lock("signal_x").await.unwrap());
        assert!(b.acquire_lock("signal_x", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_distinct_locks_do_not_collide() {
        let store = shared_store();
        let a = manager(&store, "pod-a");
        let b = manager(&store, "pod-b");

        assert!(a.acquire_lock("signal_x", None).await.unwrap());
        assert!(b.acquire_lock("signal_y", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken() {
        let store = shared_store();
        let a = manager(&store, "pod-a");
        let b = manager(&store, "pod-b");

        assert!(a.acquire_lock("signal_x", Some(-1)).await.unwrap());
        assert!(b.acquire_lock("signal_x", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_does_not_touch_foreign_lock() {
        let store = shared_store();
        let a = manager(&store, "pod-a");
        let b = manager(&store, "pod-b");

        assert!(a.acquire_lock("signal_x", None).await.unwrap());
        assert!(!b.release_lock("signal_x").await.unwrap());
        assert!(!b.acquire_lock("signal_x", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_execute_with_lock_releases_on_success_and_error() {
        let store = shared_store();
        let a = manager(&store, "pod-a");
        let b = manager(&store, "pod-b");

        let value = a
            .execute_with_lock("signal_x", || async { Ok::<_, EngineError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(b.acquire_lock("signal_x", None).await.unwrap());
        assert!(b.release_lock("signal_x").await.unwrap());

        let err = a
            .execute_with_lock("signal_y", || async {
                Err::<(), _>(EngineError::validation("boom"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        // Released despite the failure
        assert!(b.acquire_lock("signal_y", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_execute_with_lock_reports_contention() {
        let store = shared_store();
        let a = manager(&store, "pod-a");
        let b = manager(&store, "pod-b");

        assert!(a.acquire_lock("signal_x", None).await.unwrap());
        let err = b
            .execute_with_lock("signal_x", || async { Ok::<_, EngineError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Contention(_)));
    }

    #[tokio::test]
    async fn test_leader_election_single_winner() {
        let store = shared_store();
        let a = manager(&store, "pod-a");
        let b = manager(&store, "pod-b");

        assert!(a.try_become_leader().await.unwrap());
        assert!(!b.try_become_leader().await.unwrap());
        assert!(a.is_leader());
        assert!(!b.is_leader());
        assert_eq!(b.current_leader().await.unwrap().as_deref(), Some("pod-a"));

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_stale_leader_is_replaced() {
        let store = shared_store();
        let a = manager(&store, "pod-a");
        let b = manager(&store, "pod-b");

        assert!(a.try_become_leader().await.unwrap());

        // Age the incumbent's heartbeat beyond the staleness window
        let stale = (Utc::now() - chrono::Duration::seconds(60)).to_rfc3339();
        store
            .upsert(
                collections::LEADER_ELECTION,
                &Filter::new().eq("status", "leader"),
                &json!({ "last_heartbeat": stale, "heartbeat_expires_at": stale }),
            )
            .await
            .unwrap();

        assert!(b.try_become_leader().await.unwrap());
        assert_eq!(b.current_leader().await.unwrap().as_deref(), Some("pod-b"));

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let store = shared_store();
        let a = manager(&store, "pod-a");

        assert!(a.acquire_lock("stale", Some(-10)).await.unwrap());
        assert!(a.acquire_lock("fresh", Some(60)).await.unwrap());

        a.cleanup_expired_locks().await.unwrap();

        let remaining = store
            .find(collections::DISTRIBUTED_LOCKS, &Filter::new())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["lock_name"], json!("fresh"));
    }
}
