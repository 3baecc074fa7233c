//! SQLite-backed document store
//!
//! Documents are JSON blobs in a single `documents` table, filtered with
//! `json_extract`. Conditional upserts run inside an immediate transaction
//! so the check-and-set is atomic across processes sharing the database
//! file. WAL mode keeps readers off the writers' backs.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::debug;

use super::{DocumentStore, Eligibility, Filter, UpsertOutcome};
use crate::error::{EngineError, Result};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. Use `:memory:` for tests.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::Store(format!("create {}: {e}", parent.display())))?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL only applies to file-backed databases; ignore failure in memory
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        conn.pragma_update(None, "busy_timeout", 5_000)?;

        let store = SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        debug!("document store opened at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                doc TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
            [],
        )?;
        Ok(())
    }

    /// Build the WHERE clause and bind values for an equality filter
    fn filter_clause(filter: &Filter) -> (String, Vec<rusqlite::types::Value>) {
        let mut clause = String::from("collection = ?1");
        let mut binds: Vec<rusqlite::types::Value> = Vec::new();

        for (i, (field, value)) in filter.conditions().iter().enumerate() {
            clause.push_str(&format!(
                " AND json_extract(doc, '$.{}') = ?{}",
                field,
                i + 2
            ));
            binds.push(json_to_sql(value));
        }

        (clause, binds)
    }

    fn rows_matching(
        conn: &Connection,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<(i64, Value)>> {
        let (clause, binds) = Self::filter_clause(filter);
        let sql = format!("SELECT id, doc FROM documents WHERE {clause} ORDER BY id");
        let mut stmt = conn.prepare(&sql)?;

        let mut all_binds: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Text(collection.to_string())];
        all_binds.extend(binds);

        let rows = stmt
            .query_map(rusqlite::params_from_iter(all_binds), |row| {
                let id: i64 = row.get(0)?;
                let doc: String = row.get(1)?;
                Ok((id, doc))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, doc)| {
                serde_json::from_str(&doc)
                    .map(|v| (id, v))
                    .map_err(|e| EngineError::Store(format!("corrupt document {id}: {e}")))
            })
            .collect()
    }

    fn upsert_inner(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Value,
        eligibility: &Eligibility,
    ) -> Result<UpsertOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let existing = Self::rows_matching(&tx, collection, filter)?;
        let outcome = match existing.first() {
            Some((id, doc)) => {
                if !eligibility.allows(doc) {
                    UpsertOutcome::Skipped
                } else {
                    let mut merged = doc.clone();
                    merge_into(&mut merged, set);
                    tx.execute(
                        "UPDATE documents SET doc = ?1, updated_at = CURRENT_TIMESTAMP
                         WHERE id = ?2",
                        params![merged.to_string(), id],
                    )?;
                    UpsertOutcome::Updated
                }
            }
            None => {
                // Seed the new document with the filter fields so later
                // lookups by the same filter find it
                let mut doc = Value::Object(Default::default());
                for (field, value) in filter.conditions() {
                    doc[field.as_str()] = value.clone();
                }
                merge_into(&mut doc, set);
                tx.execute(
                    "INSERT INTO documents (collection, doc) VALUES (?1, ?2)",
                    params![collection, doc.to_string()],
                )?;
                UpsertOutcome::Inserted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Value,
    ) -> Result<UpsertOutcome> {
        self.upsert_inner(collection, filter, set, &Eligibility::Always)
    }

    async fn upsert_if(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Value,
        eligibility: &Eligibility,
    ) -> Result<UpsertOutcome> {
        self.upsert_inner(collection, filter, set, eligibility)
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>> {
        let conn = self.conn.lock();
        Ok(Self::rows_matching(&conn, collection, filter)?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect())
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        Ok(Self::rows_matching(&conn, collection, filter)?
            .into_iter()
            .map(|(_, doc)| doc)
            .next())
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let conn = self.conn.lock();
        let (clause, binds) = Self::filter_clause(filter);
        let sql = format!("DELETE FROM documents WHERE {clause}");

        let mut all_binds: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Text(collection.to_string())];
        all_binds.extend(binds);

        let deleted = conn.execute(&sql, rusqlite::params_from_iter(all_binds))?;
        Ok(deleted)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let conn = self.conn.lock();
        let (clause, binds) = Self::filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM documents WHERE {clause}");
        let mut stmt = conn.prepare(&sql)?;

        let mut all_binds: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Text(collection.to_string())];
        all_binds.extend(binds);

        let count: i64 = stmt.query_row(rusqlite::params_from_iter(all_binds), |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn insert(&self, collection: &str, doc: &Value) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (collection, doc) VALUES (?1, ?2)",
            params![collection, doc.to_string()],
        )?;
        Ok(())
    }
}

/// Shallow-merge `set` fields into `target`
fn merge_into(target: &mut Value, set: &Value) {
    if let (Value::Object(target_map), Value::Object(set_map)) = (target, set) {
        for (k, v) in set_map {
            target_map.insert(k.clone(), v.clone());
        }
    }
}

/// Map a JSON value to an SQLite bind value for `json_extract` comparison
fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::Null => rusqlite::types::Value::Null,
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let store = store();
        let filter = Filter::new().eq("symbol", "BTCUSDT").eq("position_side", "LONG");

        let outcome = store
            .upsert("positions", &filter, &json!({"quantity": 0.001, "status": "open"}))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let outcome = store
            .upsert("positions", &filter, &json!({"quantity": 0.002}))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let doc = store.find_one("positions", &filter).await.unwrap().unwrap();
        assert_eq!(doc["quantity"], json!(0.002));
        // Merge keeps fields the second upsert did not touch
        assert_eq!(doc["status"], json!("open"));
        assert_eq!(doc["symbol"], json!("BTCUSDT"));
    }

    #[tokio::test]
    async fn test_find_filters_by_fields() {
        let store = store();
        store
            .insert("positions", &json!({"symbol": "BTCUSDT", "status": "open"}))
            .await
            .unwrap();
        store
            .insert("positions", &json!({"symbol": "ETHUSDT", "status": "open"}))
            .await
            .unwrap();
        store
            .insert("positions", &json!({"symbol": "BTCUSDT", "status": "closed"}))
            .await
            .unwrap();

        let open = store
            .find("positions", &Filter::new().eq("status", "open"))
            .await
            .unwrap();
        assert_eq!(open.len(), 2);

        let btc_open = store
            .find(
                "positions",
                &Filter::new().eq("status", "open").eq("symbol", "BTCUSDT"),
            )
            .await
            .unwrap();
        assert_eq!(btc_open.len(), 1);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = store();
        store
            .insert("positions", &json!({"name": "x"}))
            .await
            .unwrap();
        let found = store
            .find("distributed_locks", &Filter::new().eq("name", "x"))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_delete_returns_count() {
        let store = store();
        let filter = Filter::new().eq("date", "2025-06-01");
        store
            .insert("daily_pnl", &json!({"date": "2025-06-01", "daily_pnl": 1.0}))
            .await
            .unwrap();
        assert_eq!(store.delete("daily_pnl", &filter).await.unwrap(), 1);
        assert_eq!(store.delete("daily_pnl", &filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_conditional_upsert_respects_live_lease() {
        let store = store();
        let now = Utc::now();
        let filter = Filter::new().eq("lock_name", "signal_abc");

        // pod-a takes the lock
        let outcome = store
            .upsert_if(
                "distributed_locks",
                &filter,
                &json!({
                    "pod_id": "pod-a",
                    "expires_at": (now + Duration::seconds(60)).to_rfc3339(),
                }),
                &Eligibility::ExpiredOrOwnedBy {
                    expires_field: "expires_at".into(),
                    owner_field: "pod_id".into(),
                    now,
                    owner: "pod-a".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        // pod-b cannot take it while the lease is live
        let outcome = store
            .upsert_if(
                "distributed_locks",
                &filter,
                &json!({
                    "pod_id": "pod-b",
                    "expires_at": (now + Duration::seconds(60)).to_rfc3339(),
                }),
                &Eligibility::ExpiredOrOwnedBy {
                    expires_field: "expires_at".into(),
                    owner_field: "pod_id".into(),
                    now,
                    owner: "pod-b".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Skipped);

        let doc = store
            .find_one("distributed_locks", &filter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["pod_id"], json!("pod-a"));

        // after expiry pod-b wins
        let later = now + Duration::seconds(120);
        let outcome = store
            .upsert_if(
                "distributed_locks",
                &filter,
                &json!({
                    "pod_id": "pod-b",
                    "expires_at": (later + Duration::seconds(60)).to_rfc3339(),
                }),
                &Eligibility::ExpiredOrOwnedBy {
                    expires_field: "expires_at".into(),
                    owner_field: "pod_id".into(),
                    now: later,
                    owner: "pod-b".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
    }

    #[tokio::test]
    async fn test_count() {
        let store = store();
        for i in 0..3 {
            store
                .insert("audit_logs", &json!({"type": "order", "seq": i}))
                .await
                .unwrap();
        }
        assert_eq!(
            store
                .count("audit_logs", &Filter::new().eq("type", "order"))
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_numeric_filter_values() {
        let store = store();
        store
            .insert("oco_pairs", &json!({"sl_order_id": 12345, "status": "active"}))
            .await
            .unwrap();
        let found = store
            .find_one("oco_pairs", &Filter::new().eq("sl_order_id", 12345))
            .await
            .unwrap();
        assert!(found.is_some());
    }
}
