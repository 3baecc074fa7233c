//! Best-effort audit trail
//!
//! Every signal, order, position event, and error is appended to the
//! `audit_logs` collection. Audit writes never fail the trading path: a
//! store error is logged and swallowed.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::store::{collections, DocumentStore};

pub struct AuditLog {
    store: Arc<dyn DocumentStore>,
    enabled: bool,
}

impl AuditLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        AuditLog {
            store,
            enabled: true,
        }
    }

    pub fn disabled(store: Arc<dyn DocumentStore>) -> Self {
        AuditLog {
            store,
            enabled: false,
        }
    }

    pub async fn log_signal(&self, signal: &Value, status: &str) {
        self.append(json!({
            "type": "signal",
            "status": status,
            "signal": signal,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .await;
    }

    pub async fn log_order(&self, order: &Value, result: &Value, status: &str) {
        self.append(json!({
            "type": "order",
            "status": status,
            "order": order,
            "result": result,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .await;
    }

    pub async fn log_error(&self, error: &str, context: Value) {
        self.append(json!({
            "type": "error",
            "error": error,
            "context": context,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .await;
    }

    pub async fn log_event(&self, event_type: &str, data: Value) {
        self.append(json!({
            "type": event_type,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .await;
    }

    async fn append(&self, doc: Value) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.store.insert(collections::AUDIT_LOGS, &doc).await {
            warn!("audit append failed: {e}");
        }
    }
}
