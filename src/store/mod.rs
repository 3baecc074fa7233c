//! Document store abstraction
//!
//! The engine keeps all cross-replica state (positions, daily P&L,
//! distributed locks, leader election, trading configs, audit trail) in a
//! shared document store. The contract is deliberately small: equality
//! filters, shallow-merge upserts, and an atomic conditional upsert used
//! for lock acquisition.

pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Collection names used by the engine
pub mod collections {
    pub const POSITIONS: &str = "positions";
    pub const DAILY_PNL: &str = "daily_pnl";
    pub const DISTRIBUTED_LOCKS: &str = "distributed_locks";
    pub const LEADER_ELECTION: &str = "leader_election";
    pub const OCO_PAIRS: &str = "oco_pairs";
    pub const AUDIT_LOGS: &str = "audit_logs";
    pub const TRADING_CONFIGS: &str = "trading_configs";
}

/// Equality filter over top-level document fields
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether a document satisfies every condition
    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| doc.get(field) == Some(expected))
    }
}

/// Predicate controlling whether an existing matched document may be replaced.
///
/// `ExpiredOrOwnedBy` is the lock-acquisition predicate: the upsert goes
/// through only when the matched document's lease has expired or is already
/// held by this owner.
#[derive(Debug, Clone)]
pub enum Eligibility {
    Always,
    ExpiredOrOwnedBy {
        expires_field: String,
        owner_field: String,
        now: chrono::DateTime<chrono::Utc>,
        owner: String,
    },
}

impl Eligibility {
    /// Evaluate the predicate against an existing document
    pub fn allows(&self, doc: &Value) -> bool {
        match self {
            Eligibility::Always => true,
            Eligibility::ExpiredOrOwnedBy {
                expires_field,
                owner_field,
                now,
                owner,
            } => {
                let expired = doc
                    .get(expires_field)
                    .and_then(|v| v.as_str())
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|expires| expires < *now)
                    .unwrap_or(true);
                let owned = doc.get(owner_field).and_then(|v| v.as_str()) == Some(owner.as_str());
                expired || owned
            }
        }
    }
}

/// Result of an upsert attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No document matched the filter; a new one was inserted
    Inserted,
    /// A matched document passed the eligibility predicate and was updated
    Updated,
    /// A matched document failed the eligibility predicate; nothing changed
    Skipped,
}

impl UpsertOutcome {
    /// Whether the caller's fields are now the stored state
    pub fn applied(&self) -> bool {
        !matches!(self, UpsertOutcome::Skipped)
    }
}

/// Shared document store contract
///
/// Every operation is a single atomic call; the engine holds no long-lived
/// transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Merge `set` into the first document matching `filter`, inserting a
    /// new document when none matches.
    async fn upsert(&self, collection: &str, filter: &Filter, set: &Value)
        -> Result<UpsertOutcome>;

    /// Conditional upsert: an existing matched document is only replaced
    /// when `eligibility` allows it. The check-and-set is atomic.
    async fn upsert_if(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Value,
        eligibility: &Eligibility,
    ) -> Result<UpsertOutcome>;

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>>;

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Value>>;

    /// Delete all matching documents, returning how many were removed
    async fn delete(&self, collection: &str, filter: &Filter) -> Result<usize>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Insert without matching (append-only collections like the audit trail)
    async fn insert(&self, collection: &str, doc: &Value) -> Result<()>;
}
