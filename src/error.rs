//! Engine error taxonomy
//!
//! Errors are classified by how callers must react: validation and risk
//! failures are reported and never retried, lock contention is expected
//! under multi-replica operation, transient remote failures are retried
//! with bounded backoff, permanent remote failures surface immediately.

use thiserror::Error;

/// Main error type for the trading engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed signal or order, missing field, out-of-range value
    #[error("validation error: {0}")]
    Validation(String),

    /// Risk limit exceeded; `reason` doubles as the metric label
    #[error("risk limit exceeded: {reason}")]
    Risk { reason: String },

    /// Distributed lock not acquired or duplicate fingerprint
    #[error("contention: {0}")]
    Contention(String),

    /// Exchange timeout / 5xx / connection loss, retried with backoff
    #[error("transient exchange error: {0}")]
    TransientExchange(String),

    /// Exchange rejected the request outright; never retried
    #[error("exchange error (code {code}): {message}")]
    PermanentExchange { code: i64, message: String },

    /// Document store failure
    #[error("store error: {0}")]
    Store(String),

    /// Message bus failure
    #[error("bus error: {0}")]
    Bus(String),

    /// Internal consistency breach; logged, cleaned up best-effort
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl EngineError {
    /// Whether a retry with backoff is appropriate
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientExchange(_))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn risk(reason: impl Into<String>) -> Self {
        EngineError::Risk {
            reason: reason.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        EngineError::Invariant(msg.into())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(format!("serialization: {err}"))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::TransientExchange(err.to_string())
    }
}

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;
