//! Message bus abstraction
//!
//! Signals arrive as raw JSON messages on a subject; replies go back on an
//! optional reply subject. Delivery is at-least-once and every replica
//! receives every message; single execution is the dispatcher's fingerprint
//! lock's job, not the bus's.

pub mod memory;
pub mod ws;

pub use memory::InMemoryBus;
pub use ws::WebSocketBus;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// One delivered bus message
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub reply: Option<String>,
    pub headers: HashMap<String, String>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        BusMessage {
            subject: subject.into(),
            payload: payload.into(),
            reply: None,
            headers: HashMap::new(),
        }
    }
}

/// Bus contract consumed by the engine
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribe to a subject; messages arrive on the returned channel
    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<BusMessage>>;

    /// Publish a raw payload to a subject
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()>;
}
