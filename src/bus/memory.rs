//! In-process message bus
//!
//! Used by tests and single-process deployments without a broker. Subjects
//! are matched exactly; every subscriber of a subject receives every
//! message published to it.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{BusMessage, MessageBus};
use crate::error::Result;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct InMemoryBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        InMemoryBus::default()
    }

    /// Publish with a reply subject and headers, as an external producer
    /// would
    pub async fn publish_message(&self, message: BusMessage) -> Result<()> {
        let senders = {
            let subscribers = self.subscribers.lock();
            subscribers
                .get(&message.subject)
                .cloned()
                .unwrap_or_default()
        };

        for sender in senders {
            // A closed receiver just means the subscriber went away
            let _ = sender.send(message.clone()).await;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<BusMessage>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        debug!(subject, "in-memory subscription added");
        Ok(rx)
    }

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        self.publish_message(BusMessage::new(subject, payload)).await
    }
}
