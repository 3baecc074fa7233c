//! Signal consumer
//!
//! Bridges the message bus to the dispatcher: decodes signal payloads,
//! extracts the upstream trace context, runs the dispatch inside a
//! consumer span, and answers on the reply subject when one is set.
//!
//! The subscription deliberately has no queue group: every replica sees
//! every signal and the dispatcher's fingerprint lock picks the single
//! executor. Nothing here lets an error escape; a poisoned message is
//! logged, counted, and dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::{BusMessage, MessageBus};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::trace;
use crate::types::{DispatchStatus, Signal};

pub struct SignalConsumer {
    bus: Arc<dyn MessageBus>,
    dispatcher: Arc<Dispatcher>,
    subject: String,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SignalConsumer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        dispatcher: Arc<Dispatcher>,
        subject: impl Into<String>,
    ) -> Self {
        SignalConsumer {
            bus,
            dispatcher,
            subject: subject.into(),
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe and start the consume loop
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut receiver = self.bus.subscribe(&self.subject).await?;
        self.running.store(true, Ordering::SeqCst);

        let consumer = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!(subject = consumer.subject, "signal consumer started");
            while consumer.running.load(Ordering::SeqCst) {
                match receiver.recv().await {
                    Some(message) => consumer.handle_message(message).await,
                    None => {
                        warn!("bus channel closed, consumer exiting");
                        break;
                    }
                }
            }
            info!("signal consumer stopped");
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    async fn handle_message(&self, message: BusMessage) {
        debug!(
            subject = message.subject,
            bytes = message.payload.len(),
            "bus message received"
        );

        // Undecodable payloads are dropped outright
        let value: serde_json::Value = match serde_json::from_slice(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                error!(subject = message.subject, "signal payload is not JSON: {e}");
                counter!(
                    crate::metrics::BUS_MESSAGES_PROCESSED_TOTAL, 1,
                    "status" => "error"
                );
                counter!(crate::metrics::BUS_ERRORS_TOTAL, 1, "type" => "processing");
                return;
            }
        };

        // A missing or unparseable timestamp fails deserialization here
        let signal: Signal = match serde_json::from_value(value) {
            Ok(signal) => signal,
            Err(e) => {
                error!(subject = message.subject, "invalid signal: {e}");
                counter!(
                    crate::metrics::BUS_MESSAGES_PROCESSED_TOTAL, 1,
                    "status" => "error"
                );
                counter!(crate::metrics::BUS_ERRORS_TOTAL, 1, "type" => "processing");
                self.reply(
                    &message,
                    &json!({"status": "error", "error": e.to_string()}),
                )
                .await;
                return;
            }
        };

        // Prefer the structured carrier, fall back to the legacy header map
        let trace_context = signal
            .trace_context
            .as_ref()
            .and_then(trace::extract)
            .or_else(|| signal.trace_headers.as_ref().and_then(trace::extract));

        let span = info_span!(
            "process_trading_signal",
            messaging.system = "websocket",
            messaging.destination = %message.subject,
            messaging.operation = "receive",
            signal.strategy_id = %signal.strategy_id,
            signal.symbol = %signal.symbol,
            signal.action = signal.action.as_str(),
            signal.timeframe = %signal.timeframe,
            trace_id = tracing::field::Empty,
            parent_span_id = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        );
        if let Some(ctx) = &trace_context {
            // Child-of relationship with the producer's span
            span.record("trace_id", ctx.trace_id.as_str());
            span.record("parent_span_id", ctx.parent_span_id.as_str());
        }

        let outcome = self
            .dispatcher
            .dispatch(&signal)
            .instrument(span.clone())
            .await;

        if outcome.status == DispatchStatus::Error {
            span.record("otel.status_code", "ERROR");
            counter!(
                crate::metrics::BUS_MESSAGES_PROCESSED_TOTAL, 1,
                "status" => "error"
            );
        } else {
            counter!(
                crate::metrics::BUS_MESSAGES_PROCESSED_TOTAL, 1,
                "status" => "success"
            );
        }

        info!(
            strategy_id = signal.strategy_id,
            status = outcome.status.as_str(),
            "signal processed"
        );

        let signal_id = signal
            .signal_id
            .clone()
            .unwrap_or_else(|| signal.strategy_id.clone());
        self.reply(
            &message,
            &json!({
                "status": "processed",
                "signal_id": signal_id,
                "result": outcome,
            }),
        )
        .await;
    }

    async fn reply(&self, message: &BusMessage, body: &serde_json::Value) {
        let Some(reply_subject) = &message.reply else {
            return;
        };
        let payload = body.to_string();
        if let Err(e) = self.bus.publish(reply_subject, payload.as_bytes()).await {
            warn!(reply_subject, "reply publish failed: {e}");
            counter!(crate::metrics::BUS_ERRORS_TOTAL, 1, "type" => "reply");
        } else {
            debug!(reply_subject, "acknowledgment sent");
        }
    }
}
