//! WebSocket message bus binding
//!
//! Long-lived client connection to a bus gateway speaking JSON frames:
//! `sub` registers interest in a subject, `pub` sends a payload, `msg`
//! delivers one. The connection task reconnects forever with a fixed wait,
//! re-issues subscriptions after each reconnect, and keeps the link alive
//! with pings; too many unanswered pings force a reconnect. In-flight
//! message processing is independent of connection state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{BusMessage, MessageBus};
use crate::config::BusConfig;
use crate::error::{EngineError, Result};

const CHANNEL_CAPACITY: usize = 256;

/// JSON frame exchanged with the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum WireFrame {
    Sub {
        subject: String,
    },
    Pub {
        subject: String,
        data: String,
    },
    Msg {
        subject: String,
        #[serde(default)]
        reply: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
        data: String,
    },
}

pub struct WebSocketBus {
    url: String,
    ping_interval: Duration,
    max_outstanding_pings: u32,
    reconnect_wait: Duration,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl WebSocketBus {
    /// Create the bus client and start its connection task
    pub fn connect(config: &BusConfig) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let bus = Arc::new(WebSocketBus {
            url: config.url.clone(),
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            max_outstanding_pings: config.max_outstanding_pings,
            reconnect_wait: Duration::from_secs(config.reconnect_wait_secs),
            subscribers: Mutex::new(HashMap::new()),
            outbound_tx,
        });

        let runner = Arc::clone(&bus);
        tokio::spawn(async move {
            runner.run(outbound_rx).await;
        });
        bus
    }

    async fn run(self: Arc<Self>, mut outbound_rx: mpsc::UnboundedReceiver<String>) {
        loop {
            match connect_async(&self.url).await {
                Ok((stream, _)) => {
                    info!(url = self.url, "bus connected");
                    if let Err(e) = self.drive(stream, &mut outbound_rx).await {
                        warn!("bus connection dropped: {e}");
                    }
                }
                Err(e) => {
                    warn!(url = self.url, "bus connect failed: {e}");
                }
            }
            sleep(self.reconnect_wait).await;
        }
    }

    async fn drive(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<()> {
        let (mut sink, mut source) = stream.split();

        // Re-issue subscriptions after every (re)connect
        let subjects: Vec<String> = self.subscribers.lock().keys().cloned().collect();
        for subject in subjects {
            let frame = serde_json::to_string(&WireFrame::Sub { subject })?;
            sink.send(WsMessage::Text(frame))
                .await
                .map_err(|e| EngineError::Bus(e.to_string()))?;
        }

        let mut ping_tick = interval(self.ping_interval);
        let mut outstanding_pings = 0u32;

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => match frame {
                    Some(text) => sink
                        .send(WsMessage::Text(text))
                        .await
                        .map_err(|e| EngineError::Bus(e.to_string()))?,
                    None => return Ok(()),
                },
                _ = ping_tick.tick() => {
                    if outstanding_pings >= self.max_outstanding_pings {
                        return Err(EngineError::Bus(format!(
                            "{outstanding_pings} pings unanswered"
                        )));
                    }
                    sink.send(WsMessage::Ping(Vec::new()))
                        .await
                        .map_err(|e| EngineError::Bus(e.to_string()))?;
                    outstanding_pings += 1;
                }
                message = source.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => self.deliver(&text),
                    Some(Ok(WsMessage::Pong(_))) => outstanding_pings = 0,
                    Some(Ok(WsMessage::Ping(data))) => sink
                        .send(WsMessage::Pong(data))
                        .await
                        .map_err(|e| EngineError::Bus(e.to_string()))?,
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Err(EngineError::Bus("connection closed".to_string()))
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(EngineError::Bus(e.to_string())),
                },
            }
        }
    }

    fn deliver(&self, text: &str) {
        let frame: WireFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("unparseable bus frame: {e}");
                return;
            }
        };
        let WireFrame::Msg {
            subject,
            reply,
            headers,
            data,
        } = frame
        else {
            return;
        };

        let message = BusMessage {
            subject: subject.clone(),
            payload: data.into_bytes(),
            reply,
            headers,
        };

        let subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get(&subject) else {
            debug!(subject, "message for subject without subscribers");
            return;
        };
        for sender in senders {
            // Slow consumers shed load instead of stalling the read loop
            if sender.try_send(message.clone()).is_err() {
                warn!(subject, "subscriber channel full, dropping message");
            }
        }
    }
}

#[async_trait]
impl MessageBus for WebSocketBus {
    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<BusMessage>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.subscribers
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push(tx);

        let frame = serde_json::to_string(&WireFrame::Sub {
            subject: subject.to_string(),
        })?;
        self.outbound_tx
            .send(frame)
            .map_err(|_| EngineError::Bus("bus connection task gone".to_string()))?;
        Ok(rx)
    }

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        let data = String::from_utf8(payload.to_vec())
            .map_err(|_| EngineError::Bus("payload must be UTF-8".to_string()))?;
        let frame = serde_json::to_string(&WireFrame::Pub {
            subject: subject.to_string(),
            data,
        })?;
        self.outbound_tx
            .send(frame)
            .map_err(|_| EngineError::Bus("bus connection task gone".to_string()))
    }
}
