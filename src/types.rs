//! Core data types shared across the trading engine
//!
//! Inbound signals, internal trade orders, and execution results. Signals
//! arrive as JSON over the message bus or the HTTP API; orders are built by
//! the dispatcher and handed to an exchange binding.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trading pair symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recommended action carried by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "buy",
            SignalAction::Sell => "sell",
            SignalAction::Hold => "hold",
        }
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Exchange position side (hedge mode keeps LONG and SHORT independent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    /// Side of an order that opens or adds to this position
    pub fn opening_side(&self) -> Side {
        match self {
            PositionSide::Long => Side::Buy,
            PositionSide::Short => Side::Sell,
        }
    }

    /// Side of a reduce-only order that closes this position
    pub fn closing_side(&self) -> Side {
        self.opening_side().opposite()
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used by the exchange (and the OCO registry) for a hedge-mode position
pub fn position_key(symbol: &Symbol, position_side: PositionSide) -> String {
    format!("{}_{}", symbol, position_side)
}

/// Supported order types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TakeProfit,
    TakeProfitLimit,
}

impl Default for OrderType {
    fn default() -> Self {
        OrderType::Market
    }
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
            OrderType::TakeProfit => "take_profit",
            OrderType::TakeProfitLimit => "take_profit_limit",
        }
    }

    /// Limit-family orders require a target price
    pub fn requires_target_price(&self) -> bool {
        matches!(
            self,
            OrderType::Limit | OrderType::StopLimit | OrderType::TakeProfitLimit
        )
    }

    /// Stop-family orders require a stop price
    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit)
    }
}

/// Time in force for resting orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::Gtc
    }
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

/// Inbound trading signal
///
/// Produced by upstream strategy services and consumed exactly once per
/// fingerprint by the dispatcher. `timestamp` must be present and parseable
/// or the message is dropped before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: Symbol,
    pub action: SignalAction,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub price: f64,
    #[serde(default)]
    pub quantity: Option<f64>,
    pub current_price: f64,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub signal_id: Option<String>,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub position_size_pct: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// W3C trace context injected by the producer (`traceparent`/`tracestate`)
    #[serde(rename = "_otel_trace_context", default)]
    pub trace_context: Option<HashMap<String, String>>,
    /// Legacy header-map carrier, read only when `_otel_trace_context` is absent
    #[serde(rename = "_otel_trace_headers", default)]
    pub trace_headers: Option<HashMap<String, String>>,
}

fn default_confidence() -> f64 {
    1.0
}

impl Signal {
    /// Deterministic identifier used for cross-replica deduplication.
    ///
    /// Prefers the producer-assigned `signal_id`; otherwise hashes
    /// `(strategy_id, symbol, action, timestamp floored to the second)` so
    /// that redeliveries of the same signal collapse onto one fingerprint.
    pub fn fingerprint(&self) -> String {
        if let Some(id) = &self.signal_id {
            if !id.is_empty() {
                return id.clone();
            }
        }

        let mut hasher = DefaultHasher::new();
        self.strategy_id.hash(&mut hasher);
        self.symbol.as_str().hash(&mut hasher);
        self.action.as_str().hash(&mut hasher);
        self.timestamp.timestamp().hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Position side implied by the action. `Hold` signals never reach this.
    pub fn position_side(&self) -> PositionSide {
        match self.action {
            SignalAction::Sell => PositionSide::Short,
            _ => PositionSide::Long,
        }
    }
}

/// Internal trade order, immutable once handed to an exchange binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOrder {
    pub order_id: Uuid,
    pub position_id: Uuid,
    pub symbol: Symbol,
    pub side: Side,
    pub position_side: PositionSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub amount: f64,
    #[serde(default)]
    pub target_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub reduce_only: bool,
    pub strategy_id: String,
    #[serde(default)]
    pub signal_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TradeOrder {
    /// Notional value at the given reference price
    pub fn notional(&self, reference_price: f64) -> f64 {
        self.amount * self.target_price.unwrap_or(reference_price)
    }
}

/// Exchange-reported order state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Filled,
    PartiallyFilled,
    Rejected,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Filled => "filled",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Canceled => "canceled",
        }
    }
}

/// Single fill reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub quantity: f64,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub commission_asset: Option<String>,
    #[serde(default)]
    pub trade_id: Option<String>,
}

/// Result of executing an order on the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub symbol: Symbol,
    pub amount: f64,
    #[serde(default)]
    pub fill_price: Option<f64>,
    #[serde(default)]
    pub fills: Vec<Fill>,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub commission_asset: Option<String>,
    #[serde(default)]
    pub trade_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub simulated: bool,
}

impl ExecutionResult {
    /// Effective fill price, falling back to the volume-weighted fill mean
    pub fn effective_price(&self) -> Option<f64> {
        if let Some(p) = self.fill_price {
            if p > 0.0 {
                return Some(p);
            }
        }
        let qty: f64 = self.fills.iter().map(|f| f.quantity).sum();
        if qty > 0.0 {
            let value: f64 = self.fills.iter().map(|f| f.price * f.quantity).sum();
            Some(value / qty)
        } else {
            None
        }
    }
}

/// Terminal status of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Executed,
    Rejected,
    SkippedDuplicate,
    Hold,
    Error,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Executed => "executed",
            DispatchStatus::Rejected => "rejected",
            DispatchStatus::SkippedDuplicate => "skipped_duplicate",
            DispatchStatus::Hold => "hold",
            DispatchStatus::Error => "error",
        }
    }
}

/// Structured outcome returned by the dispatcher for every signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
}

impl DispatchOutcome {
    pub fn hold() -> Self {
        DispatchOutcome {
            status: DispatchStatus::Hold,
            reason: Some("no action required".to_string()),
            fingerprint: None,
            execution: None,
        }
    }

    pub fn duplicate(fingerprint: &str, reason: &str) -> Self {
        DispatchOutcome {
            status: DispatchStatus::SkippedDuplicate,
            reason: Some(reason.to_string()),
            fingerprint: Some(fingerprint.to_string()),
            execution: None,
        }
    }

    pub fn rejected(fingerprint: &str, reason: &str) -> Self {
        DispatchOutcome {
            status: DispatchStatus::Rejected,
            reason: Some(reason.to_string()),
            fingerprint: Some(fingerprint.to_string()),
            execution: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        DispatchOutcome {
            status: DispatchStatus::Error,
            reason: Some(reason.into()),
            fingerprint: None,
            execution: None,
        }
    }

    pub fn executed(fingerprint: &str, execution: ExecutionResult) -> Self {
        DispatchOutcome {
            status: DispatchStatus::Executed,
            reason: None,
            fingerprint: Some(fingerprint.to_string()),
            execution: Some(execution),
        }
    }
}

/// Why a bracket-managed position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Manual => "manual",
        }
    }
}
