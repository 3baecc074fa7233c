//! Exchange abstraction and bindings
//!
//! The engine talks to the venue through the [`Exchange`] trait; the
//! shipped bindings are a Binance USD-M futures REST client and a local
//! simulator. Orders carry `reduce_only` and, in hedge mode, a position
//! side.

pub mod binance;
pub mod filters;
pub mod simulator;

pub use filters::SymbolFilters;
pub use simulator::SimulatorExchange;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ExecutionResult, Symbol, TradeOrder};

/// Exchange-visible order summary, as returned by open-order queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: Symbol,
    pub status: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub quantity: Option<f64>,
}

/// Detailed order state, queried after a fill is detected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order_id: String,
    pub symbol: Symbol,
    pub status: String,
    #[serde(default)]
    pub avg_price: Option<f64>,
    #[serde(default)]
    pub executed_qty: Option<f64>,
    #[serde(default)]
    pub commission: Option<f64>,
}

/// Venue contract consumed by the engine
///
/// `cancel_order` must be idempotent: cancelling an order the venue no
/// longer knows about reports success.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn execute(&self, order: &TradeOrder) -> Result<ExecutionResult>;

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<()>;

    async fn get_order_status(&self, symbol: &Symbol, order_id: &str) -> Result<OrderDetails>;

    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<OpenOrder>>;

    async fn get_symbol_price(&self, symbol: &Symbol) -> Result<f64>;

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolFilters>;

    async fn get_account_info(&self) -> Result<serde_json::Value>;

    async fn get_position_info(&self) -> Result<serde_json::Value>;

    /// Whether dual-side (hedge) position mode is enabled on the account
    async fn verify_hedge_mode(&self) -> Result<bool>;
}
