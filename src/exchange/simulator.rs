//! Simulated exchange for local development and tests
//!
//! Market orders fill immediately against a configurable price table with
//! slippage; stop and take-profit orders rest on a per-symbol open-order
//! book. Test hooks flip resting orders to filled so the monitoring paths
//! can be driven without a venue.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::exchange::{Exchange, OpenOrder, OrderDetails, SymbolFilters};
use crate::types::{ExecutionResult, Fill, OrderStatus, OrderType, Symbol, TradeOrder};

#[derive(Default)]
struct SimulatorState {
    prices: HashMap<String, f64>,
    open_orders: HashMap<String, Vec<OpenOrder>>,
    order_details: HashMap<String, OrderDetails>,
    cancelled: Vec<String>,
    filters: HashMap<String, SymbolFilters>,
    order_counter: u64,
    fail_next: Option<String>,
}

/// In-process [`Exchange`] implementation with deterministic fills
pub struct SimulatorExchange {
    state: Mutex<SimulatorState>,
    slippage: f64,
    fee_rate: f64,
    hedge_mode: bool,
}

impl Default for SimulatorExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorExchange {
    pub fn new() -> Self {
        SimulatorExchange {
            state: Mutex::new(SimulatorState::default()),
            slippage: 0.001,
            fee_rate: 0.001,
            hedge_mode: true,
        }
    }

    /// Simulator without slippage or fees, for arithmetic-sensitive tests
    pub fn frictionless() -> Self {
        SimulatorExchange {
            state: Mutex::new(SimulatorState::default()),
            slippage: 0.0,
            fee_rate: 0.0,
            hedge_mode: true,
        }
    }

    pub fn set_price(&self, symbol: &Symbol, price: f64) {
        self.state
            .lock()
            .prices
            .insert(symbol.to_string(), price);
    }

    pub fn set_symbol_filters(&self, filters: SymbolFilters) {
        self.state
            .lock()
            .filters
            .insert(filters.symbol.clone(), filters);
    }

    /// Fail the next `execute` call with a transient error
    pub fn fail_next_execute(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    /// Flip a resting order to filled, removing it from the open book
    pub fn fill_order(&self, symbol: &Symbol, order_id: &str, fill_price: f64) {
        let mut state = self.state.lock();
        if let Some(orders) = state.open_orders.get_mut(symbol.as_str()) {
            orders.retain(|o| o.order_id != order_id);
        }
        if let Some(details) = state.order_details.get_mut(order_id) {
            details.status = "FILLED".to_string();
            details.avg_price = Some(fill_price);
        }
    }

    /// Whether a cancel reached the venue for this order
    pub fn was_cancelled(&self, order_id: &str) -> bool {
        self.state
            .lock()
            .cancelled
            .iter()
            .any(|id| id == order_id)
    }

    pub fn open_order_count(&self, symbol: &Symbol) -> usize {
        self.state
            .lock()
            .open_orders
            .get(symbol.as_str())
            .map(|o| o.len())
            .unwrap_or(0)
    }

    fn reference_price(state: &SimulatorState, order: &TradeOrder) -> Result<f64> {
        if let Some(price) = state.prices.get(order.symbol.as_str()) {
            return Ok(*price);
        }
        order
            .target_price
            .or(order.stop_loss)
            .or(order.take_profit)
            .ok_or_else(|| {
                EngineError::validation(format!("no price available for {}", order.symbol))
            })
    }

    fn default_filters(symbol: &str) -> SymbolFilters {
        SymbolFilters {
            symbol: symbol.to_string(),
            base_asset: symbol.trim_end_matches("USDT").to_string(),
            quote_asset: "USDT".to_string(),
            min_qty: 0.001,
            step_size: 0.001,
            min_notional: 20.0,
            tick_size: 0.01,
        }
    }
}

#[async_trait]
impl Exchange for SimulatorExchange {
    async fn execute(&self, order: &TradeOrder) -> Result<ExecutionResult> {
        let mut state = self.state.lock();

        if let Some(message) = state.fail_next.take() {
            return Err(EngineError::TransientExchange(message));
        }

        if order.amount <= 0.0 {
            return Err(EngineError::validation("order amount must be positive"));
        }

        state.order_counter += 1;
        let order_id = format!("sim-{}-{}", state.order_counter, order.order_type.as_str());
        let reference = Self::reference_price(&state, order)?;

        // Resting order types sit on the book until filled or cancelled
        if matches!(
            order.order_type,
            OrderType::Stop
                | OrderType::StopLimit
                | OrderType::TakeProfit
                | OrderType::TakeProfitLimit
        ) {
            let resting_price = order
                .stop_loss
                .or(order.take_profit)
                .or(order.target_price);
            state
                .open_orders
                .entry(order.symbol.to_string())
                .or_default()
                .push(OpenOrder {
                    order_id: order_id.clone(),
                    symbol: order.symbol.clone(),
                    status: "NEW".to_string(),
                    side: Some(order.side.as_str().to_uppercase()),
                    order_type: Some(order.order_type.as_str().to_string()),
                    price: resting_price,
                    quantity: Some(order.amount),
                });
            state.order_details.insert(
                order_id.clone(),
                OrderDetails {
                    order_id: order_id.clone(),
                    symbol: order.symbol.clone(),
                    status: "NEW".to_string(),
                    avg_price: None,
                    executed_qty: Some(0.0),
                    commission: None,
                },
            );

            debug!(order_id, symbol = %order.symbol, "simulated resting order placed");
            return Ok(ExecutionResult {
                order_id,
                status: OrderStatus::New,
                symbol: order.symbol.clone(),
                amount: order.amount,
                fill_price: resting_price,
                fills: Vec::new(),
                commission: 0.0,
                commission_asset: None,
                trade_ids: Vec::new(),
                timestamp: Utc::now(),
                simulated: true,
            });
        }

        // Market and limit orders fill immediately with slippage
        let fill_price = match order.side {
            crate::types::Side::Buy => reference * (1.0 + self.slippage),
            crate::types::Side::Sell => reference * (1.0 - self.slippage),
        };
        let commission = order.amount * fill_price * self.fee_rate;

        state.order_details.insert(
            order_id.clone(),
            OrderDetails {
                order_id: order_id.clone(),
                symbol: order.symbol.clone(),
                status: "FILLED".to_string(),
                avg_price: Some(fill_price),
                executed_qty: Some(order.amount),
                commission: Some(commission),
            },
        );

        info!(
            order_id,
            symbol = %order.symbol,
            side = order.side.as_str(),
            amount = order.amount,
            fill_price,
            "simulated fill"
        );

        Ok(ExecutionResult {
            order_id: order_id.clone(),
            status: OrderStatus::Filled,
            symbol: order.symbol.clone(),
            amount: order.amount,
            fill_price: Some(fill_price),
            fills: vec![Fill {
                price: fill_price,
                quantity: order.amount,
                commission,
                commission_asset: Some("USDT".to_string()),
                trade_id: Some(format!("trade-{}", state.order_counter)),
            }],
            commission,
            commission_asset: Some("USDT".to_string()),
            trade_ids: vec![format!("trade-{}", state.order_counter)],
            timestamp: Utc::now(),
            simulated: true,
        })
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(orders) = state.open_orders.get_mut(symbol.as_str()) {
            orders.retain(|o| o.order_id != order_id);
        }
        state.cancelled.push(order_id.to_string());
        if let Some(details) = state.order_details.get_mut(order_id) {
            details.status = "CANCELED".to_string();
        }
        Ok(())
    }

    async fn get_order_status(&self, symbol: &Symbol, order_id: &str) -> Result<OrderDetails> {
        let state = self.state.lock();
        Ok(state
            .order_details
            .get(order_id)
            .cloned()
            .unwrap_or_else(|| OrderDetails {
                order_id: order_id.to_string(),
                symbol: symbol.clone(),
                status: "UNKNOWN".to_string(),
                avg_price: None,
                executed_qty: None,
                commission: None,
            }))
    }

    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<OpenOrder>> {
        let state = self.state.lock();
        Ok(state
            .open_orders
            .get(symbol.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn get_symbol_price(&self, symbol: &Symbol) -> Result<f64> {
        let state = self.state.lock();
        state
            .prices
            .get(symbol.as_str())
            .copied()
            .ok_or_else(|| EngineError::validation(format!("no price set for {symbol}")))
    }

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolFilters> {
        let state = self.state.lock();
        Ok(state
            .filters
            .get(symbol.as_str())
            .cloned()
            .unwrap_or_else(|| Self::default_filters(symbol.as_str())))
    }

    async fn get_account_info(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "simulated": true,
            "can_trade": true,
            "assets": [],
        }))
    }

    async fn get_position_info(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!([]))
    }

    async fn verify_hedge_mode(&self) -> Result<bool> {
        Ok(self.hedge_mode)
    }
}
