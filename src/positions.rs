//! Position tracking and portfolio risk limits
//!
//! The authoritative position state lives in the shared document store so
//! every replica sees the same book. The in-memory map is a cache: it is
//! refreshed from the store before every risk check and reconciled by a
//! periodic background sync. Writes go memory-then-store inside the
//! dispatcher's fingerprint lock.
//!
//! Hedge mode keys positions by `(symbol, position_side)`, so LONG and
//! SHORT exposure on the same symbol are independent entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RiskLimitsConfig;
use crate::error::{EngineError, Result};
use crate::store::{collections, DocumentStore, Filter};
use crate::types::{
    position_key, CloseReason, ExecutionResult, PositionSide, Symbol, TradeOrder,
};

/// Collection holding one durable record per opened position id
const POSITION_RECORDS: &str = "position_records";

/// Quantities below this are treated as fully closed
const QTY_EPSILON: f64 = 1e-12;

/// Interval between background reconciliations with the store
const SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Net exposure on `(symbol, position_side)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub position_side: PositionSide,
    pub quantity: f64,
    pub avg_price: f64,
    pub total_cost: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub entry_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub status: PositionStatus,
    #[serde(default)]
    pub entry_order_id: Option<String>,
    #[serde(default)]
    pub stop_loss_order_id: Option<String>,
    #[serde(default)]
    pub take_profit_order_id: Option<String>,
    #[serde(default)]
    pub commission_total: f64,
}

impl Position {
    fn open(symbol: Symbol, position_side: PositionSide) -> Self {
        let now = Utc::now();
        Position {
            symbol,
            position_side,
            quantity: 0.0,
            avg_price: 0.0,
            total_cost: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            entry_time: now,
            last_update: now,
            status: PositionStatus::Open,
            entry_order_id: None,
            stop_loss_order_id: None,
            take_profit_order_id: None,
            commission_total: 0.0,
        }
    }

    pub fn value(&self) -> f64 {
        self.quantity * self.avg_price
    }

    /// Unrealized P&L at a mark price, sign-flipped for shorts
    pub fn unrealized_at(&self, mark_price: f64) -> f64 {
        match self.position_side {
            PositionSide::Long => (mark_price - self.avg_price) * self.quantity,
            PositionSide::Short => (self.avg_price - mark_price) * self.quantity,
        }
    }

    /// Realized P&L from closing `quantity` at `exit_price`
    pub fn realized_on_close(&self, exit_price: f64, quantity: f64) -> f64 {
        let closed = quantity.min(self.quantity);
        match self.position_side {
            PositionSide::Long => (exit_price - self.avg_price) * closed,
            PositionSide::Short => (self.avg_price - exit_price) * closed,
        }
    }
}

/// Parameters of a bracket-driven close handed over by the OCO monitor
#[derive(Debug, Clone)]
pub struct OcoClose {
    pub position_id: String,
    pub symbol: Symbol,
    pub position_side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub close_reason: CloseReason,
    pub filled_order_id: String,
    pub exit_commission: f64,
}

/// Seam the OCO monitor uses to close positions without owning the
/// position manager
#[async_trait]
pub trait PositionCloser: Send + Sync {
    async fn close_by_oco(&self, close: OcoClose) -> Result<f64>;
}

/// Portfolio snapshot for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    pub total_positions: usize,
    pub total_exposure_pct: f64,
    pub daily_pnl: f64,
    pub total_unrealized_pnl: f64,
    pub portfolio_value: f64,
    pub max_position_size_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_portfolio_exposure_pct: f64,
    pub last_sync_time: Option<DateTime<Utc>>,
}

pub struct PositionManager {
    store: Arc<dyn DocumentStore>,
    positions: Mutex<HashMap<String, Position>>,
    daily_pnl: Mutex<f64>,
    limits: Mutex<RiskLimitsConfig>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl PositionManager {
    pub fn new(store: Arc<dyn DocumentStore>, limits: RiskLimitsConfig) -> Self {
        PositionManager {
            store,
            positions: Mutex::new(HashMap::new()),
            daily_pnl: Mutex::new(0.0),
            limits: Mutex::new(limits),
            last_sync: Mutex::new(None),
            sync_task: Mutex::new(None),
        }
    }

    /// Load state from the store and start the periodic reconciliation task
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.refresh_from_store().await?;
        self.refresh_daily_pnl().await?;

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                sleep(SYNC_INTERVAL).await;
                if let Err(e) = manager.refresh_from_store().await {
                    error!("position sync failed: {e}");
                }
                if let Err(e) = manager.refresh_daily_pnl().await {
                    error!("daily pnl sync failed: {e}");
                }
            }
        });
        *self.sync_task.lock() = Some(handle);

        let count = self.positions.lock().len();
        info!(positions = count, "position manager started");
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(handle) = self.sync_task.lock().take() {
            handle.abort();
        }
    }

    /// Apply an executed order to the book and persist the new state
    pub async fn update(&self, order: &TradeOrder, result: &ExecutionResult) -> Result<()> {
        let fill_price = result
            .effective_price()
            .or(order.target_price)
            .ok_or_else(|| EngineError::invariant("fill without any usable price"))?;
        let fill_qty = if result.amount > 0.0 {
            result.amount
        } else {
            order.amount
        };

        let key = position_key(&order.symbol, order.position_side);
        let opening = order.side == order.position_side.opening_side();

        let (snapshot, realized, fully_closed) = {
            let mut positions = self.positions.lock();
            let position = positions
                .entry(key.clone())
                .or_insert_with(|| Position::open(order.symbol.clone(), order.position_side));

            let mut realized = 0.0;
            let mut fully_closed = false;

            if opening {
                let new_quantity = position.quantity + fill_qty;
                position.avg_price = (position.quantity * position.avg_price
                    + fill_qty * fill_price)
                    / new_quantity;
                position.quantity = new_quantity;
                position.total_cost += fill_qty * fill_price;
            } else {
                realized = position.realized_on_close(fill_price, fill_qty);
                position.realized_pnl += realized;
                position.quantity -= fill_qty.min(position.quantity);
                if position.quantity <= QTY_EPSILON {
                    position.quantity = 0.0;
                    position.status = PositionStatus::Closed;
                    fully_closed = true;
                }
            }

            position.commission_total += result.commission;
            position.last_update = Utc::now();
            position.unrealized_pnl = position.unrealized_at(fill_price);

            let snapshot = position.clone();
            if fully_closed {
                positions.remove(&key);
            }
            (snapshot, realized, fully_closed)
        };

        debug!(
            key,
            quantity = snapshot.quantity,
            avg_price = snapshot.avg_price,
            realized,
            "position updated"
        );

        self.persist_position(&snapshot).await?;
        if realized != 0.0 {
            self.add_realized_pnl(realized).await?;
        }
        if fully_closed {
            counter!(
                crate::metrics::POSITIONS_CLOSED_TOTAL, 1,
                "symbol" => snapshot.symbol.to_string(),
                "side" => snapshot.position_side.as_str(),
                "close_reason" => CloseReason::Manual.as_str()
            );
            info!(key, realized_pnl = snapshot.realized_pnl, "position closed");
        }
        Ok(())
    }

    /// Durable record of an opening fill, keyed by position id
    pub async fn create_position_record(
        &self,
        order: &TradeOrder,
        result: &ExecutionResult,
    ) -> Result<()> {
        let entry_price = result.effective_price().or(order.target_price);
        let filled_qty = if result.amount > 0.0 {
            result.amount
        } else {
            order.amount
        };
        let doc = json!({
            "position_id": order.position_id.to_string(),
            "strategy_id": order.strategy_id,
            "symbol": order.symbol.as_str(),
            "position_side": order.position_side.as_str(),
            "quantity": filled_qty,
            "entry_price": entry_price,
            "entry_time": result.timestamp.to_rfc3339(),
            "entry_order_id": result.order_id,
            "entry_trade_ids": serde_json::to_string(&result.trade_ids)?,
            "entry_commission": result.commission,
            "status": "open",
            "metadata": serde_json::to_string(&order.metadata)?,
        });
        self.store
            .upsert(
                POSITION_RECORDS,
                &Filter::new().eq("position_id", order.position_id.to_string()),
                &doc,
            )
            .await?;

        counter!(
            crate::metrics::POSITIONS_OPENED_TOTAL, 1,
            "symbol" => order.symbol.to_string(),
            "side" => order.position_side.as_str()
        );
        Ok(())
    }

    /// Compute and persist the exit of a tracked position record
    pub async fn close_position_record(
        &self,
        position_id: &str,
        exit_price: f64,
        exit_commission: f64,
        close_reason: CloseReason,
        exit_order_id: Option<&str>,
    ) -> Result<f64> {
        let filter = Filter::new().eq("position_id", position_id);
        let record = self
            .store
            .find_one(POSITION_RECORDS, &filter)
            .await?
            .ok_or_else(|| {
                EngineError::invariant(format!("no position record for {position_id}"))
            })?;

        let entry_price = record
            .get("entry_price")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let quantity = record
            .get("quantity")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let entry_commission = record
            .get("entry_commission")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let side = match record.get("position_side").and_then(|v| v.as_str()) {
            Some("SHORT") => PositionSide::Short,
            _ => PositionSide::Long,
        };

        let pnl = match side {
            PositionSide::Long => (exit_price - entry_price) * quantity,
            PositionSide::Short => (entry_price - exit_price) * quantity,
        };
        let net_pnl = pnl - entry_commission - exit_commission;

        self.store
            .upsert(
                POSITION_RECORDS,
                &filter,
                &json!({
                    "status": "closed",
                    "exit_price": exit_price,
                    "exit_time": Utc::now().to_rfc3339(),
                    "exit_order_id": exit_order_id,
                    "exit_commission": exit_commission,
                    "close_reason": close_reason.as_str(),
                    "pnl": pnl,
                    "net_pnl": net_pnl,
                }),
            )
            .await?;

        info!(
            position_id,
            exit_price,
            pnl,
            net_pnl,
            close_reason = close_reason.as_str(),
            "position record closed"
        );
        Ok(pnl)
    }

    /// Link bracket order ids to the position row
    pub async fn update_position_risk_orders(
        &self,
        symbol: &Symbol,
        position_side: PositionSide,
        position_id: &str,
        sl_order_id: Option<&str>,
        tp_order_id: Option<&str>,
    ) -> Result<()> {
        let key = position_key(symbol, position_side);
        let snapshot = {
            let mut positions = self.positions.lock();
            if let Some(position) = positions.get_mut(&key) {
                if sl_order_id.is_some() {
                    position.stop_loss_order_id = sl_order_id.map(String::from);
                }
                if tp_order_id.is_some() {
                    position.take_profit_order_id = tp_order_id.map(String::from);
                }
                Some(position.clone())
            } else {
                None
            }
        };

        if let Some(snapshot) = snapshot {
            self.persist_position(&snapshot).await?;
        }

        self.store
            .upsert(
                POSITION_RECORDS,
                &Filter::new().eq("position_id", position_id),
                &json!({
                    "stop_loss_order_id": sl_order_id,
                    "take_profit_order_id": tp_order_id,
                }),
            )
            .await?;
        Ok(())
    }

    /// Position-size and exposure checks, run against a freshly refreshed
    /// view. Failures carry the reason used as a metric label.
    pub async fn check_position_limits(&self, order: &TradeOrder) -> Result<()> {
        let limits = self.limits.lock().clone();
        if !limits.enabled {
            return Ok(());
        }

        self.refresh_from_store().await?;

        let key = position_key(&order.symbol, order.position_side);
        let (existing_value, total_exposure_value) = {
            let positions = self.positions.lock();
            let existing = positions.get(&key).map(|p| p.value()).unwrap_or(0.0);
            let total: f64 = positions.values().map(|p| p.value()).sum();
            (existing, total)
        };

        let reference_price = order.target_price.unwrap_or(0.0);
        let order_value = order.amount * reference_price;

        if (existing_value + order_value) / limits.portfolio_value > limits.max_position_size_pct {
            warn!(
                symbol = %order.symbol,
                order_value,
                existing_value,
                limit_pct = limits.max_position_size_pct,
                "position size limit exceeded"
            );
            return Err(EngineError::risk("position_size_limits_exceeded"));
        }

        let exposure_after =
            (total_exposure_value + order_value) / limits.portfolio_value;
        if exposure_after > limits.max_portfolio_exposure_pct {
            warn!(
                exposure_after,
                limit_pct = limits.max_portfolio_exposure_pct,
                "portfolio exposure limit exceeded"
            );
            return Err(EngineError::risk("portfolio_exposure_limits_exceeded"));
        }

        Ok(())
    }

    /// Daily loss check against the store-refreshed running P&L
    pub async fn check_daily_loss_limits(&self) -> Result<()> {
        let limits = self.limits.lock().clone();
        if !limits.enabled {
            return Ok(());
        }

        self.refresh_daily_pnl().await?;

        let daily_pnl = *self.daily_pnl.lock();
        let max_daily_loss = limits.portfolio_value * limits.max_daily_loss_pct;
        if daily_pnl < -max_daily_loss {
            warn!(daily_pnl, max_daily_loss, "daily loss limit exceeded");
            return Err(EngineError::risk("daily_loss_limits_exceeded"));
        }
        Ok(())
    }

    pub fn get_positions(&self) -> HashMap<String, Position> {
        self.positions.lock().clone()
    }

    pub fn get_daily_pnl(&self) -> f64 {
        *self.daily_pnl.lock()
    }

    pub fn get_portfolio_summary(&self) -> PortfolioSummary {
        let limits = self.limits.lock().clone();
        let positions = self.positions.lock();
        let total_value: f64 = positions.values().map(|p| p.value()).sum();
        let total_unrealized: f64 = positions.values().map(|p| p.unrealized_pnl).sum();

        PortfolioSummary {
            total_positions: positions.len(),
            total_exposure_pct: total_value / limits.portfolio_value,
            daily_pnl: *self.daily_pnl.lock(),
            total_unrealized_pnl: total_unrealized,
            portfolio_value: limits.portfolio_value,
            max_position_size_pct: limits.max_position_size_pct,
            max_daily_loss_pct: limits.max_daily_loss_pct,
            max_portfolio_exposure_pct: limits.max_portfolio_exposure_pct,
            last_sync_time: *self.last_sync.lock(),
        }
    }

    pub fn set_portfolio_value(&self, value: f64) {
        self.limits.lock().portfolio_value = value;
        info!(portfolio_value = value, "portfolio value updated");
    }

    pub fn set_risk_limits(&self, limits: RiskLimitsConfig) {
        *self.limits.lock() = limits;
    }

    /// Re-read open positions from the store, replacing the cache
    pub async fn refresh_from_store(&self) -> Result<()> {
        let docs = self
            .store
            .find(
                collections::POSITIONS,
                &Filter::new().eq("status", "open"),
            )
            .await?;

        let mut refreshed = HashMap::new();
        for doc in docs {
            match serde_json::from_value::<Position>(doc.clone()) {
                Ok(position) => {
                    refreshed.insert(
                        position_key(&position.symbol, position.position_side),
                        position,
                    );
                }
                Err(e) => warn!("skipping malformed position row: {e}"),
            }
        }

        *self.positions.lock() = refreshed;
        *self.last_sync.lock() = Some(Utc::now());
        Ok(())
    }

    async fn refresh_daily_pnl(&self) -> Result<()> {
        let today = Utc::now().date_naive().to_string();
        let doc = self
            .store
            .find_one(collections::DAILY_PNL, &Filter::new().eq("date", today))
            .await?;
        if let Some(doc) = doc {
            if let Some(value) = doc.get("daily_pnl").and_then(|v| v.as_f64()) {
                *self.daily_pnl.lock() = value;
            }
        }
        Ok(())
    }

    async fn add_realized_pnl(&self, realized: f64) -> Result<()> {
        let total = {
            let mut daily = self.daily_pnl.lock();
            *daily += realized;
            *daily
        };
        let today = Utc::now().date_naive().to_string();
        self.store
            .upsert(
                collections::DAILY_PNL,
                &Filter::new().eq("date", today),
                &json!({
                    "daily_pnl": total,
                    "updated_at": Utc::now().to_rfc3339(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn persist_position(&self, position: &Position) -> Result<()> {
        let doc = serde_json::to_value(position)?;
        self.store
            .upsert(
                collections::POSITIONS,
                &Filter::new()
                    .eq("symbol", position.symbol.as_str())
                    .eq("position_side", position.position_side.as_str()),
                &doc,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PositionCloser for PositionManager {
    /// Record the exit of a bracket-managed position: realized P&L, daily
    /// P&L, the per-position record, and the aggregate book.
    async fn close_by_oco(&self, close: OcoClose) -> Result<f64> {
        let realized = match close.position_side {
            PositionSide::Long => (close.exit_price - close.entry_price) * close.quantity,
            PositionSide::Short => (close.entry_price - close.exit_price) * close.quantity,
        };

        // Reduce the aggregate book
        let key = position_key(&close.symbol, close.position_side);
        let snapshot = {
            let mut positions = self.positions.lock();
            match positions.get_mut(&key) {
                Some(position) => {
                    position.realized_pnl += realized;
                    position.quantity -= close.quantity.min(position.quantity);
                    position.commission_total += close.exit_commission;
                    position.last_update = Utc::now();
                    let fully_closed = position.quantity <= QTY_EPSILON;
                    if fully_closed {
                        position.quantity = 0.0;
                        position.status = PositionStatus::Closed;
                    }
                    let snapshot = position.clone();
                    if fully_closed {
                        positions.remove(&key);
                    }
                    Some(snapshot)
                }
                None => {
                    warn!(key, "bracket close for untracked position");
                    None
                }
            }
        };

        if let Some(snapshot) = snapshot {
            self.persist_position(&snapshot).await?;
        }

        self.add_realized_pnl(realized).await?;

        if let Err(e) = self
            .close_position_record(
                &close.position_id,
                close.exit_price,
                close.exit_commission,
                close.close_reason,
                Some(&close.filled_order_id),
            )
            .await
        {
            // Keep the aggregate consistent even when the record is missing
            warn!(position_id = close.position_id, "close record failed: {e}");
        }

        counter!(
            crate::metrics::POSITIONS_CLOSED_TOTAL, 1,
            "symbol" => close.symbol.to_string(),
            "side" => close.position_side.as_str(),
            "close_reason" => close.close_reason.as_str()
        );

        info!(
            position_id = close.position_id,
            symbol = %close.symbol,
            realized,
            close_reason = close.close_reason.as_str(),
            "position closed by bracket"
        );
        Ok(realized)
    }
}
