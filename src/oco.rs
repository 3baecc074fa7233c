//! OCO bracket management
//!
//! The venue treats a stop-loss and a take-profit order as independent, so
//! the engine enforces the one-cancels-the-other contract itself: a single
//! monitor task polls open orders per symbol, detects the leg that left the
//! book, cancels the survivor, and hands the close to the position layer.
//!
//! Pairs are registered under the exchange position key
//! (`SYMBOL_POSITIONSIDE`); several strategies can contribute pairs to the
//! same exchange position, so the registry value is an ordered list. The
//! monitor never holds the registry mutex across an exchange round-trip:
//! it snapshots under the lock, talks to the venue, then re-acquires to
//! apply transitions.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::exchange::Exchange;
use crate::positions::{OcoClose, PositionCloser};
use crate::types::{
    position_key, CloseReason, OrderType, PositionSide, Symbol, TimeInForce, TradeOrder,
};

/// Bound on a single open-orders query so one slow venue call cannot stall
/// the whole monitoring tick
const MONITOR_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// How long completed and cancelled pairs stay visible in the registry for
/// late observers before they are pruned
const FINISHED_PAIR_RETENTION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcoStatus {
    Active,
    Completed,
    Cancelled,
}

/// A stop-loss/take-profit pair of reduce-only orders guarding one position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcoPair {
    pub position_id: String,
    pub strategy_position_id: String,
    pub symbol: Symbol,
    pub position_side: PositionSide,
    pub quantity: f64,
    pub sl_order_id: String,
    pub tp_order_id: String,
    pub sl_price: f64,
    pub tp_price: f64,
    pub status: OcoStatus,
    pub close_reason: Option<CloseReason>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub entry_price: f64,
}

/// Inputs to bracket placement
#[derive(Debug, Clone)]
pub struct OcoRequest {
    pub position_id: String,
    pub strategy_position_id: String,
    pub symbol: Symbol,
    pub position_side: PositionSide,
    pub quantity: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub entry_price: f64,
}

/// Order ids of a successfully placed bracket
#[derive(Debug, Clone, Serialize)]
pub struct OcoPlacement {
    pub sl_order_id: String,
    pub tp_order_id: String,
}

pub struct OcoManager {
    exchange: Arc<dyn Exchange>,
    closer: Arc<dyn PositionCloser>,
    active_pairs: Mutex<HashMap<String, Vec<OcoPair>>>,
    monitoring_active: Arc<AtomicBool>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl OcoManager {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        closer: Arc<dyn PositionCloser>,
        poll_interval: Duration,
    ) -> Self {
        OcoManager {
            exchange,
            closer,
            active_pairs: Mutex::new(HashMap::new()),
            monitoring_active: Arc::new(AtomicBool::new(false)),
            monitor_task: Mutex::new(None),
            poll_interval,
        }
    }

    pub fn monitoring_active(&self) -> bool {
        self.monitoring_active.load(Ordering::SeqCst)
    }

    /// Place the stop-loss and take-profit legs for a position. Both are
    /// reduce-only and side-opposite to the position. If the second leg
    /// fails the first is cancelled so no naked bracket half survives.
    pub async fn place_oco_orders(&self, request: OcoRequest) -> Result<OcoPlacement> {
        if request.quantity <= 0.0 {
            return Err(EngineError::validation("bracket quantity must be positive"));
        }
        if request.stop_loss_price <= 0.0 || request.take_profit_price <= 0.0 {
            return Err(EngineError::validation("bracket prices must be positive"));
        }

        let closing_side = request.position_side.closing_side();

        let sl_order = TradeOrder {
            order_id: uuid::Uuid::new_v4(),
            position_id: uuid::Uuid::new_v4(),
            symbol: request.symbol.clone(),
            side: closing_side,
            position_side: request.position_side,
            order_type: OrderType::Stop,
            amount: request.quantity,
            target_price: None,
            stop_loss: Some(request.stop_loss_price),
            take_profit: None,
            time_in_force: TimeInForce::Gtc,
            reduce_only: true,
            strategy_id: request.strategy_position_id.clone(),
            signal_id: None,
            metadata: serde_json::json!({}),
        };

        let sl_result = self.exchange.execute(&sl_order).await?;

        let tp_order = TradeOrder {
            order_id: uuid::Uuid::new_v4(),
            position_id: uuid::Uuid::new_v4(),
            order_type: OrderType::TakeProfit,
            stop_loss: None,
            take_profit: Some(request.take_profit_price),
            ..sl_order.clone()
        };

        let tp_result = match self.exchange.execute(&tp_order).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    sl_order_id = sl_result.order_id,
                    "take profit leg failed, cancelling stop loss: {e}"
                );
                if let Err(cancel_err) = self
                    .exchange
                    .cancel_order(&request.symbol, &sl_result.order_id)
                    .await
                {
                    error!(
                        sl_order_id = sl_result.order_id,
                        "failed to cancel orphaned stop loss: {cancel_err}"
                    );
                }
                return Err(e);
            }
        };

        let pair = OcoPair {
            position_id: request.position_id.clone(),
            strategy_position_id: request.strategy_position_id.clone(),
            symbol: request.symbol.clone(),
            position_side: request.position_side,
            quantity: request.quantity,
            sl_order_id: sl_result.order_id.clone(),
            tp_order_id: tp_result.order_id.clone(),
            sl_price: request.stop_loss_price,
            tp_price: request.take_profit_price,
            status: OcoStatus::Active,
            close_reason: None,
            created_at: Utc::now(),
            finished_at: None,
            entry_price: request.entry_price,
        };

        let key = position_key(&request.symbol, request.position_side);
        self.active_pairs
            .lock()
            .entry(key.clone())
            .or_default()
            .push(pair);

        info!(
            key,
            position_id = request.position_id,
            sl_order_id = sl_result.order_id,
            tp_order_id = tp_result.order_id,
            "bracket placed"
        );

        Ok(OcoPlacement {
            sl_order_id: sl_result.order_id,
            tp_order_id: tp_result.order_id,
        })
    }

    /// Cancel both legs of a pair (manual close path). Returns whether the
    /// pair was found and moved out of the active state.
    pub async fn cancel_oco_pair(
        &self,
        position_id: &str,
        symbol: &Symbol,
        position_side: PositionSide,
    ) -> Result<bool> {
        let key = position_key(symbol, position_side);
        let legs = {
            let pairs = self.active_pairs.lock();
            pairs.get(&key).and_then(|list| {
                list.iter()
                    .find(|p| p.position_id == position_id && p.status == OcoStatus::Active)
                    .map(|p| (p.sl_order_id.clone(), p.tp_order_id.clone()))
            })
        };

        let Some((sl_order_id, tp_order_id)) = legs else {
            return Ok(false);
        };

        self.exchange.cancel_order(symbol, &sl_order_id).await?;
        self.exchange.cancel_order(symbol, &tp_order_id).await?;

        let mut pairs = self.active_pairs.lock();
        if let Some(list) = pairs.get_mut(&key) {
            if let Some(pair) = list.iter_mut().find(|p| p.position_id == position_id) {
                pair.status = OcoStatus::Cancelled;
                pair.close_reason = Some(CloseReason::Manual);
                pair.finished_at = Some(Utc::now());
            }
        }

        info!(key, position_id, "bracket cancelled manually");
        Ok(true)
    }

    /// Fill-path cancellation: one leg filled, cancel the survivor. Returns
    /// whether the cancel went through and the close reason matching the
    /// filled leg.
    pub async fn cancel_other_order(
        &self,
        position_id: &str,
        filled_order_id: &str,
        symbol: &Symbol,
        position_side: PositionSide,
    ) -> Result<(bool, CloseReason)> {
        let key = position_key(symbol, position_side);
        let pair = {
            let pairs = self.active_pairs.lock();
            pairs.get(&key).and_then(|list| {
                list.iter()
                    .find(|p| p.position_id == position_id)
                    .cloned()
            })
        };

        let Some(pair) = pair else {
            return Err(EngineError::invariant(format!(
                "no bracket registered for position {position_id}"
            )));
        };

        let (other_order_id, close_reason) = if filled_order_id == pair.sl_order_id {
            (pair.tp_order_id.clone(), CloseReason::StopLoss)
        } else if filled_order_id == pair.tp_order_id {
            (pair.sl_order_id.clone(), CloseReason::TakeProfit)
        } else {
            return Err(EngineError::invariant(format!(
                "order {filled_order_id} does not belong to bracket of {position_id}"
            )));
        };

        // Cancellation is idempotent: an already-gone order reports success
        self.exchange.cancel_order(symbol, &other_order_id).await?;

        debug!(
            key,
            position_id,
            filled_order_id,
            cancelled = other_order_id,
            close_reason = close_reason.as_str(),
            "losing bracket leg cancelled"
        );
        Ok((true, close_reason))
    }

    /// Start the background monitor loop
    pub fn start_monitoring(self: &Arc<Self>) {
        if self.monitoring_active.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("bracket monitoring started");
            while manager.monitoring_active.load(Ordering::SeqCst) {
                manager.monitor_tick().await;
                sleep(manager.poll_interval).await;
            }
            info!("bracket monitoring stopped");
        });
        *self.monitor_task.lock() = Some(handle);
    }

    /// Stop the monitor loop
    pub fn stop_monitoring(&self) {
        self.monitoring_active.store(false, Ordering::SeqCst);
        if let Some(handle) = self.monitor_task.lock().take() {
            handle.abort();
        }
    }

    /// One monitoring pass: query open orders per symbol once, classify
    /// every active pair, and resolve fills and external cancellations.
    /// Venue errors are logged and swallowed so the loop survives.
    pub async fn monitor_tick(&self) {
        let snapshot: Vec<OcoPair> = {
            let mut pairs = self.active_pairs.lock();
            Self::prune_finished(&mut pairs);
            pairs
                .values()
                .flatten()
                .filter(|p| p.status == OcoStatus::Active)
                .cloned()
                .collect()
        };

        if snapshot.is_empty() {
            return;
        }

        // One open-orders query per symbol per tick
        let symbols: HashSet<Symbol> = snapshot.iter().map(|p| p.symbol.clone()).collect();
        let mut open_by_symbol: HashMap<Symbol, HashSet<String>> = HashMap::new();
        for symbol in symbols {
            match timeout(MONITOR_CALL_TIMEOUT, self.exchange.get_open_orders(&symbol)).await {
                Ok(Ok(orders)) => {
                    open_by_symbol
                        .insert(symbol, orders.into_iter().map(|o| o.order_id).collect());
                }
                Ok(Err(e)) => {
                    warn!(%symbol, "open order query failed: {e}");
                    counter!(crate::metrics::ERRORS_TOTAL, 1, "type" => "oco_monitor");
                }
                Err(_) => {
                    warn!(%symbol, "open order query timed out");
                    counter!(crate::metrics::ERRORS_TOTAL, 1, "type" => "oco_monitor");
                }
            }
        }

        for pair in snapshot {
            // Skip pairs whose symbol query failed this tick; they stay active
            let Some(open_ids) = open_by_symbol.get(&pair.symbol) else {
                continue;
            };
            let sl_open = open_ids.contains(&pair.sl_order_id);
            let tp_open = open_ids.contains(&pair.tp_order_id);

            match (sl_open, tp_open) {
                (true, true) => {}
                (false, true) => {
                    self.resolve_fill(&pair, &pair.sl_order_id, CloseReason::StopLoss)
                        .await;
                }
                (true, false) => {
                    self.resolve_fill(&pair, &pair.tp_order_id, CloseReason::TakeProfit)
                        .await;
                }
                (false, false) => {
                    warn!(
                        position_id = pair.position_id,
                        "both bracket legs gone from the book, marking cancelled"
                    );
                    self.mark_pair(&pair, OcoStatus::Cancelled, None);
                }
            }
        }
    }

    /// A leg filled: cancel the survivor, mark the pair completed with its
    /// close reason, and hand the exit to the position layer.
    async fn resolve_fill(&self, pair: &OcoPair, filled_order_id: &str, reason: CloseReason) {
        let (cancelled, close_reason) = match self
            .cancel_other_order(
                &pair.position_id,
                filled_order_id,
                &pair.symbol,
                pair.position_side,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    position_id = pair.position_id,
                    filled_order_id, "failed to cancel surviving leg: {e}"
                );
                counter!(crate::metrics::ERRORS_TOTAL, 1, "type" => "oco_cancel");
                return;
            }
        };

        // The close reason is fixed here, before the pair leaves the
        // registry, so no completion path can drop it
        self.mark_pair(pair, OcoStatus::Completed, Some(close_reason));

        let details = self
            .exchange
            .get_order_status(&pair.symbol, filled_order_id)
            .await
            .ok();
        let exit_price = details
            .as_ref()
            .and_then(|d| d.avg_price)
            .filter(|p| *p > 0.0)
            .unwrap_or(match reason {
                CloseReason::StopLoss => pair.sl_price,
                _ => pair.tp_price,
            });
        let exit_commission = details.and_then(|d| d.commission).unwrap_or(0.0);

        if let Err(e) = self
            .closer
            .close_by_oco(OcoClose {
                position_id: pair.position_id.clone(),
                symbol: pair.symbol.clone(),
                position_side: pair.position_side,
                quantity: pair.quantity,
                entry_price: pair.entry_price,
                exit_price,
                close_reason,
                filled_order_id: filled_order_id.to_string(),
                exit_commission,
            })
            .await
        {
            error!(
                position_id = pair.position_id,
                "position close after bracket fill failed: {e}"
            );
            counter!(crate::metrics::ERRORS_TOTAL, 1, "type" => "oco_close");
        }

        info!(
            position_id = pair.position_id,
            filled_order_id,
            cancelled,
            close_reason = close_reason.as_str(),
            exit_price,
            "bracket completed"
        );
    }

    fn mark_pair(&self, pair: &OcoPair, status: OcoStatus, close_reason: Option<CloseReason>) {
        let key = position_key(&pair.symbol, pair.position_side);
        let mut pairs = self.active_pairs.lock();
        if let Some(list) = pairs.get_mut(&key) {
            if let Some(entry) = list
                .iter_mut()
                .find(|p| p.position_id == pair.position_id)
            {
                entry.status = status;
                if close_reason.is_some() {
                    entry.close_reason = close_reason;
                }
                entry.finished_at = Some(Utc::now());
            }
        }
    }

    fn prune_finished(pairs: &mut HashMap<String, Vec<OcoPair>>) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(FINISHED_PAIR_RETENTION).unwrap_or_default();
        pairs.retain(|_, list| {
            list.retain(|p| {
                p.status == OcoStatus::Active
                    || p.finished_at.map(|t| t > cutoff).unwrap_or(true)
            });
            !list.is_empty()
        });
    }

    /// Snapshot of all registered pairs, keyed by exchange position key
    pub fn pairs(&self) -> HashMap<String, Vec<OcoPair>> {
        self.active_pairs.lock().clone()
    }

    /// Number of pairs still guarding live positions
    pub fn active_pair_count(&self) -> usize {
        self.active_pairs
            .lock()
            .values()
            .flatten()
            .filter(|p| p.status == OcoStatus::Active)
            .count()
    }
}
