//! Signal dispatch pipeline
//!
//! Turns each accepted signal into at most one executed order plus an
//! optional bracket. Deduplication is layered: an advisory in-process
//! fingerprint cache in front, and the store-backed fingerprint lock with
//! a re-check inside as the authoritative guard across replicas.
//!
//! The dispatcher always returns a structured outcome. Nothing thrown by
//! the exchange, the store, or the managers escapes to the consumer; in an
//! at-least-once delivery world an escaped error would lose the message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::error::{EngineError, Result};
use crate::exchange::Exchange;
use crate::locks::DistributedLockManager;
use crate::oco::{OcoManager, OcoRequest};
use crate::orders::OrderManager;
use crate::positions::PositionManager;
use crate::risk_config::RiskConfigService;
use crate::types::{
    DispatchOutcome, ExecutionResult, Signal, SignalAction, TradeOrder,
};

/// Advisory in-process deduplication of signal fingerprints.
///
/// The cache only short-circuits the obvious repeats; the distributed lock
/// plus the re-check inside it remain the authoritative dedup.
pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl IdempotencyCache {
    pub fn new(window: Duration) -> Self {
        IdempotencyCache {
            entries: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Whether the fingerprint was recorded within the window
    pub fn seen(&self, fingerprint: &str) -> bool {
        let mut entries = self.entries.lock();
        let window = self.window;
        entries.retain(|_, at| at.elapsed() < window);
        entries.contains_key(fingerprint)
    }

    pub fn record(&self, fingerprint: &str) {
        self.entries
            .lock()
            .insert(fingerprint.to_string(), Instant::now());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

enum LockedOutcome {
    Duplicate,
    Executed(Box<(TradeOrder, ExecutionResult)>),
}

pub struct Dispatcher {
    exchange: Arc<dyn Exchange>,
    positions: Arc<PositionManager>,
    oco: Arc<OcoManager>,
    locks: Arc<DistributedLockManager>,
    orders: Arc<OrderManager>,
    risk_config: Arc<RiskConfigService>,
    audit: Arc<AuditLog>,
    idempotency: IdempotencyCache,
    exchange_label: String,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<dyn Exchange>,
        positions: Arc<PositionManager>,
        oco: Arc<OcoManager>,
        locks: Arc<DistributedLockManager>,
        orders: Arc<OrderManager>,
        risk_config: Arc<RiskConfigService>,
        audit: Arc<AuditLog>,
        idempotency_window: Duration,
        exchange_label: impl Into<String>,
    ) -> Self {
        Dispatcher {
            exchange,
            positions,
            oco,
            locks,
            orders,
            risk_config,
            audit,
            idempotency: IdempotencyCache::new(idempotency_window),
            exchange_label: exchange_label.into(),
        }
    }

    pub fn order_manager(&self) -> &Arc<OrderManager> {
        &self.orders
    }

    /// Process one signal end to end. Never returns an error: every failure
    /// mode maps onto a structured outcome.
    pub async fn dispatch(&self, signal: &Signal) -> DispatchOutcome {
        let start = Instant::now();
        let signal_json = serde_json::to_value(signal).unwrap_or_default();
        self.audit.log_signal(&signal_json, "received").await;

        if signal.action == SignalAction::Hold {
            info!(strategy_id = signal.strategy_id, "hold signal, no action");
            self.audit.log_signal(&signal_json, "hold_skipped").await;
            return DispatchOutcome::hold();
        }

        let fingerprint = signal.fingerprint();

        if self.idempotency.seen(&fingerprint) {
            info!(fingerprint, "duplicate signal suppressed by local cache");
            return Self::finish(start, DispatchOutcome::duplicate(&fingerprint, "duplicate"));
        }

        let lock_name = format!("signal_{fingerprint}");
        let locked = self
            .locks
            .execute_with_lock(&lock_name, || self.process_locked(signal, &fingerprint))
            .await;

        let outcome = match locked {
            Ok(LockedOutcome::Duplicate) => {
                DispatchOutcome::duplicate(&fingerprint, "duplicate")
            }
            Ok(LockedOutcome::Executed(boxed)) => {
                let (order, execution) = *boxed;
                self.idempotency.record(&fingerprint);
                counter!(
                    crate::metrics::TRADES_TOTAL, 1,
                    "status" => "executed",
                    "type" => order.order_type.as_str()
                );
                self.audit
                    .log_order(
                        &serde_json::to_value(&order).unwrap_or_default(),
                        &serde_json::to_value(&execution).unwrap_or_default(),
                        "executed",
                    )
                    .await;
                DispatchOutcome::executed(&fingerprint, execution)
            }
            Err(EngineError::Contention(_)) => {
                info!(fingerprint, "another replica owns this signal");
                DispatchOutcome::duplicate(&fingerprint, "pod_contention")
            }
            Err(EngineError::Risk { reason }) => {
                counter!(
                    crate::metrics::RISK_REJECTIONS_TOTAL, 1,
                    "reason" => reason.clone(),
                    "symbol" => signal.symbol.to_string(),
                    "exchange" => self.exchange_label.clone()
                );
                warn!(fingerprint, reason, "signal rejected by risk limits");
                self.audit.log_signal(&signal_json, "rejected").await;
                DispatchOutcome::rejected(&fingerprint, &reason)
            }
            Err(e) => {
                let error_type = match &e {
                    EngineError::Validation(_) => "validation",
                    EngineError::Store(_) => "store",
                    _ => "execution",
                };
                counter!(crate::metrics::ERRORS_TOTAL, 1, "type" => error_type);
                error!(fingerprint, "dispatch failed: {e}");
                self.audit
                    .log_error(&e.to_string(), json!({"signal": signal_json}))
                    .await;
                DispatchOutcome::error(e.to_string())
            }
        };

        Self::finish(start, outcome)
    }

    fn finish(start: Instant, outcome: DispatchOutcome) -> DispatchOutcome {
        histogram!(
            crate::metrics::LATENCY_SECONDS,
            start.elapsed().as_secs_f64()
        );
        outcome
    }

    /// The body that runs while holding the fingerprint lock
    async fn process_locked(
        &self,
        signal: &Signal,
        fingerprint: &str,
    ) -> Result<LockedOutcome> {
        // Another replica may have processed this signal between our cache
        // check and the lock grant
        if self.idempotency.seen(fingerprint) {
            return Ok(LockedOutcome::Duplicate);
        }

        let order = self.signal_to_order(signal).await?;

        self.positions.check_position_limits(&order).await?;
        self.positions.check_daily_loss_limits().await?;

        let execution = self.exchange.execute(&order).await?;

        self.positions.update(&order, &execution).await?;
        self.positions.create_position_record(&order, &execution).await?;
        self.orders.track(&order, &execution);

        self.place_bracket(&order, &execution).await;

        info!(
            fingerprint,
            symbol = %order.symbol,
            side = order.side.as_str(),
            amount = order.amount,
            order_id = execution.order_id,
            "signal executed"
        );

        Ok(LockedOutcome::Executed(Box::new((order, execution))))
    }

    /// Place the SL/TP bracket when the order carries both prices. A
    /// placement failure never un-executes the trade: the position stays
    /// tracked so an operator can close it manually.
    async fn place_bracket(&self, order: &TradeOrder, execution: &ExecutionResult) {
        let (Some(stop_loss), Some(take_profit)) = (order.stop_loss, order.take_profit) else {
            return;
        };

        let entry_price = execution
            .effective_price()
            .or(order.target_price)
            .unwrap_or(0.0);
        let quantity = if execution.amount > 0.0 {
            execution.amount
        } else {
            order.amount
        };

        let request = OcoRequest {
            position_id: order.position_id.to_string(),
            strategy_position_id: format!("{}:{}", order.strategy_id, order.position_id),
            symbol: order.symbol.clone(),
            position_side: order.position_side,
            quantity,
            stop_loss_price: stop_loss,
            take_profit_price: take_profit,
            entry_price,
        };

        match self.oco.place_oco_orders(request).await {
            Ok(placement) => {
                if let Err(e) = self
                    .positions
                    .update_position_risk_orders(
                        &order.symbol,
                        order.position_side,
                        &order.position_id.to_string(),
                        Some(&placement.sl_order_id),
                        Some(&placement.tp_order_id),
                    )
                    .await
                {
                    warn!(position_id = %order.position_id, "linking bracket ids failed: {e}");
                }
            }
            Err(e) => {
                // Operator alert path: the order executed but is unguarded
                error!(
                    position_id = %order.position_id,
                    symbol = %order.symbol,
                    "bracket placement failed after fill: {e}"
                );
                counter!(crate::metrics::ERRORS_TOTAL, 1, "type" => "oco_placement");
                self.audit
                    .log_error(
                        &format!("bracket placement failed: {e}"),
                        json!({"position_id": order.position_id.to_string()}),
                    )
                    .await;
            }
        }
    }

    /// Convert a signal into a trade order, filling gaps from the scoped
    /// trading parameters and the venue's minimum-order constraints.
    async fn signal_to_order(&self, signal: &Signal) -> Result<TradeOrder> {
        if signal.action == SignalAction::Hold {
            return Err(EngineError::validation("hold signals carry no order"));
        }
        if signal.current_price <= 0.0 {
            return Err(EngineError::validation("current_price must be positive"));
        }

        let position_side = signal.position_side();
        let side = position_side.opening_side();
        let params = self
            .risk_config
            .get_params(&signal.symbol, Some(position_side))
            .await?;

        let amount = match signal.quantity {
            Some(q) if q > 0.0 => q,
            _ => {
                let filters = self.exchange.get_symbol_info(&signal.symbol).await?;
                filters.calculate_min_order_amount(Some(signal.current_price))
            }
        };

        let target_price = if signal.price > 0.0 {
            signal.price
        } else {
            signal.current_price
        };

        let stop_loss = signal.stop_loss.or_else(|| {
            (params.stop_loss_pct > 0.0).then(|| match side {
                crate::types::Side::Buy => signal.current_price * (1.0 - params.stop_loss_pct),
                crate::types::Side::Sell => signal.current_price * (1.0 + params.stop_loss_pct),
            })
        });
        let take_profit = signal.take_profit.or_else(|| {
            (params.take_profit_pct > 0.0).then(|| match side {
                crate::types::Side::Buy => signal.current_price * (1.0 + params.take_profit_pct),
                crate::types::Side::Sell => signal.current_price * (1.0 - params.take_profit_pct),
            })
        });

        Ok(TradeOrder {
            order_id: Uuid::new_v4(),
            position_id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            side,
            position_side,
            order_type: signal.order_type,
            amount,
            target_price: Some(target_price),
            stop_loss,
            take_profit,
            time_in_force: signal.time_in_force,
            reduce_only: false,
            strategy_id: signal.strategy_id.clone(),
            signal_id: signal.signal_id.clone(),
            metadata: signal.metadata.clone(),
        })
    }

    /// Lower-level execution path used by the admin surface: risk checks,
    /// execution, and tracking without fingerprint handling.
    pub async fn execute_order(&self, order: &TradeOrder) -> Result<ExecutionResult> {
        self.positions.check_position_limits(order).await?;
        self.positions.check_daily_loss_limits().await?;

        let execution = self.exchange.execute(order).await?;

        self.positions.update(order, &execution).await?;
        self.orders.track(order, &execution);

        counter!(
            crate::metrics::TRADES_TOTAL, 1,
            "status" => "executed",
            "type" => order.order_type.as_str()
        );
        self.audit
            .log_order(
                &serde_json::to_value(order).unwrap_or_default(),
                &serde_json::to_value(&execution).unwrap_or_default(),
                "executed",
            )
            .await;
        Ok(execution)
    }
}
