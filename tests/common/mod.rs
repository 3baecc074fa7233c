//! Shared fixtures for the integration suites
//!
//! Builds an engine replica around the simulated exchange and an in-memory
//! store. Multi-replica tests share one store (and one exchange) across
//! several replicas, mirroring the deployment topology.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;

use tradeflow::audit::AuditLog;
use tradeflow::config::{LockConfig, RiskLimitsConfig};
use tradeflow::dispatcher::Dispatcher;
use tradeflow::error::Result;
use tradeflow::exchange::{Exchange, OpenOrder, OrderDetails, SimulatorExchange, SymbolFilters};
use tradeflow::locks::DistributedLockManager;
use tradeflow::oco::OcoManager;
use tradeflow::orders::OrderManager;
use tradeflow::positions::{PositionCloser, PositionManager};
use tradeflow::risk_config::RiskConfigService;
use tradeflow::store::{DocumentStore, SqliteStore};
use tradeflow::types::{
    ExecutionResult, OrderType, Signal, SignalAction, Symbol, TimeInForce, TradeOrder,
};

pub const OCO_POLL: Duration = Duration::from_millis(25);

pub struct Replica {
    pub store: Arc<SqliteStore>,
    pub exchange: Arc<dyn Exchange>,
    pub simulator: Arc<SimulatorExchange>,
    pub positions: Arc<PositionManager>,
    pub oco: Arc<OcoManager>,
    pub locks: Arc<DistributedLockManager>,
    pub orders: Arc<OrderManager>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn replica(pod_id: &str) -> Replica {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let simulator = Arc::new(SimulatorExchange::frictionless());
    let exchange: Arc<dyn Exchange> = Arc::clone(&simulator) as Arc<dyn Exchange>;
    replica_on(store, simulator, exchange, pod_id)
}

/// Build a replica on shared infrastructure, optionally wrapping the
/// exchange (e.g. to slow it down for interleaving tests)
pub fn replica_on(
    store: Arc<SqliteStore>,
    simulator: Arc<SimulatorExchange>,
    exchange: Arc<dyn Exchange>,
    pod_id: &str,
) -> Replica {
    let doc_store: Arc<dyn DocumentStore> = Arc::clone(&store) as Arc<dyn DocumentStore>;
    let positions = Arc::new(PositionManager::new(
        Arc::clone(&doc_store),
        RiskLimitsConfig::default(),
    ));
    let oco = Arc::new(OcoManager::new(
        Arc::clone(&exchange),
        Arc::clone(&positions) as Arc<dyn PositionCloser>,
        OCO_POLL,
    ));
    let locks = Arc::new(DistributedLockManager::new(
        Arc::clone(&doc_store),
        pod_id,
        &LockConfig::default(),
    ));
    let orders = Arc::new(OrderManager::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&exchange),
        Arc::clone(&positions),
        Arc::clone(&oco),
        Arc::clone(&locks),
        Arc::clone(&orders),
        Arc::new(RiskConfigService::new(Arc::clone(&doc_store))),
        Arc::new(AuditLog::new(doc_store)),
        Duration::from_secs(300),
        "simulator",
    ));

    Replica {
        store,
        exchange,
        simulator,
        positions,
        oco,
        locks,
        orders,
        dispatcher,
    }
}

/// An exchange wrapper that delays order execution so two replicas are
/// guaranteed to overlap inside the dispatch pipeline
pub struct SlowExchange {
    inner: Arc<SimulatorExchange>,
    execute_delay: Duration,
}

impl SlowExchange {
    pub fn new(inner: Arc<SimulatorExchange>, execute_delay: Duration) -> Arc<Self> {
        Arc::new(SlowExchange {
            inner,
            execute_delay,
        })
    }
}

#[async_trait::async_trait]
impl Exchange for SlowExchange {
    async fn execute(&self, order: &TradeOrder) -> Result<ExecutionResult> {
        sleep(self.execute_delay).await;
        self.inner.execute(order).await
    }
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<()> {
        self.inner.cancel_order(symbol, order_id).await
    }
    async fn get_order_status(&self, symbol: &Symbol, order_id: &str) -> Result<OrderDetails> {
        self.inner.get_order_status(symbol, order_id).await
    }
    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<OpenOrder>> {
        self.inner.get_open_orders(symbol).await
    }
    async fn get_symbol_price(&self, symbol: &Symbol) -> Result<f64> {
        self.inner.get_symbol_price(symbol).await
    }
    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolFilters> {
        self.inner.get_symbol_info(symbol).await
    }
    async fn get_account_info(&self) -> Result<serde_json::Value> {
        self.inner.get_account_info().await
    }
    async fn get_position_info(&self) -> Result<serde_json::Value> {
        self.inner.get_position_info().await
    }
    async fn verify_hedge_mode(&self) -> Result<bool> {
        self.inner.verify_hedge_mode().await
    }
}

pub fn buy_signal(signal_id: &str, symbol: &str, quantity: f64) -> Signal {
    Signal {
        strategy_id: "s1".to_string(),
        symbol: Symbol::new(symbol),
        action: SignalAction::Buy,
        confidence: 1.0,
        price: 50_000.0,
        quantity: Some(quantity),
        current_price: 50_000.0,
        stop_loss: Some(48_000.0),
        take_profit: Some(52_000.0),
        timeframe: "15m".to_string(),
        timestamp: Utc::now(),
        signal_id: Some(signal_id.to_string()),
        order_type: OrderType::Market,
        time_in_force: TimeInForce::Gtc,
        position_size_pct: None,
        metadata: serde_json::json!({}),
        trace_context: None,
        trace_headers: None,
    }
}
