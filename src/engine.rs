//! Engine aggregate
//!
//! All components are constructed here and threaded explicitly; nothing in
//! the crate relies on globals. The dispatcher owns the managers, the OCO
//! manager reaches back into the position layer only through the
//! [`PositionCloser`](crate::positions::PositionCloser) seam.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tracing::info;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::exchange::binance::{BinanceClientConfig, BinanceFuturesExchange};
use crate::exchange::{Exchange, SimulatorExchange};
use crate::locks::DistributedLockManager;
use crate::oco::OcoManager;
use crate::orders::OrderManager;
use crate::positions::{PositionCloser, PositionManager};
use crate::risk_config::RiskConfigService;
use crate::store::{DocumentStore, SqliteStore};

pub struct Engine {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub exchange: Arc<dyn Exchange>,
    pub positions: Arc<PositionManager>,
    pub oco: Arc<OcoManager>,
    pub locks: Arc<DistributedLockManager>,
    pub orders: Arc<OrderManager>,
    pub risk_config: Arc<RiskConfigService>,
    pub audit: Arc<AuditLog>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics_handle: Option<PrometheusHandle>,
    pub exchange_label: String,
    started_at: DateTime<Utc>,
}

impl Engine {
    /// Wire the full component graph from configuration
    pub fn build(config: Config) -> Result<Arc<Self>> {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(&config.store.path)?);

        let (exchange, exchange_label): (Arc<dyn Exchange>, String) =
            if config.engine.simulation_enabled {
                (Arc::new(SimulatorExchange::new()), "simulator".to_string())
            } else {
                let mut client_config = if config.exchange.testnet {
                    BinanceClientConfig::testnet()
                } else {
                    BinanceClientConfig::default()
                };
                if let Some(base_url) = &config.exchange.base_url {
                    client_config.base_url = base_url.clone();
                }
                client_config.timeout = Duration::from_secs(config.exchange.timeout_secs);
                client_config.max_retries = config.exchange.max_retries;
                client_config.retry_delay =
                    Duration::from_secs_f64(config.exchange.retry_delay_secs);
                client_config.backoff_multiplier = config.exchange.retry_backoff_multiplier;
                client_config.rate_limiter = client_config
                    .rate_limiter
                    .with_rate(config.exchange.rate_limit as usize);

                let api_key = config.exchange.api_key.clone().unwrap_or_default();
                let api_secret = config.exchange.api_secret.clone().unwrap_or_default();
                (
                    Arc::new(BinanceFuturesExchange::with_config(
                        api_key,
                        api_secret,
                        client_config,
                    )),
                    "binance".to_string(),
                )
            };

        let pod_id = config.pod_id();
        let locks = Arc::new(DistributedLockManager::new(
            Arc::clone(&store),
            pod_id.clone(),
            &config.locks,
        ));
        let positions = Arc::new(PositionManager::new(
            Arc::clone(&store),
            config.risk.clone(),
        ));
        let oco = Arc::new(OcoManager::new(
            Arc::clone(&exchange),
            Arc::clone(&positions) as Arc<dyn PositionCloser>,
            Duration::from_millis(config.oco.poll_interval_ms),
        ));
        let orders = Arc::new(OrderManager::new());
        let risk_config = Arc::new(RiskConfigService::new(Arc::clone(&store)));
        let audit = Arc::new(AuditLog::new(Arc::clone(&store)));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&exchange),
            Arc::clone(&positions),
            Arc::clone(&oco),
            Arc::clone(&locks),
            Arc::clone(&orders),
            Arc::clone(&risk_config),
            Arc::clone(&audit),
            Duration::from_secs(config.engine.idempotency_window_secs),
            exchange_label.clone(),
        ));

        let metrics_handle = crate::metrics::install_recorder();

        info!(pod_id, exchange = exchange_label, "engine built");
        Ok(Arc::new(Engine {
            config,
            store,
            exchange,
            positions,
            oco,
            locks,
            orders,
            risk_config,
            audit,
            dispatcher,
            metrics_handle,
            exchange_label,
            started_at: Utc::now(),
        }))
    }

    /// Start background machinery: lock sweeper and leader election,
    /// position sync, and bracket monitoring
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.locks.start().await;
        self.positions.start().await?;
        self.oco.start_monitoring();
        self.audit
            .log_event("lifecycle", json!({"phase": "started"}))
            .await;
        Ok(())
    }

    /// Stop background tasks and flush final state
    pub async fn shutdown(&self) {
        self.oco.stop_monitoring();
        self.positions.stop();
        self.locks.stop().await;
        self.audit
            .log_event("lifecycle", json!({"phase": "stopped"}))
            .await;
        info!("engine shut down");
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Aggregated health document for the admin surface
    pub async fn health(&self) -> serde_json::Value {
        let leader_info = self.locks.leader_info().await.unwrap_or_else(|e| {
            json!({"status": "error", "error": e.to_string()})
        });
        json!({
            "status": "healthy",
            "uptime_seconds": self.uptime_seconds(),
            "pod_id": self.locks.pod_id(),
            "exchange": self.exchange_label,
            "monitoring_active": self.oco.monitoring_active(),
            "active_oco_pairs": self.oco.active_pair_count(),
            "open_positions": self.positions.get_positions().len(),
            "leader": leader_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    fn test_config() -> Config {
        Config {
            store: StoreConfig {
                path: ":memory:".to_string(),
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_build_wires_simulator_by_default() {
        let engine = Engine::build(test_config()).unwrap();
        assert_eq!(engine.exchange_label, "simulator");
        assert!(!engine.oco.monitoring_active());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let engine = Engine::build(test_config()).unwrap();
        engine.start().await.unwrap();
        assert!(engine.oco.monitoring_active());

        let health = engine.health().await;
        assert_eq!(health["status"], json!("healthy"));
        assert_eq!(health["exchange"], json!("simulator"));

        engine.shutdown().await;
        assert!(!engine.oco.monitoring_active());
    }
}
