//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials and pod identity.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub risk: RiskLimitsConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub oco: OcoConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        Ok(config)
    }

    /// Load API credentials and pod identity from the environment if not set
    pub fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var("BINANCE_API_KEY") {
            self.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("BINANCE_API_SECRET") {
            self.exchange.api_secret = Some(api_secret);
        }
        if let Ok(pod_id) = std::env::var("POD_ID").or_else(|_| std::env::var("HOSTNAME")) {
            self.engine.pod_id = Some(pod_id);
        }
    }

    /// Pod identity used for distributed locks and leader election
    pub fn pod_id(&self) -> String {
        self.engine
            .pod_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

/// Engine-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stable identity of this replica; falls back to HOSTNAME, then a UUID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<String>,
    /// Window within which repeated fingerprints are treated as duplicates
    pub idempotency_window_secs: u64,
    /// Route all executions through the simulator instead of a live exchange
    pub simulation_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            pod_id: None,
            idempotency_window_secs: 300,
            simulation_enabled: true,
        }
    }
}

/// Exchange binding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub testnet: bool,
    /// Override for the REST base URL (tests point this at a local server)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    pub retry_backoff_multiplier: f64,
    pub rate_limit: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            testnet: true,
            base_url: None,
            timeout_secs: 10,
            max_retries: 3,
            retry_delay_secs: 1.0,
            retry_backoff_multiplier: 2.0,
            rate_limit: 10,
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path; `:memory:` for ephemeral state
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: "state/tradeflow.db".to_string(),
        }
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub enabled: bool,
    pub url: String,
    pub signal_subject: String,
    pub ping_interval_secs: u64,
    pub max_outstanding_pings: u32,
    pub reconnect_wait_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            enabled: false,
            url: "ws://localhost:9222".to_string(),
            signal_subject: "signals.trading".to_string(),
            ping_interval_secs: 60,
            max_outstanding_pings: 3,
            reconnect_wait_secs: 2,
        }
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Portfolio-level risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimitsConfig {
    pub enabled: bool,
    pub portfolio_value: f64,
    pub max_position_size_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_portfolio_exposure_pct: f64,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        RiskLimitsConfig {
            enabled: true,
            portfolio_value: 10_000.0,
            max_position_size_pct: 0.10,
            max_daily_loss_pct: 0.05,
            max_portfolio_exposure_pct: 0.50,
        }
    }
}

/// Distributed lock and leader election timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    pub ttl_secs: i64,
    pub heartbeat_interval_secs: u64,
    pub leader_stale_secs: i64,
    pub cleanup_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            ttl_secs: 60,
            heartbeat_interval_secs: 10,
            leader_stale_secs: 30,
            cleanup_interval_secs: 60,
        }
    }
}

/// OCO monitor timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcoConfig {
    pub poll_interval_ms: u64,
}

impl Default for OcoConfig {
    fn default() -> Self {
        OcoConfig {
            poll_interval_ms: 2_000,
        }
    }
}
