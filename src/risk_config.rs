//! Scoped trading parameters with cached reads
//!
//! Parameters can be set globally, per symbol, or per symbol and position
//! side. Lookup precedence for any parameter is symbol+side over symbol
//! over global over the hard-coded default. Resolved parameter sets are
//! cached in-process with a TTL; writes invalidate the cache so admin
//! changes take effect promptly on the writing replica and within one TTL
//! elsewhere.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::store::{collections, DocumentStore, Filter};
use crate::types::{OrderType, PositionSide, Symbol, TimeInForce};

/// Default TTL for resolved parameter sets
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginType {
    Isolated,
    Crossed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    Hedge,
    OneWay,
}

/// Fully resolved trading parameters for one scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingParams {
    pub leverage: u32,
    pub margin_type: MarginType,
    pub default_order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub position_mode: PositionMode,
    pub position_size_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub max_position_size: f64,
    pub max_accumulations: u32,
    pub accumulation_cooldown_seconds: u64,
}

impl Default for TradingParams {
    fn default() -> Self {
        TradingParams {
            leverage: 10,
            margin_type: MarginType::Isolated,
            default_order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            position_mode: PositionMode::Hedge,
            position_size_pct: 0.10,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            max_position_size: 1_000.0,
            max_accumulations: 3,
            accumulation_cooldown_seconds: 300,
        }
    }
}

impl TradingParams {
    /// Overlay a partial parameter document onto this set. Unknown keys
    /// were rejected at write time, so they are ignored here.
    fn apply_overrides(&mut self, overrides: &Value) {
        let Some(map) = overrides.as_object() else {
            return;
        };
        for (key, value) in map {
            match key.as_str() {
                "leverage" => {
                    if let Some(v) = value.as_u64() {
                        self.leverage = v as u32;
                    }
                }
                "margin_type" => {
                    if let Ok(v) = serde_json::from_value(value.clone()) {
                        self.margin_type = v;
                    }
                }
                "default_order_type" => {
                    if let Ok(v) = serde_json::from_value(value.clone()) {
                        self.default_order_type = v;
                    }
                }
                "time_in_force" => {
                    if let Ok(v) = serde_json::from_value(value.clone()) {
                        self.time_in_force = v;
                    }
                }
                "position_mode" => {
                    if let Ok(v) = serde_json::from_value(value.clone()) {
                        self.position_mode = v;
                    }
                }
                "position_size_pct" => {
                    if let Some(v) = value.as_f64() {
                        self.position_size_pct = v;
                    }
                }
                "stop_loss_pct" => {
                    if let Some(v) = value.as_f64() {
                        self.stop_loss_pct = v;
                    }
                }
                "take_profit_pct" => {
                    if let Some(v) = value.as_f64() {
                        self.take_profit_pct = v;
                    }
                }
                "max_position_size" => {
                    if let Some(v) = value.as_f64() {
                        self.max_position_size = v;
                    }
                }
                "max_accumulations" => {
                    if let Some(v) = value.as_u64() {
                        self.max_accumulations = v as u32;
                    }
                }
                "accumulation_cooldown_seconds" => {
                    if let Some(v) = value.as_u64() {
                        self.accumulation_cooldown_seconds = v;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Validate a single parameter against its documented type, range, and
/// allowed values. Returns a descriptive error for the admin surface.
pub fn validate_param(key: &str, value: &Value) -> Result<()> {
    let fail = |msg: &str| Err(EngineError::validation(format!("{key}: {msg}")));
    match key {
        "leverage" => match value.as_u64() {
            Some(1..=125) => Ok(()),
            _ => fail("must be an integer between 1 and 125"),
        },
        "margin_type" => match value.as_str() {
            Some("isolated") | Some("crossed") => Ok(()),
            _ => fail("must be one of: isolated, crossed"),
        },
        "default_order_type" => {
            match serde_json::from_value::<OrderType>(value.clone()) {
                Ok(_) => Ok(()),
                Err(_) => fail("must be a supported order type"),
            }
        }
        "time_in_force" => match value.as_str() {
            Some("GTC") | Some("IOC") | Some("FOK") => Ok(()),
            _ => fail("must be one of: GTC, IOC, FOK"),
        },
        "position_mode" => match value.as_str() {
            Some("hedge") | Some("one_way") => Ok(()),
            _ => fail("must be one of: hedge, one_way"),
        },
        "position_size_pct" | "stop_loss_pct" | "take_profit_pct" => match value.as_f64() {
            Some(v) if v > 0.0 && v <= 1.0 => Ok(()),
            _ => fail("must be a fraction in (0, 1]"),
        },
        "max_position_size" => match value.as_f64() {
            Some(v) if v > 0.0 => Ok(()),
            _ => fail("must be positive"),
        },
        "max_accumulations" => match value.as_u64() {
            Some(1..=100) => Ok(()),
            _ => fail("must be an integer between 1 and 100"),
        },
        "accumulation_cooldown_seconds" => match value.as_u64() {
            Some(0..=86_400) => Ok(()),
            _ => fail("must be between 0 and 86400 seconds"),
        },
        _ => fail("unknown parameter"),
    }
}

/// Parameter documentation served by the admin configuration endpoints
pub fn parameter_schema() -> Value {
    json!({
        "leverage": {"type": "integer", "default": 10, "range": [1, 125],
            "description": "Leverage multiplier applied per symbol"},
        "margin_type": {"type": "string", "default": "isolated",
            "enum": ["isolated", "crossed"],
            "description": "Margin pool backing the position"},
        "default_order_type": {"type": "string", "default": "market",
            "enum": ["market", "limit", "stop", "stop_limit", "take_profit", "take_profit_limit"],
            "description": "Order type used when the signal does not specify one"},
        "time_in_force": {"type": "string", "default": "GTC",
            "enum": ["GTC", "IOC", "FOK"],
            "description": "Default time in force for resting orders"},
        "position_mode": {"type": "string", "default": "hedge",
            "enum": ["hedge", "one_way"],
            "description": "Whether LONG and SHORT may coexist on one symbol"},
        "position_size_pct": {"type": "number", "default": 0.10, "range": [0.0, 1.0],
            "description": "Fraction of portfolio value allocated per position"},
        "stop_loss_pct": {"type": "number", "default": 0.02, "range": [0.0, 1.0],
            "description": "Default stop loss distance from entry"},
        "take_profit_pct": {"type": "number", "default": 0.04, "range": [0.0, 1.0],
            "description": "Default take profit distance from entry"},
        "max_position_size": {"type": "number", "default": 1000.0,
            "description": "Hard cap on position notional in quote units"},
        "max_accumulations": {"type": "integer", "default": 3, "range": [1, 100],
            "description": "How many times a position may be added to"},
        "accumulation_cooldown_seconds": {"type": "integer", "default": 300,
            "range": [0, 86400],
            "description": "Minimum time between additions to one position"},
    })
}

/// Store-backed parameter service with a read-through TTL cache
pub struct RiskConfigService {
    store: Arc<dyn DocumentStore>,
    cache: Mutex<HashMap<String, (Instant, TradingParams)>>,
    cache_ttl: Duration,
}

impl RiskConfigService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(store: Arc<dyn DocumentStore>, cache_ttl: Duration) -> Self {
        RiskConfigService {
            store,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    fn scope_global() -> String {
        "global".to_string()
    }

    fn scope_symbol(symbol: &Symbol) -> String {
        format!("symbol:{symbol}")
    }

    fn scope_symbol_side(symbol: &Symbol, side: PositionSide) -> String {
        format!("symbol:{symbol}:{side}")
    }

    /// Resolve the effective parameters for a symbol and optional side
    pub async fn get_params(
        &self,
        symbol: &Symbol,
        side: Option<PositionSide>,
    ) -> Result<TradingParams> {
        let cache_key = match side {
            Some(side) => Self::scope_symbol_side(symbol, side),
            None => Self::scope_symbol(symbol),
        };

        {
            let cache = self.cache.lock();
            if let Some((at, params)) = cache.get(&cache_key) {
                if at.elapsed() < self.cache_ttl {
                    return Ok(params.clone());
                }
            }
        }

        let mut params = TradingParams::default();
        // Coarse to fine so the most specific scope wins
        let mut scopes = vec![Self::scope_global(), Self::scope_symbol(symbol)];
        if let Some(side) = side {
            scopes.push(Self::scope_symbol_side(symbol, side));
        }
        for scope in &scopes {
            if let Some(doc) = self
                .store
                .find_one(
                    collections::TRADING_CONFIGS,
                    &Filter::new().eq("scope", scope.clone()),
                )
                .await?
            {
                if let Some(overrides) = doc.get("params") {
                    params.apply_overrides(overrides);
                }
            }
        }

        debug!(cache_key, "trading params resolved");
        self.cache
            .lock()
            .insert(cache_key, (Instant::now(), params.clone()));
        Ok(params)
    }

    /// Write a partial parameter document for a scope after validating
    /// every key
    pub async fn set_params(&self, scope: &str, overrides: &Value) -> Result<()> {
        let map = overrides
            .as_object()
            .ok_or_else(|| EngineError::validation("parameters must be an object"))?;
        if map.is_empty() {
            return Err(EngineError::validation("no parameters provided"));
        }
        for (key, value) in map {
            validate_param(key, value)?;
        }

        self.store
            .upsert(
                collections::TRADING_CONFIGS,
                &Filter::new().eq("scope", scope),
                &json!({
                    "params": overrides,
                    "updated_at": chrono::Utc::now().to_rfc3339(),
                }),
            )
            .await?;

        self.cache.lock().clear();
        Ok(())
    }

    /// Raw configuration documents for the admin surface
    pub async fn list_scopes(&self) -> Result<Vec<Value>> {
        self.store
            .find(collections::TRADING_CONFIGS, &Filter::new())
            .await
    }

    pub async fn delete_scope(&self, scope: &str) -> Result<bool> {
        let deleted = self
            .store
            .delete(
                collections::TRADING_CONFIGS,
                &Filter::new().eq("scope", scope),
            )
            .await?;
        self.cache.lock().clear();
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn service() -> RiskConfigService {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        RiskConfigService::with_ttl(store as Arc<dyn DocumentStore>, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_defaults_without_any_config() {
        let service = service();
        let params = service
            .get_params(&Symbol::new("BTCUSDT"), Some(PositionSide::Long))
            .await
            .unwrap();
        assert_eq!(params.leverage, 10);
        assert_eq!(params.stop_loss_pct, 0.02);
        assert_eq!(params.position_mode, PositionMode::Hedge);
    }

    #[tokio::test]
    async fn test_scope_precedence() {
        let service = service();
        let symbol = Symbol::new("BTCUSDT");

        service
            .set_params("global", &json!({"leverage": 5, "stop_loss_pct": 0.05}))
            .await
            .unwrap();
        service
            .set_params("symbol:BTCUSDT", &json!({"leverage": 20}))
            .await
            .unwrap();
        service
            .set_params("symbol:BTCUSDT:LONG", &json!({"leverage": 50}))
            .await
            .unwrap();

        // symbol+side beats symbol beats global
        let long = service
            .get_params(&symbol, Some(PositionSide::Long))
            .await
            .unwrap();
        assert_eq!(long.leverage, 50);
        assert_eq!(long.stop_loss_pct, 0.05);

        let short = service
            .get_params(&symbol, Some(PositionSide::Short))
            .await
            .unwrap();
        assert_eq!(short.leverage, 20);

        let other = service
            .get_params(&Symbol::new("ETHUSDT"), Some(PositionSide::Long))
            .await
            .unwrap();
        assert_eq!(other.leverage, 5);
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_values() {
        let service = service();
        assert!(service
            .set_params("global", &json!({"leverage": 300}))
            .await
            .is_err());
        assert!(service
            .set_params("global", &json!({"margin_type": "both"}))
            .await
            .is_err());
        assert!(service
            .set_params("global", &json!({"stop_loss_pct": 1.5}))
            .await
            .is_err());
        assert!(service
            .set_params("global", &json!({"not_a_param": 1}))
            .await
            .is_err());
        assert!(service.set_params("global", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_write_invalidates_cache() {
        let service = service();
        let symbol = Symbol::new("BTCUSDT");

        let before = service.get_params(&symbol, None).await.unwrap();
        assert_eq!(before.leverage, 10);

        service
            .set_params("symbol:BTCUSDT", &json!({"leverage": 25}))
            .await
            .unwrap();

        let after = service.get_params(&symbol, None).await.unwrap();
        assert_eq!(after.leverage, 25);
    }

    #[tokio::test]
    async fn test_delete_scope_restores_parent() {
        let service = service();
        let symbol = Symbol::new("BTCUSDT");

        service
            .set_params("symbol:BTCUSDT", &json!({"take_profit_pct": 0.10}))
            .await
            .unwrap();
        assert_eq!(
            service
                .get_params(&symbol, None)
                .await
                .unwrap()
                .take_profit_pct,
            0.10
        );

        assert!(service.delete_scope("symbol:BTCUSDT").await.unwrap());
        assert_eq!(
            service
                .get_params(&symbol, None)
                .await
                .unwrap()
                .take_profit_pct,
            0.04
        );
    }

    #[test]
    fn test_schema_covers_all_defaults() {
        let schema = parameter_schema();
        let defaults = serde_json::to_value(TradingParams::default()).unwrap();
        for key in defaults.as_object().unwrap().keys() {
            assert!(schema.get(key).is_some(), "schema missing {key}");
        }
    }
}
