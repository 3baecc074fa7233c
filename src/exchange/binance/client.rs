//! Binance USD-M futures REST client
//!
//! Signed requests with bounded retry, token-bucket rate limiting, and a
//! circuit breaker. Retries use exponential backoff and are skipped for
//! order rejections the venue will repeat verbatim (insufficient balance,
//! bad symbol/price/quantity, minimum notional).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::types::{
    ApiError, ExchangeInfo, OrderResponse, PositionModeResponse, SymbolFilter, TickerPrice,
};
use crate::common::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};
use crate::error::{EngineError, Result};
use crate::exchange::{Exchange, OpenOrder, OrderDetails, SymbolFilters};
use crate::types::{ExecutionResult, OrderStatus, OrderType, Symbol, TradeOrder};

/// Production REST endpoint
pub const API_BASE_URL: &str = "https://fapi.binance.com";

/// Testnet REST endpoint
pub const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";

/// Error codes the venue will return again on an identical request
const NON_RETRYABLE_CODES: [i64; 6] = [-2010, -2011, -2013, -2014, -2015, -4164];

/// Unknown-order code, treated as success on cancellation
const UNKNOWN_ORDER_CODE: i64 = -2011;

/// Client configuration
#[derive(Debug, Clone)]
pub struct BinanceClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub recv_window_ms: u64,
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for BinanceClientConfig {
    fn default() -> Self {
        Self {
            base_url: API_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            recv_window_ms: 5_000,
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl BinanceClientConfig {
    pub fn testnet() -> Self {
        Self {
            base_url: TESTNET_BASE_URL.to_string(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// API credentials
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// HMAC-SHA256 signature over the query string, hex-encoded
    pub fn sign(&self, query: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Binance USD-M futures exchange binding
pub struct BinanceFuturesExchange {
    credentials: Credentials,
    http_client: Client,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
    backoff_multiplier: f64,
    recv_window_ms: u64,
    circuit_breaker: Arc<Mutex<CircuitBreaker>>,
    rate_limiter: RateLimiter,
    symbol_filters: RwLock<HashMap<String, SymbolFilters>>,
}

impl BinanceFuturesExchange {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self::with_config(api_key, api_secret, BinanceClientConfig::default())
    }

    pub fn with_config(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        config: BinanceClientConfig,
    ) -> Self {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            credentials: Credentials::new(api_key, api_secret),
            http_client,
            base_url: config.base_url,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            backoff_multiplier: config.backoff_multiplier,
            recv_window_ms: config.recv_window_ms,
            circuit_breaker: Arc::new(Mutex::new(CircuitBreaker::new(config.circuit_breaker))),
            rate_limiter: RateLimiter::new(config.rate_limiter),
            symbol_filters: RwLock::new(HashMap::new()),
        }
    }

    /// Run an operation with rate limiting, bounded retry, and the circuit
    /// breaker. Non-retryable errors surface immediately.
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        {
            let mut cb = self.circuit_breaker.lock().await;
            if !cb.can_attempt() {
                return Err(EngineError::TransientExchange(
                    "circuit breaker open".to_string(),
                ));
            }
        }

        self.rate_limiter.acquire().await;

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self
                    .retry_delay
                    .mul_f64(self.backoff_multiplier.powi(attempt as i32 - 1));
                debug!("retrying after {}ms", delay.as_millis());
                sleep(delay).await;
            }

            match operation().await {
                Ok(result) => {
                    self.circuit_breaker.lock().await.record_success();
                    return Ok(result);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    self.circuit_breaker.lock().await.record_failure();
                    return Err(e);
                }
            }
        }

        self.circuit_breaker.lock().await.record_failure();
        Err(last_error
            .unwrap_or_else(|| EngineError::TransientExchange("request failed".to_string())))
    }

    fn encode_params(params: &[(String, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<T> {
        let query = Self::encode_params(params);
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, query)
        };

        let response = self.http_client.get(&url).send().await?;
        Self::parse_response(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T> {
        params.push(("recvWindow".to_string(), self.recv_window_ms.to_string()));
        params.push((
            "timestamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        ));

        let query = Self::encode_params(&params);
        let signature = self.credentials.sign(&query);
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, endpoint, query, signature
        );

        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", self.credentials.api_key())
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&text) {
                if NON_RETRYABLE_CODES.contains(&api_error.code) {
                    return Err(EngineError::PermanentExchange {
                        code: api_error.code,
                        message: api_error.msg,
                    });
                }
                return Err(EngineError::TransientExchange(format!(
                    "API error {} ({}): {}",
                    status, api_error.code, api_error.msg
                )));
            }
            return Err(EngineError::TransientExchange(format!(
                "API error {status}: {text}"
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| EngineError::TransientExchange(format!("parse response: {e}")))
    }

    /// Build venue parameters for an order, branching on the order type
    fn build_order_params(
        &self,
        order: &TradeOrder,
        filters: &SymbolFilters,
    ) -> Result<Vec<(String, String)>> {
        let mut params = vec![
            ("symbol".to_string(), order.symbol.to_string()),
            (
                "side".to_string(),
                order.side.as_str().to_uppercase().to_string(),
            ),
            ("positionSide".to_string(), order.position_side.to_string()),
            (
                "quantity".to_string(),
                filters.format_quantity(order.amount),
            ),
        ];

        let target_price = |field: &str| -> Result<f64> {
            order
                .target_price
                .ok_or_else(|| EngineError::validation(format!("{field} requires a target price")))
        };
        let stop_price = |field: &str| -> Result<f64> {
            order
                .stop_loss
                .ok_or_else(|| EngineError::validation(format!("{field} requires a stop price")))
        };
        let take_profit_price = |field: &str| -> Result<f64> {
            order.take_profit.ok_or_else(|| {
                EngineError::validation(format!("{field} requires a take profit price"))
            })
        };

        match order.order_type {
            OrderType::Market => {
                params.push(("type".to_string(), "MARKET".to_string()));
            }
            OrderType::Limit => {
                params.push(("type".to_string(), "LIMIT".to_string()));
                params.push((
                    "timeInForce".to_string(),
                    order.time_in_force.as_str().to_string(),
                ));
                params.push((
                    "price".to_string(),
                    filters.format_price(target_price("limit order")?),
                ));
            }
            OrderType::Stop => {
                params.push(("type".to_string(), "STOP_MARKET".to_string()));
                params.push((
                    "stopPrice".to_string(),
                    filters.format_price(stop_price("stop order")?),
                ));
            }
            OrderType::StopLimit => {
                params.push(("type".to_string(), "STOP".to_string()));
                params.push((
                    "timeInForce".to_string(),
                    order.time_in_force.as_str().to_string(),
                ));
                params.push((
                    "price".to_string(),
                    filters.format_price(target_price("stop limit order")?),
                ));
                params.push((
                    "stopPrice".to_string(),
                    filters.format_price(stop_price("stop limit order")?),
                ));
            }
            OrderType::TakeProfit => {
                params.push(("type".to_string(), "TAKE_PROFIT_MARKET".to_string()));
                params.push((
                    "stopPrice".to_string(),
                    filters.format_price(take_profit_price("take profit order")?),
                ));
            }
            OrderType::TakeProfitLimit => {
                params.push(("type".to_string(), "TAKE_PROFIT".to_string()));
                params.push((
                    "timeInForce".to_string(),
                    order.time_in_force.as_str().to_string(),
                ));
                params.push((
                    "price".to_string(),
                    filters.format_price(target_price("take profit limit order")?),
                ));
                params.push((
                    "stopPrice".to_string(),
                    filters.format_price(take_profit_price("take profit limit order")?),
                ));
            }
        }

        if order.reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }

        Ok(params)
    }

    /// Pre-flight validation: sane amount, prices for the order family, and
    /// the notional floor for opening orders.
    async fn validate_order(&self, order: &TradeOrder, filters: &SymbolFilters) -> Result<()> {
        if order.amount <= 0.0 {
            return Err(EngineError::validation("order amount must be positive"));
        }
        if order.order_type.requires_target_price() && order.target_price.is_none() {
            return Err(EngineError::validation(
                "target price required for limit orders",
            ));
        }
        if order.order_type.requires_stop_price() && order.stop_loss.is_none() {
            return Err(EngineError::validation(
                "stop price required for stop orders",
            ));
        }

        // Reduce-only orders close existing exposure and are exempt from the
        // minimum notional
        if order.reduce_only {
            return Ok(());
        }

        let reference_price = match order.target_price {
            Some(p) if order.order_type.requires_target_price() => p,
            _ => self.get_symbol_price(&order.symbol).await?,
        };
        let notional = order.amount * reference_price;
        if !filters.meets_min_notional(order.amount, reference_price) {
            return Err(EngineError::validation(format!(
                "order notional {:.2} below minimum {:.2} for {} (need qty >= {:.6} at {:.2})",
                notional,
                filters.min_notional,
                order.symbol,
                filters.min_notional / reference_price,
                reference_price
            )));
        }
        Ok(())
    }

    fn map_execution(order: &TradeOrder, resp: OrderResponse) -> ExecutionResult {
        let status = match resp.status.as_str() {
            "FILLED" => OrderStatus::Filled,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "NEW" => OrderStatus::New,
            "CANCELED" | "EXPIRED" => OrderStatus::Canceled,
            _ => OrderStatus::Rejected,
        };

        let executed = resp.executed_qty_f64();
        ExecutionResult {
            order_id: resp.order_id.to_string(),
            status,
            symbol: order.symbol.clone(),
            amount: if executed > 0.0 { executed } else { order.amount },
            fill_price: resp.avg_price_f64(),
            fills: Vec::new(),
            commission: 0.0,
            commission_asset: None,
            trade_ids: Vec::new(),
            timestamp: Utc::now(),
            simulated: false,
        }
    }
}

#[async_trait]
impl Exchange for BinanceFuturesExchange {
    async fn execute(&self, order: &TradeOrder) -> Result<ExecutionResult> {
        let filters = self.get_symbol_info(&order.symbol).await?;
        self.validate_order(order, &filters).await?;
        let params = self.build_order_params(order, &filters)?;

        debug!(
            symbol = %order.symbol,
            side = order.side.as_str(),
            order_type = order.order_type.as_str(),
            amount = order.amount,
            reduce_only = order.reduce_only,
            "placing order"
        );

        let resp: OrderResponse = self
            .execute_with_retry(|| {
                let params = params.clone();
                async move {
                    self.signed_request(Method::POST, "/fapi/v1/order", params)
                        .await
                }
            })
            .await?;

        Ok(Self::map_execution(order, resp))
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<()> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];

        let result: Result<OrderResponse> = self
            .execute_with_retry(|| {
                let params = params.clone();
                async move {
                    self.signed_request(Method::DELETE, "/fapi/v1/order", params)
                        .await
                }
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            // The order already left the book (filled or cancelled elsewhere)
            Err(EngineError::PermanentExchange { code, .. }) if code == UNKNOWN_ORDER_CODE => {
                debug!(order_id, "cancel on unknown order treated as success");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_order_status(&self, symbol: &Symbol, order_id: &str) -> Result<OrderDetails> {
        let params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("orderId".to_string(), order_id.to_string()),
        ];
        let resp: OrderResponse = self
            .execute_with_retry(|| {
                let params = params.clone();
                async move {
                    self.signed_request(Method::GET, "/fapi/v1/order", params)
                        .await
                }
            })
            .await?;

        Ok(OrderDetails {
            order_id: resp.order_id.to_string(),
            symbol: symbol.clone(),
            status: resp.status.clone(),
            avg_price: resp.avg_price_f64(),
            executed_qty: Some(resp.executed_qty_f64()),
            commission: None,
        })
    }

    async fn get_open_orders(&self, symbol: &Symbol) -> Result<Vec<OpenOrder>> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let resp: Vec<OrderResponse> = self
            .execute_with_retry(|| {
                let params = params.clone();
                async move {
                    self.signed_request(Method::GET, "/fapi/v1/openOrders", params)
                        .await
                }
            })
            .await?;

        Ok(resp
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id.to_string(),
                symbol: Symbol::new(o.symbol.clone()),
                status: o.status.clone(),
                side: o.side.clone(),
                order_type: o.order_type.clone(),
                price: o.price.as_deref().and_then(|p| p.parse().ok()),
                quantity: o.orig_qty.as_deref().and_then(|q| q.parse().ok()),
            })
            .collect())
    }

    async fn get_symbol_price(&self, symbol: &Symbol) -> Result<f64> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        let ticker: TickerPrice = self
            .execute_with_retry(|| {
                let params = params.clone();
                async move { self.public_get("/fapi/v1/ticker/price", &params).await }
            })
            .await?;

        ticker
            .price
            .parse::<f64>()
            .map_err(|e| EngineError::TransientExchange(format!("bad ticker price: {e}")))
    }

    async fn get_symbol_info(&self, symbol: &Symbol) -> Result<SymbolFilters> {
        if let Some(filters) = self.symbol_filters.read().await.get(symbol.as_str()) {
            return Ok(filters.clone());
        }

        let info: ExchangeInfo = self
            .execute_with_retry(|| async { self.public_get("/fapi/v1/exchangeInfo", &[]).await })
            .await?;

        let mut cache = self.symbol_filters.write().await;
        for symbol_info in &info.symbols {
            let mut filters = SymbolFilters {
                symbol: symbol_info.symbol.clone(),
                base_asset: symbol_info.base_asset.clone(),
                quote_asset: symbol_info.quote_asset.clone(),
                min_qty: 0.001,
                step_size: 0.001,
                min_notional: 20.0,
                tick_size: 0.01,
            };
            for filter in &symbol_info.filters {
                match filter {
                    SymbolFilter::LotSize { min_qty, step_size } => {
                        filters.min_qty = min_qty.parse().unwrap_or(filters.min_qty);
                        filters.step_size = step_size.parse().unwrap_or(filters.step_size);
                    }
                    SymbolFilter::MinNotional { notional } => {
                        filters.min_notional = notional.parse().unwrap_or(filters.min_notional);
                    }
                    SymbolFilter::PriceFilter { tick_size } => {
                        filters.tick_size = tick_size.parse().unwrap_or(filters.tick_size);
                    }
                    SymbolFilter::Other => {}
                }
            }
            cache.insert(symbol_info.symbol.clone(), filters);
        }

        cache.get(symbol.as_str()).cloned().ok_or_else(|| {
            EngineError::validation(format!("symbol {symbol} not found in exchange info"))
        })
    }

    async fn get_account_info(&self) -> Result<serde_json::Value> {
        self.execute_with_retry(|| async {
            self.signed_request(Method::GET, "/fapi/v2/account", Vec::new())
                .await
        })
        .await
    }

    async fn get_position_info(&self) -> Result<serde_json::Value> {
        self.execute_with_retry(|| async {
            self.signed_request(Method::GET, "/fapi/v2/positionRisk", Vec::new())
                .await
        })
        .await
    }

    async fn verify_hedge_mode(&self) -> Result<bool> {
        let mode: PositionModeResponse = self
            .execute_with_retry(|| async {
                self.signed_request(Method::GET, "/fapi/v1/positionSide/dual", Vec::new())
                    .await
            })
            .await?;
        Ok(mode.dual_side_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PositionSide, Side, TimeInForce};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_filters() -> SymbolFilters {
        SymbolFilters {
            symbol: "BTCUSDT".to_string(),
            base_asset: "BTC".to_string(),
            quote_asset: "USDT".to_string(),
            min_qty: 0.001,
            step_size: 0.001,
            min_notional: 100.0,
            tick_size: 0.10,
        }
    }

    fn market_order() -> TradeOrder {
        TradeOrder {
            order_id: Uuid::new_v4(),
            position_id: Uuid::new_v4(),
            symbol: Symbol::new("BTCUSDT"),
            side: Side::Buy,
            position_side: PositionSide::Long,
            order_type: OrderType::Market,
            amount: 0.01,
            target_price: None,
            stop_loss: None,
            take_profit: None,
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
            strategy_id: "s1".to_string(),
            signal_id: None,
            metadata: serde_json::json!({}),
        }
    }

    fn client_for(server: &MockServer) -> BinanceFuturesExchange {
        BinanceFuturesExchange::with_config(
            "key",
            "secret",
            BinanceClientConfig::default()
                .with_base_url(server.uri())
                .with_max_retries(2)
                .with_retry_delay(Duration::from_millis(5)),
        )
    }

    #[test]
    fn test_signature_matches_reference_vector() {
        let credentials = Credentials::new(
            "key",
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j",
        );
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            credentials.sign(query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_build_order_params_stop_market() {
        let exchange = BinanceFuturesExchange::new("k", "s");
        let mut order = market_order();
        order.order_type = OrderType::Stop;
        order.side = Side::Sell;
        order.stop_loss = Some(48_000.0);
        order.reduce_only = true;

        let params = exchange.build_order_params(&order, &test_filters()).unwrap();
        let map: HashMap<_, _> = params.into_iter().collect();
        assert_eq!(map["type"], "STOP_MARKET");
        assert_eq!(map["stopPrice"], "48000.0");
        assert_eq!(map["side"], "SELL");
        assert_eq!(map["positionSide"], "LONG");
        assert_eq!(map["reduceOnly"], "true");
        assert_eq!(map["quantity"], "0.010");
    }

    #[test]
    fn test_build_order_params_limit_requires_price() {
        let exchange = BinanceFuturesExchange::new("k", "s");
        let mut order = market_order();
        order.order_type = OrderType::Limit;
        order.target_price = None;

        let err = exchange
            .build_order_params(&order, &test_filters())
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_transient_failure_then_success_is_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/price"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream error"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "BTCUSDT", "price": "50000.00"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = client_for(&server);
        let price = exchange
            .get_symbol_price(&Symbol::new("BTCUSDT"))
            .await
            .unwrap();
        assert_eq!(price, 50_000.0);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": -2010, "msg": "Account has insufficient balance"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = client_for(&server);
        let mut order = market_order();
        // reduce_only skips the notional pre-flight so no price call is made
        order.reduce_only = true;

        // Seed the filter cache to avoid the exchangeInfo round-trip
        exchange
            .symbol_filters
            .write()
            .await
            .insert("BTCUSDT".to_string(), test_filters());

        let err = exchange.execute(&order).await.unwrap_err();
        match err {
            EngineError::PermanentExchange { code, .. } => assert_eq!(code, -2010),
            other => panic!("expected permanent error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_unknown_order_is_success() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/fapi/v1/order"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": -2011, "msg": "Unknown order sent."
            })))
            .mount(&server)
            .await;

        let exchange = client_for(&server);
        exchange
            .cancel_order(&Symbol::new("BTCUSDT"), "12345")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_market_order_maps_to_execution_result() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orderId": 42, "symbol": "BTCUSDT", "status": "FILLED",
                "avgPrice": "50000.0", "executedQty": "0.010", "cumQuote": "500.0"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/ticker/price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "BTCUSDT", "price": "50000.00"
            })))
            .mount(&server)
            .await;

        let exchange = client_for(&server);
        exchange
            .symbol_filters
            .write()
            .await
            .insert("BTCUSDT".to_string(), test_filters());

        let result = exchange.execute(&market_order()).await.unwrap();
        assert_eq!(result.order_id, "42");
        assert_eq!(result.status, OrderStatus::Filled);
        assert_eq!(result.fill_price, Some(50_000.0));
        assert_eq!(result.amount, 0.01);
    }
}
