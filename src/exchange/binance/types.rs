//! Wire types for the Binance USD-M futures REST API

use serde::{Deserialize, Serialize};

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

/// Subset of `GET /fapi/v1/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: String,
    pub filters: Vec<SymbolFilter>,
}

/// Individual filter entries; only the fields the engine reads are kept
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "minQty")]
        min_qty: String,
        #[serde(rename = "stepSize")]
        step_size: String,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: String },
    #[serde(rename = "PRICE_FILTER")]
    PriceFilter {
        #[serde(rename = "tickSize")]
        tick_size: String,
    },
    #[serde(other)]
    Other,
}

/// `GET /fapi/v1/ticker/price`
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

/// Response to order placement / query / cancel
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub avg_price: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub orig_qty: Option<String>,
    #[serde(default)]
    pub executed_qty: Option<String>,
    #[serde(default)]
    pub cum_quote: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default, rename = "type")]
    pub order_type: Option<String>,
    #[serde(default)]
    pub reduce_only: Option<bool>,
    #[serde(default)]
    pub position_side: Option<String>,
    #[serde(default)]
    pub update_time: Option<i64>,
}

impl OrderResponse {
    pub fn avg_price_f64(&self) -> Option<f64> {
        self.avg_price
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|p| *p > 0.0)
    }

    pub fn executed_qty_f64(&self) -> f64 {
        self.executed_qty
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

/// `GET /fapi/v1/positionSide/dual`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionModeResponse {
    pub dual_side_position: bool,
}

/// Request body used when toggling margin or leverage (admin surface)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageRequest {
    pub symbol: String,
    pub leverage: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_response_parsing() {
        let raw = r#"{
            "orderId": 283194212,
            "symbol": "BTCUSDT",
            "status": "FILLED",
            "avgPrice": "50000.00",
            "origQty": "0.001",
            "executedQty": "0.001",
            "cumQuote": "50.0",
            "side": "BUY",
            "type": "MARKET",
            "reduceOnly": false,
            "positionSide": "LONG",
            "updateTime": 1717243200123
        }"#;
        let resp: OrderResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.order_id, 283194212);
        assert_eq!(resp.avg_price_f64(), Some(50_000.0));
        assert_eq!(resp.executed_qty_f64(), 0.001);
    }

    #[test]
    fn test_symbol_filter_parsing_skips_unknown() {
        let raw = r#"{
            "symbols": [{
                "symbol": "ETHUSDT",
                "baseAsset": "ETH",
                "quoteAsset": "USDT",
                "status": "TRADING",
                "filters": [
                    {"filterType": "LOT_SIZE", "minQty": "0.001", "stepSize": "0.001"},
                    {"filterType": "MIN_NOTIONAL", "notional": "20.0"},
                    {"filterType": "PRICE_FILTER", "tickSize": "0.01"},
                    {"filterType": "PERCENT_PRICE", "multiplierUp": "1.1"}
                ]
            }]
        }"#;
        let info: ExchangeInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.symbols.len(), 1);
        assert_eq!(info.symbols[0].filters.len(), 4);
        assert!(matches!(info.symbols[0].filters[3], SymbolFilter::Other));
    }

    #[test]
    fn test_zero_avg_price_treated_as_missing() {
        let raw = r#"{"orderId": 1, "symbol": "BTCUSDT", "status": "NEW", "avgPrice": "0.00000"}"#;
        let resp: OrderResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.avg_price_f64(), None);
    }
}
