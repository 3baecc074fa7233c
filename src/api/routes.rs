//! Route handlers for the admin surface

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{codes, error_response, fail, ok};
use crate::engine::Engine;
use crate::risk_config::parameter_schema;
use crate::types::{
    DispatchStatus, OrderType, PositionSide, Side, Signal, Symbol, TimeInForce, TradeOrder,
};

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/trade", post(submit_trade))
        .route("/order", post(submit_order))
        .route("/positions", get(get_positions))
        .route("/orders", get(get_orders))
        .route("/orders/:order_id", get(get_order).delete(cancel_order))
        .route("/account", get(get_account))
        .route("/price/:symbol", get(get_price))
        .route("/metrics", get(get_metrics))
        .route("/api/v1/config/trading", get(list_trading_config))
        .route("/api/v1/config/trading/schema", get(trading_config_schema))
        .route(
            "/api/v1/config/trading/effective/:symbol",
            get(effective_trading_config),
        )
        .route(
            "/api/v1/config/trading/:scope",
            put(set_trading_config).delete(delete_trading_config),
        )
        .with_state(engine)
}

async fn root(State(engine): State<Arc<Engine>>) -> Response {
    ok(json!({
        "service": "tradeflow",
        "version": env!("CARGO_PKG_VERSION"),
        "exchange": engine.exchange_label,
        "uptime_seconds": engine.uptime_seconds(),
    }))
}

async fn health(State(engine): State<Arc<Engine>>) -> Response {
    ok(engine.health().await)
}

async fn ready(State(engine): State<Arc<Engine>>) -> Response {
    // Readiness requires the store to answer
    match engine
        .store
        .count(crate::store::collections::POSITIONS, &crate::store::Filter::new())
        .await
    {
        Ok(_) => ok(json!({"ready": true})),
        Err(e) => fail(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::INTERNAL_ERROR,
            format!("store unavailable: {e}"),
        ),
    }
}

async fn live() -> Response {
    ok(json!({"alive": true}))
}

async fn submit_trade(
    State(engine): State<Arc<Engine>>,
    Json(signal): Json<Signal>,
) -> Response {
    let outcome = engine.dispatcher.dispatch(&signal).await;
    match outcome.status {
        DispatchStatus::Error => fail(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL_ERROR,
            outcome
                .reason
                .unwrap_or_else(|| "dispatch failed".to_string()),
        ),
        _ => ok(serde_json::to_value(&outcome).unwrap_or_default()),
    }
}

/// Raw order submission, bypassing signal conversion
#[derive(Debug, Deserialize)]
struct OrderRequest {
    symbol: String,
    side: Side,
    #[serde(default)]
    position_side: Option<PositionSide>,
    #[serde(rename = "type", default)]
    order_type: OrderType,
    amount: f64,
    #[serde(default)]
    target_price: Option<f64>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
    #[serde(default)]
    time_in_force: TimeInForce,
    #[serde(default)]
    reduce_only: bool,
    #[serde(default)]
    strategy_id: Option<String>,
}

async fn submit_order(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<OrderRequest>,
) -> Response {
    let position_side = request.position_side.unwrap_or(match request.side {
        Side::Buy => PositionSide::Long,
        Side::Sell => PositionSide::Short,
    });
    let order = TradeOrder {
        order_id: Uuid::new_v4(),
        position_id: Uuid::new_v4(),
        symbol: Symbol::new(request.symbol),
        side: request.side,
        position_side,
        order_type: request.order_type,
        amount: request.amount,
        target_price: request.target_price,
        stop_loss: request.stop_loss,
        take_profit: request.take_profit,
        time_in_force: request.time_in_force,
        reduce_only: request.reduce_only,
        strategy_id: request
            .strategy_id
            .unwrap_or_else(|| "manual".to_string()),
        signal_id: None,
        metadata: json!({"source": "api"}),
    };

    match engine.dispatcher.execute_order(&order).await {
        Ok(result) => ok(serde_json::to_value(&result).unwrap_or_default()),
        Err(e) => error_response(e),
    }
}

async fn get_positions(State(engine): State<Arc<Engine>>) -> Response {
    let positions = engine.positions.get_positions();
    let summary = engine.positions.get_portfolio_summary();
    ok(json!({
        "positions": positions,
        "summary": summary,
    }))
}

async fn get_orders(State(engine): State<Arc<Engine>>) -> Response {
    ok(json!({
        "orders": engine.orders.all(),
        "count": engine.orders.len(),
    }))
}

async fn get_order(
    State(engine): State<Arc<Engine>>,
    Path(order_id): Path<String>,
) -> Response {
    match engine.orders.get(&order_id) {
        Some(order) => ok(serde_json::to_value(&order).unwrap_or_default()),
        None => fail(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            format!("order {order_id} not tracked by this replica"),
        ),
    }
}

async fn cancel_order(
    State(engine): State<Arc<Engine>>,
    Path(order_id): Path<String>,
) -> Response {
    let Some(tracked) = engine.orders.get(&order_id) else {
        return fail(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            format!("order {order_id} not tracked by this replica"),
        );
    };

    match engine
        .exchange
        .cancel_order(&tracked.order.symbol, &order_id)
        .await
    {
        Ok(()) => {
            engine.orders.remove(&order_id);
            ok(json!({"order_id": order_id, "status": "canceled"}))
        }
        Err(e) => error_response(e),
    }
}

async fn get_account(State(engine): State<Arc<Engine>>) -> Response {
    match engine.exchange.get_account_info().await {
        Ok(info) => ok(info),
        Err(e) => error_response(e),
    }
}

async fn get_price(
    State(engine): State<Arc<Engine>>,
    Path(symbol): Path<String>,
) -> Response {
    let symbol = Symbol::new(symbol.to_uppercase());
    match engine.exchange.get_symbol_price(&symbol).await {
        Ok(price) => ok(json!({"symbol": symbol, "price": price})),
        Err(e) => error_response(e),
    }
}

async fn get_metrics(State(engine): State<Arc<Engine>>) -> Response {
    match &engine.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => fail(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::INTERNAL_ERROR,
            "metrics recorder not installed",
        ),
    }
}

async fn list_trading_config(State(engine): State<Arc<Engine>>) -> Response {
    match engine.risk_config.list_scopes().await {
        Ok(scopes) => ok(json!({
            "defaults": crate::risk_config::TradingParams::default(),
            "scopes": scopes,
        })),
        Err(e) => error_response(e),
    }
}

async fn trading_config_schema() -> Response {
    ok(parameter_schema())
}

#[derive(Debug, Deserialize)]
struct EffectiveQuery {
    #[serde(default)]
    side: Option<PositionSide>,
}

async fn effective_trading_config(
    State(engine): State<Arc<Engine>>,
    Path(symbol): Path<String>,
    Query(query): Query<EffectiveQuery>,
) -> Response {
    let symbol = Symbol::new(symbol.to_uppercase());
    match engine.risk_config.get_params(&symbol, query.side).await {
        Ok(params) => ok(serde_json::to_value(&params).unwrap_or_default()),
        Err(e) => error_response(e),
    }
}

async fn set_trading_config(
    State(engine): State<Arc<Engine>>,
    Path(scope): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Response {
    match engine.risk_config.set_params(&scope, &params).await {
        Ok(()) => ok(json!({"scope": scope, "updated": true})),
        Err(e) => error_response(e),
    }
}

async fn delete_trading_config(
    State(engine): State<Arc<Engine>>,
    Path(scope): Path<String>,
) -> Response {
    match engine.risk_config.delete_scope(&scope).await {
        Ok(true) => ok(json!({"scope": scope, "deleted": true})),
        Ok(false) => fail(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            format!("no configuration for scope {scope}"),
        ),
        Err(e) => error_response(e),
    }
}
