//! HTTP admin surface
//!
//! A thin JSON API over the engine: health probes, signal and order
//! submission, position and order inspection, and trading-parameter
//! administration. Every response uses the `{success, data, error?}`
//! envelope; errors carry a code from a fixed set.

pub mod routes;

pub use routes::router;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::EngineError;

/// Error codes exposed by the API
pub mod codes {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const RISK_REJECTED: &str = "risk_rejected";
    pub const DUPLICATE: &str = "duplicate";
    pub const EXCHANGE_ERROR: &str = "exchange_error";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Successful envelope
pub fn ok(data: serde_json::Value) -> Response {
    (
        StatusCode::OK,
        Json(json!({"success": true, "data": data})),
    )
        .into_response()
}

/// Failure envelope with an explicit status and code
pub fn fail(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "data": null,
            "error": {"code": code, "message": message.into()},
        })),
    )
        .into_response()
}

/// Map an engine error onto an HTTP status and error code
pub fn error_response(error: EngineError) -> Response {
    let (status, code) = match &error {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, codes::VALIDATION_ERROR),
        EngineError::Risk { .. } => (StatusCode::UNPROCESSABLE_ENTITY, codes::RISK_REJECTED),
        EngineError::Contention(_) => (StatusCode::CONFLICT, codes::DUPLICATE),
        EngineError::TransientExchange(_) | EngineError::PermanentExchange { .. } => {
            (StatusCode::BAD_GATEWAY, codes::EXCHANGE_ERROR)
        }
        EngineError::Store(_) | EngineError::Bus(_) | EngineError::Invariant(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL_ERROR)
        }
    };
    fail(status, code, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let response = error_response(EngineError::validation("bad"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = error_response(EngineError::risk("position_size_limits_exceeded"));
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = error_response(EngineError::PermanentExchange {
            code: -2010,
            message: "balance".into(),
        });
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
