//! Metric names and the Prometheus exporter
//!
//! All counters and histograms are registered through the `metrics` facade;
//! the recorder renders the Prometheus text exposition served at
//! `GET /metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const TRADES_TOTAL: &str = "trades_total";
pub const ERRORS_TOTAL: &str = "errors_total";
pub const LATENCY_SECONDS: &str = "latency_seconds";
pub const RISK_REJECTIONS_TOTAL: &str = "risk_rejections_total";
pub const POSITIONS_OPENED_TOTAL: &str = "positions_opened_total";
pub const POSITIONS_CLOSED_TOTAL: &str = "positions_closed_total";
pub const BUS_MESSAGES_PROCESSED_TOTAL: &str = "bus_messages_processed_total";
pub const BUS_ERRORS_TOTAL: &str = "bus_errors_total";

/// Install the global Prometheus recorder and return the render handle.
///
/// Returns `None` when a recorder is already installed (tests, or a second
/// engine in one process); metric macros then fall through to the existing
/// recorder.
pub fn install_recorder() -> Option<PrometheusHandle> {
    let builder = PrometheusBuilder::new();
    match builder.install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("prometheus recorder not installed: {e}");
            None
        }
    }
}
