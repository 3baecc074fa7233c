//! Serve command
//!
//! Runs the full engine: background coordination tasks, the bus consumer
//! when enabled, and the HTTP admin surface, with graceful shutdown on
//! Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{info, warn};

use tradeflow::api;
use tradeflow::bus::{MessageBus, WebSocketBus};
use tradeflow::config::Config;
use tradeflow::consumer::SignalConsumer;
use tradeflow::engine::Engine;

pub fn run(
    config_path: String,
    host: Option<String>,
    port: Option<u16>,
    live: bool,
) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, host, port, live))
}

async fn run_async(
    config_path: String,
    host: Option<String>,
    port: Option<u16>,
    live: bool,
) -> Result<()> {
    let mut config = if std::path::Path::new(&config_path).exists() {
        Config::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {config_path}"))?
    } else {
        warn!(config_path, "config file not found, using defaults");
        let mut config = Config::default();
        config.apply_env();
        config
    };

    if let Some(host) = host {
        config.api.host = host;
    }
    if let Some(port) = port {
        config.api.port = port;
    }
    if live {
        config.engine.simulation_enabled = false;
    }

    if !config.engine.simulation_enabled {
        warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("Press Ctrl+C within 10 seconds to abort...");
        for i in (1..=10).rev() {
            info!("Starting in {i} seconds...");
            sleep(Duration::from_secs(1)).await;
        }
    }

    let engine = Engine::build(config.clone())?;
    engine.start().await?;

    let consumer = if config.bus.enabled {
        let bus = WebSocketBus::connect(&config.bus) as Arc<dyn MessageBus>;
        let consumer = Arc::new(SignalConsumer::new(
            bus,
            Arc::clone(&engine.dispatcher),
            &config.bus.signal_subject,
        ));
        consumer.start().await?;
        info!(
            url = config.bus.url,
            subject = config.bus.signal_subject,
            "bus consumer running"
        );
        Some(consumer)
    } else {
        info!("bus disabled, accepting signals over HTTP only");
        None
    };

    let app = api::router(Arc::clone(&engine));
    let bind_addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!(addr = bind_addr, "admin API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("signal handler error: {e}");
            }
            info!("shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    if let Some(consumer) = consumer {
        consumer.stop();
    }
    engine.shutdown().await;
    info!("serve command finished");
    Ok(())
}
