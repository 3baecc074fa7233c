//! Trading engine entry point
//!
//! Subcommands:
//! - serve: run the engine (consumer, managers, admin API)
//! - check-config: validate a configuration file and print the result

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "tradeflow")]
#[command(about = "Signal-driven futures trading engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the trading engine
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/tradeflow.json")]
        config: String,

        /// Override the admin API host
        #[arg(long)]
        host: Option<String>,

        /// Override the admin API port
        #[arg(long)]
        port: Option<u16>,

        /// Execute against the live exchange (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/tradeflow.json")]
        config: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy HTTP internals unless explicitly requested
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn,tungstenite=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Serve { .. } => "serve",
        Commands::CheckConfig { .. } => "check-config",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Serve {
            config,
            host,
            port,
            live,
        } => commands::serve::run(config, host, port, live),

        Commands::CheckConfig { config } => {
            let parsed = tradeflow::config::Config::from_file(&config)?;
            println!("{}", serde_json::to_string_pretty(&parsed)?);
            info!("configuration at {config} is valid");
            Ok(())
        }
    }
}
