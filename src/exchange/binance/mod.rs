//! Binance USD-M futures binding

pub mod client;
pub mod types;

pub use client::{BinanceClientConfig, BinanceFuturesExchange};
