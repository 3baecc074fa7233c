//! End-to-end dispatch scenarios against the simulated exchange

mod common;

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use common::{buy_signal, replica, replica_on, SlowExchange};
use tradeflow::exchange::{Exchange, SimulatorExchange};
use tradeflow::store::SqliteStore;
use tradeflow::types::{DispatchStatus, SignalAction, Symbol};

#[tokio::test]
async fn test_long_entry_with_bracket() {
    let replica = replica("pod-a");
    let symbol = Symbol::new("BTCUSDT");
    replica.simulator.set_price(&symbol, 50_000.0);

    let outcome = replica
        .dispatcher
        .dispatch(&buy_signal("e1", "BTCUSDT", 0.001))
        .await;
    assert_eq!(outcome.status, DispatchStatus::Executed);

    // One market fill plus a resting reduce-only bracket
    let open = replica.exchange.get_open_orders(&symbol).await.unwrap();
    assert_eq!(open.len(), 2);
    let prices: Vec<f64> = open.iter().filter_map(|o| o.price).collect();
    assert!(prices.contains(&48_000.0));
    assert!(prices.contains(&52_000.0));
    for order in &open {
        assert_eq!(order.side.as_deref(), Some("SELL"));
    }

    let positions = replica.positions.get_positions();
    let position = positions.get("BTCUSDT_LONG").expect("long position");
    assert_relative_eq!(position.quantity, 0.001);
    assert_relative_eq!(position.avg_price, 50_000.0);

    assert_eq!(replica.oco.active_pair_count(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_signals_execute_once() {
    // Two replicas share the store and the venue; execution is slowed so
    // the second dispatch overlaps the first inside the lock window
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let simulator = Arc::new(SimulatorExchange::frictionless());
    simulator.set_price(&Symbol::new("BTCUSDT"), 50_000.0);
    let slow = SlowExchange::new(Arc::clone(&simulator), Duration::from_millis(150));

    let a = replica_on(
        Arc::clone(&store),
        Arc::clone(&simulator),
        Arc::clone(&slow) as Arc<dyn Exchange>,
        "pod-a",
    );
    let b = replica_on(
        Arc::clone(&store),
        Arc::clone(&simulator),
        slow as Arc<dyn Exchange>,
        "pod-b",
    );

    let signal = buy_signal("e2", "BTCUSDT", 0.001);
    let (first, second) = tokio::join!(
        a.dispatcher.dispatch(&signal),
        b.dispatcher.dispatch(&signal)
    );

    let statuses = [first.status, second.status];
    assert!(
        statuses.contains(&DispatchStatus::Executed),
        "one dispatch must execute: {statuses:?}"
    );
    assert!(
        statuses.contains(&DispatchStatus::SkippedDuplicate),
        "one dispatch must be skipped: {statuses:?}"
    );

    // The venue saw exactly one entry order and one bracket
    assert_eq!(
        simulator.open_order_count(&Symbol::new("BTCUSDT")),
        2,
        "exactly one bracket pair on the book"
    );
    let total_tracked = a.orders.len() + b.orders.len();
    assert_eq!(total_tracked, 1, "exactly one entry order tracked");

    // And the shared book holds a single 0.001 position
    a.positions.refresh_from_store().await.unwrap();
    let positions = a.positions.get_positions();
    assert_relative_eq!(positions["BTCUSDT_LONG"].quantity, 0.001);
}

#[tokio::test]
async fn test_distinct_signals_proceed_in_parallel() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let simulator = Arc::new(SimulatorExchange::frictionless());
    simulator.set_price(&Symbol::new("BTCUSDT"), 50_000.0);
    simulator.set_price(&Symbol::new("ETHUSDT"), 3_000.0);
    let slow = SlowExchange::new(Arc::clone(&simulator), Duration::from_millis(100));

    let a = replica_on(
        Arc::clone(&store),
        Arc::clone(&simulator),
        Arc::clone(&slow) as Arc<dyn Exchange>,
        "pod-a",
    );
    let b = replica_on(
        Arc::clone(&store),
        Arc::clone(&simulator),
        slow as Arc<dyn Exchange>,
        "pod-b",
    );

    let mut eth = buy_signal("e3-eth", "ETHUSDT", 0.01);
    eth.price = 3_000.0;
    eth.current_price = 3_000.0;
    eth.stop_loss = Some(2_900.0);
    eth.take_profit = Some(3_100.0);

    let btc_signal = buy_signal("e3-btc", "BTCUSDT", 0.001);
    let (first, second) = tokio::join!(
        a.dispatcher.dispatch(&btc_signal),
        b.dispatcher.dispatch(&eth)
    );

    // Different fingerprints never contend on each other's lock
    assert_eq!(first.status, DispatchStatus::Executed);
    assert_eq!(second.status, DispatchStatus::Executed);
}

#[tokio::test]
async fn test_risk_rejection_never_reaches_the_exchange() {
    let replica = replica("pod-a");
    let symbol = Symbol::new("BTCUSDT");
    replica.simulator.set_price(&symbol, 50_000.0);

    // notional 1_500 against max_position_size_pct=0.1 of a 10_000 portfolio
    let outcome = replica
        .dispatcher
        .dispatch(&buy_signal("e4", "BTCUSDT", 0.03))
        .await;

    assert_eq!(outcome.status, DispatchStatus::Rejected);
    assert_eq!(
        outcome.reason.as_deref(),
        Some("position_size_limits_exceeded")
    );
    assert_eq!(replica.simulator.open_order_count(&symbol), 0);
    assert!(replica.orders.is_empty());
    assert!(replica.positions.get_positions().is_empty());
}

#[tokio::test]
async fn test_hedge_mode_keeps_long_and_short_apart() {
    let replica = replica("pod-a");
    let symbol = Symbol::new("ETHUSDT");
    replica.simulator.set_price(&symbol, 3_000.0);

    let mut sell = buy_signal("e5-short", "ETHUSDT", 0.01);
    sell.action = SignalAction::Sell;
    sell.price = 3_000.0;
    sell.current_price = 3_000.0;
    sell.stop_loss = Some(3_100.0);
    sell.take_profit = Some(2_900.0);

    let mut buy = buy_signal("e5-long", "ETHUSDT", 0.01);
    buy.price = 3_000.0;
    buy.current_price = 3_000.0;
    buy.stop_loss = Some(2_900.0);
    buy.take_profit = Some(3_100.0);

    assert_eq!(
        replica.dispatcher.dispatch(&sell).await.status,
        DispatchStatus::Executed
    );
    assert_eq!(
        replica.dispatcher.dispatch(&buy).await.status,
        DispatchStatus::Executed
    );

    let positions = replica.positions.get_positions();
    assert_eq!(positions.len(), 2);
    assert_relative_eq!(positions["ETHUSDT_SHORT"].quantity, 0.01);
    assert_relative_eq!(positions["ETHUSDT_LONG"].quantity, 0.01);
}

#[tokio::test]
async fn test_transient_exchange_failure_surfaces_and_recovers() {
    let replica = replica("pod-a");
    let symbol = Symbol::new("BTCUSDT");
    replica.simulator.set_price(&symbol, 50_000.0);
    replica.simulator.fail_next_execute("upstream timeout");

    let failed = replica
        .dispatcher
        .dispatch(&buy_signal("e6", "BTCUSDT", 0.001))
        .await;
    assert_eq!(failed.status, DispatchStatus::Error);
    assert!(replica.positions.get_positions().is_empty());
    assert_eq!(replica.oco.active_pair_count(), 0);

    // The fingerprint was not burned; redelivery succeeds
    let retried = replica
        .dispatcher
        .dispatch(&buy_signal("e6", "BTCUSDT", 0.001))
        .await;
    assert_eq!(retried.status, DispatchStatus::Executed);
}
