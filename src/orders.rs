//! Process-local order tracking
//!
//! Remembers the orders this replica has placed so the admin surface can
//! list, inspect, and cancel them. Durability is fire-and-forget: the
//! venue remains the source of truth for order state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::types::{ExecutionResult, TradeOrder};

#[derive(Debug, Clone, Serialize)]
pub struct TrackedOrder {
    pub order: TradeOrder,
    pub result: ExecutionResult,
    pub tracked_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct OrderManager {
    orders: Mutex<HashMap<String, TrackedOrder>>,
}

impl OrderManager {
    pub fn new() -> Self {
        OrderManager::default()
    }

    /// Record an order and its execution result, keyed by the venue order id
    pub fn track(&self, order: &TradeOrder, result: &ExecutionResult) {
        self.orders.lock().insert(
            result.order_id.clone(),
            TrackedOrder {
                order: order.clone(),
                result: result.clone(),
                tracked_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, order_id: &str) -> Option<TrackedOrder> {
        self.orders.lock().get(order_id).cloned()
    }

    pub fn all(&self) -> Vec<TrackedOrder> {
        let mut orders: Vec<_> = self.orders.lock().values().cloned().collect();
        orders.sort_by_key(|o| o.tracked_at);
        orders
    }

    pub fn remove(&self, order_id: &str) -> Option<TrackedOrder> {
        self.orders.lock().remove(order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }
}
