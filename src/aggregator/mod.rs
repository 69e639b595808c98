//! Aggregator (C4): turns per-asset events into finalized OHLCV candles at a
//! fixed interval boundary.

pub mod candle;

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::transport::messages::{RawBbo, RawBook, RawPriceChange, RawTrade};
use candle::{candle_boundary, CandleState, OHLCVCandle};

struct AggregatorState {
    current: HashMap<String, CandleState>,
    completed: Vec<OHLCVCandle>,
    last_bbo: HashMap<String, (f64, f64)>,
}

/// Shared between the transport callback (short, synchronous critical
/// sections, no I/O) and the orchestrator (drains on a timer).
pub struct Aggregator {
    interval_seconds: i64,
    state: Mutex<AggregatorState>,
}

impl Aggregator {
    pub fn new(interval_seconds: u64) -> Self {
        Self {
            interval_seconds: interval_seconds as i64,
            state: Mutex::new(AggregatorState {
                current: HashMap::new(),
                completed: Vec::new(),
                last_bbo: HashMap::new(),
            }),
        }
    }

    /// Parse and fold one inbound event (as delivered by the transport) into
    /// the aggregator. Malformed or out-of-domain events are silently
    /// dropped (`AggregationDrop`), logged at debug.
    pub fn on_message(&self, value: &serde_json::Value) {
        let event_type = value
            .get("event")
            .or_else(|| value.get("event_type"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        match event_type {
            "last_trade_price" => self.handle_trade(value),
            "best_bid_ask" => self.handle_bbo(value),
            "price_change" => self.handle_price_change(value),
            "book" => self.handle_book(value),
            _ => debug!(event_type, "dropped: unknown event type"),
        }
    }

    fn handle_trade(&self, value: &serde_json::Value) {
        let trade: RawTrade = match serde_json::from_value(value.clone()) {
            Ok(t) => t,
            Err(e) => return debug!(error = %e, "dropped malformed trade"),
        };
        if trade.price <= 0.0 {
            return debug!(asset_id = %trade.asset_id, "dropped non-positive trade price");
        }

        let boundary = candle_boundary(trade.timestamp, self.interval_seconds);
        let mut state = self.state.lock();
        let last_bbo = state.last_bbo.get(&trade.asset_id).copied();
        Self::update_candle(&mut state, &trade.asset_id, boundary, trade.price);
        if let Some(c) = state.current.get_mut(&trade.asset_id) {
            c.credit_trade(trade.price, trade.size, last_bbo);
        }
    }

    fn handle_bbo(&self, value: &serde_json::Value) {
        let bbo: RawBbo = match serde_json::from_value(value.clone()) {
            Ok(b) => b,
            Err(e) => return debug!(error = %e, "dropped malformed bbo"),
        };
        self.apply_bbo(&bbo.asset_id, bbo.timestamp, bbo.best_bid, bbo.best_ask);
    }

    fn handle_price_change(&self, value: &serde_json::Value) {
        let batch: RawPriceChange = match serde_json::from_value(value.clone()) {
            Ok(b) => b,
            Err(e) => return debug!(error = %e, "dropped malformed price_change"),
        };
        for entry in &batch.changes {
            self.apply_bbo(&entry.asset_id, batch.timestamp, entry.best_bid, entry.best_ask);
        }
    }

    fn handle_book(&self, value: &serde_json::Value) {
        let book: RawBook = match serde_json::from_value(value.clone()) {
            Ok(b) => b,
            Err(e) => return debug!(error = %e, "dropped malformed book"),
        };
        let (best_bid, best_ask) = book.best_bid_ask();
        self.apply_bbo(&book.asset_id, book.timestamp, best_bid, best_ask);
    }

    fn apply_bbo(&self, asset_id: &str, ts_ms: i64, best_bid: f64, best_ask: f64) {
        if asset_id.is_empty() {
            return debug!("dropped event with no asset_id");
        }
        if best_bid <= 0.0 || best_ask <= 0.0 {
            return debug!(asset_id, "dropped bbo with non-positive side");
        }

        let mid = (best_bid + best_ask) / 2.0;
        let boundary = candle_boundary(ts_ms, self.interval_seconds);

        let mut state = self.state.lock();
        state.last_bbo.insert(asset_id.to_string(), (best_bid, best_ask));
        Self::update_candle(&mut state, asset_id, boundary, mid);
    }

    /// Open a new candle if none exists for `asset_id`; finalize and
    /// re-open at `boundary` if the in-progress candle belongs to an
    /// earlier interval; otherwise fold `price` into the existing candle.
    fn update_candle(state: &mut AggregatorState, asset_id: &str, boundary: i64, price: f64) {
        let needs_new = match state.current.get(asset_id) {
            Some(c) => c.start_time != boundary,
            None => true,
        };

        if needs_new {
            if let Some(existing) = state.current.remove(asset_id) {
                state.completed.push(existing.finalize());
            }
            state
                .current
                .insert(asset_id.to_string(), CandleState::open_at(asset_id, boundary, price));
        }

        if let Some(c) = state.current.get_mut(asset_id) {
            c.update_price(price);
        }
    }

    /// Finalize every in-progress candle whose start time is older than the
    /// current interval boundary, so assets that stop trading still emit a
    /// final bar.
    pub fn flush_stale_candles(&self, now_ms: i64) {
        let current_boundary = candle_boundary(now_ms, self.interval_seconds);
        let mut state = self.state.lock();
        let stale: Vec<String> = state
            .current
            .iter()
            .filter(|(_, c)| c.start_time < current_boundary)
            .map(|(id, _)| id.clone())
            .collect();

        for asset_id in stale {
            if let Some(c) = state.current.remove(&asset_id) {
                state.completed.push(c.finalize());
            }
        }
    }

    /// Atomically return and clear the finalized-candle queue.
    pub fn drain_completed_candles(&self) -> Vec<OHLCVCandle> {
        let mut state = self.state.lock();
        std::mem::take(&mut state.completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scenario_trade_boundaries_s1() {
        let agg = Aggregator::new(60);
        agg.on_message(&json!({"event_type":"last_trade_price","asset_id":"a","timestamp":61_000,"price":0.5,"size":10}));
        agg.on_message(&json!({"event_type":"last_trade_price","asset_id":"a","timestamp":119_000,"price":0.6,"size":20}));
        agg.on_message(&json!({"event_type":"last_trade_price","asset_id":"a","timestamp":125_000,"price":0.55,"size":5}));
        agg.flush_stale_candles(190_000);

        let candles = agg.drain_completed_candles();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].start_time, 60);
        assert_eq!(candles[0].open, 0.5);
        assert_eq!(candles[0].high, 0.6);
        assert_eq!(candles[0].low, 0.5);
        assert_eq!(candles[0].close, 0.6);
        assert_eq!(candles[0].volume, 30.0);
        assert_eq!(candles[0].trade_count, 2);
        assert!((candles[0].vwap - (0.5 * 10.0 + 0.6 * 20.0) / 30.0).abs() < 1e-9);

        assert_eq!(candles[1].start_time, 120);
        assert_eq!(candles[1].volume, 5.0);
        assert_eq!(candles[1].vwap, 0.55);
    }

    #[test]
    fn scenario_bbo_only_s2() {
        let agg = Aggregator::new(60);
        agg.on_message(&json!({"event_type":"best_bid_ask","asset_id":"a","timestamp":1_000,"best_bid":0.4,"best_ask":0.6}));
        agg.on_message(&json!({"event_type":"best_bid_ask","asset_id":"a","timestamp":30_000,"best_bid":0.42,"best_ask":0.58}));
        agg.flush_stale_candles(70_000);

        let candles = agg.drain_completed_candles();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open, 0.5);
        assert_eq!(candles[0].close, 0.5);
        assert_eq!(candles[0].volume, 0.0);
        assert_eq!(candles[0].vwap, candles[0].close);
    }

    #[test]
    fn drops_non_positive_trade_price() {
        let agg = Aggregator::new(60);
        agg.on_message(&json!({"event_type":"last_trade_price","asset_id":"a","timestamp":1_000,"price":0.0,"size":10}));
        agg.flush_stale_candles(70_000);
        assert!(agg.drain_completed_candles().is_empty());
    }

    #[test]
    fn book_event_derives_bbo_from_quote_arrays() {
        let agg = Aggregator::new(60);
        agg.on_message(&json!({
            "event_type":"book","asset_id":"a","timestamp":1_000,
            "buys":[{"price":0.4},{"price":0.45}],
            "sells":[{"price":0.6},{"price":0.55}]
        }));
        agg.flush_stale_candles(70_000);
        let candles = agg.drain_completed_candles();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open, 0.5); // (0.45 + 0.55) / 2
    }

    #[test]
    fn trade_sides_require_prior_bbo() {
        let agg = Aggregator::new(60);
        agg.on_message(&json!({"event_type":"last_trade_price","asset_id":"a","timestamp":1_000,"price":0.5,"size":10}));
        agg.on_message(&json!({"event_type":"best_bid_ask","asset_id":"a","timestamp":2_000,"best_bid":0.4,"best_ask":0.6}));
        agg.on_message(&json!({"event_type":"last_trade_price","asset_id":"a","timestamp":3_000,"price":0.55,"size":4}));
        agg.flush_stale_candles(70_000);
        let candles = agg.drain_completed_candles();
        assert_eq!(candles.len(), 1);
        // first trade unsided, second credited to buy side (>= mid 0.5)
        assert_eq!(candles[0].buy_volume, 4.0);
        assert_eq!(candles[0].sell_volume, 0.0);
        assert_eq!(candles[0].volume, 14.0);
    }

    #[test]
    fn emitted_candles_strictly_increase_in_timestamp_p2() {
        let agg = Aggregator::new(60);
        for i in 0..5 {
            let ts = (i * 60 + 1) * 1000;
            agg.on_message(&json!({"event_type":"last_trade_price","asset_id":"a","timestamp":ts,"price":0.5,"size":1}));
        }
        agg.flush_stale_candles(400 * 1000);
        let candles = agg.drain_completed_candles();
        for w in candles.windows(2) {
            assert!(w[1].start_time > w[0].start_time);
        }
    }
}
