//! Wire types for the Polymarket market-data WebSocket channel.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SubscribeFrame {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

impl SubscribeFrame {
    pub fn initial(asset_ids: Vec<String>) -> Self {
        Self { assets_ids: asset_ids, msg_type: "market" }
    }
}

#[derive(Debug, Serialize)]
pub struct DynamicSubscribeFrame {
    pub assets_ids: Vec<String>,
    pub operation: &'static str,
}

impl DynamicSubscribeFrame {
    pub fn subscribe(ids: Vec<String>) -> Self {
        Self { assets_ids: ids, operation: "subscribe" }
    }

    pub fn unsubscribe(ids: Vec<String>) -> Self {
        Self { assets_ids: ids, operation: "unsubscribe" }
    }
}

/// Inbound event types the transport dispatches to the aggregator callback.
/// `tick_size_change` and anything unrecognized is dropped.
const DISPATCHED_TYPES: &[&str] =
    &["book", "price_change", "tick_size_change", "last_trade_price", "best_bid_ask"];

pub fn is_dispatched(event_type: &str) -> bool {
    DISPATCHED_TYPES.contains(&event_type)
}

/// Extract the `event` or `event_type` discriminant field from a raw JSON
/// envelope, accepting either spelling (the upstream source mixes both).
pub fn event_type_of(value: &serde_json::Value) -> Option<&str> {
    value
        .get("event")
        .or_else(|| value.get("event_type"))
        .and_then(|v| v.as_str())
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsPriceLevel {
    #[serde(deserialize_with = "de_f64_lenient")]
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTrade {
    pub asset_id: String,
    #[serde(default = "now_ms", deserialize_with = "de_ts_ms")]
    pub timestamp: i64,
    #[serde(deserialize_with = "de_f64_lenient")]
    pub price: f64,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub size: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBbo {
    pub asset_id: String,
    #[serde(default = "now_ms", deserialize_with = "de_ts_ms")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub best_bid: f64,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub best_ask: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPriceChangeEntry {
    pub asset_id: String,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub best_bid: f64,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub best_ask: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPriceChange {
    #[serde(default = "now_ms", deserialize_with = "de_ts_ms")]
    pub timestamp: i64,
    #[serde(default, alias = "price_changes")]
    pub changes: Vec<RawPriceChangeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBook {
    pub asset_id: String,
    #[serde(default = "now_ms", deserialize_with = "de_ts_ms")]
    pub timestamp: i64,
    #[serde(default, alias = "bids")]
    pub buys: Vec<WsPriceLevel>,
    #[serde(default, alias = "asks")]
    pub sells: Vec<WsPriceLevel>,
}

impl RawBook {
    pub fn best_bid_ask(&self) -> (f64, f64) {
        let best_bid = self.buys.iter().map(|p| p.price).fold(0.0_f64, f64::max);
        let best_ask = self
            .sells
            .iter()
            .map(|p| p.price)
            .fold(f64::INFINITY, f64::min);
        let best_ask = if best_ask.is_finite() { best_ask } else { 0.0 };
        (best_bid, best_ask)
    }
}

/// Prices/sizes over this channel are sometimes numbers, sometimes numeric
/// strings; accept either.
fn de_f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(f64),
        Str(String),
    }
    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Timestamps arrive as numbers or numeric strings; `#[serde(default = "now_ms")]`
/// handles the field being absent entirely.
fn de_ts_ms<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TsOrStr {
        Num(i64),
        Str(String),
    }
    match TsOrStr::deserialize(deserializer)? {
        TsOrStr::Num(n) => Ok(n),
        TsOrStr::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
