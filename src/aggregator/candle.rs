//! In-progress and finalized candle state.

/// In-progress, per-asset OHLCV accumulator.
#[derive(Debug, Clone)]
pub struct CandleState {
    pub asset_id: String,
    pub start_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u64,
    pub vwap_numerator: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

impl CandleState {
    pub fn open_at(asset_id: impl Into<String>, start_time: i64, price: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            start_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            trade_count: 0,
            vwap_numerator: 0.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
        }
    }

    /// Apply a new observed price, updating high/low/close.
    pub fn update_price(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    /// Credit a trade of `size` at `price`, attributing it to the buy or
    /// sell side based on `last_bbo` (the asset's most recently known best
    /// bid/ask), if any. Unsided when no BBO has been observed yet.
    pub fn credit_trade(&mut self, price: f64, size: f64, last_bbo: Option<(f64, f64)>) {
        if size <= 0.0 {
            return;
        }
        self.volume += size;
        self.trade_count += 1;
        self.vwap_numerator += price * size;

        if let Some((bid, ask)) = last_bbo {
            let mid = (bid + ask) / 2.0;
            if price >= mid {
                self.buy_volume += size;
            } else {
                self.sell_volume += size;
            }
        }
    }

    pub fn finalize(self) -> OHLCVCandle {
        let vwap = if self.volume > 0.0 { self.vwap_numerator / self.volume } else { self.close };
        OHLCVCandle {
            asset_id: self.asset_id,
            start_time: self.start_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            trade_count: self.trade_count,
            vwap_numerator: self.vwap_numerator,
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
            vwap,
        }
    }
}

/// A finalized, immutable OHLCV bar.
#[derive(Debug, Clone, PartialEq)]
pub struct OHLCVCandle {
    pub asset_id: String,
    pub start_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trade_count: u64,
    pub vwap_numerator: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub vwap: f64,
}

/// `start_time = floor(ts_ms / 1000 / interval) * interval`.
pub fn candle_boundary(ts_ms: i64, interval_seconds: i64) -> i64 {
    let ts_seconds = ts_ms.div_euclid(1000);
    ts_seconds.div_euclid(interval_seconds) * interval_seconds
}
