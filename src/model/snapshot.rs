//! Point-in-time snapshot types copied out of the engine on every trade.

/// Number of higher-timeframe buckets carried by a snapshot (5m, 15m, 1h, 4h, 1d).
pub const NUM_HTF: usize = 5;

/// Point-in-time copy of a candle bucket, including the EMA of the
/// per-tick composite score within the bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CandleSnapshot {
    /// Bucket start, unix seconds, aligned to the timeframe duration.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub buy_vol: f64,
    pub sell_vol: f64,
    pub delta: f64,
    pub avg_score: f64,
}

/// Book pressure projection carried on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrderbookSnapshot {
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread: f64,
    pub imbalance: f64,
    pub score: i32,
}

/// Open-interest projection carried on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OiSnapshot {
    pub oi: f64,
    pub oi_delta_short: f64,
    pub oi_delta_long: f64,
    /// Behavior classification, 0..=4.
    pub behavior: u8,
}

/// Full enriched state broadcast on each trade.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Snapshot {
    pub price: f64,
    /// Trade time, unix milliseconds.
    pub time_ms: i64,
    pub cvd: f64,
    pub candle_1s: CandleSnapshot,
    pub candle_1m: CandleSnapshot,
    pub orderbook: OrderbookSnapshot,
    pub oi: OiSnapshot,
    pub final_score: f64,
    /// Higher timeframes in order: 5m, 15m, 1h, 4h, 1d.
    pub htf: [CandleSnapshot; NUM_HTF],
}
