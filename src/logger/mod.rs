//! Async CSV snapshot logger with a derived decision layer.
//!
//! The engine worker submits at most one [`LogRow`] per 1 s candle through
//! a bounded channel; a full channel drops the row so the engine is never
//! blocked by disk. The sink worker owns the file handle, batches writes
//! through a 1 MiB buffer flushed at least once per second, and rotates to
//! `logs/YYYY-MM-DD.csv` on UTC day boundaries, appending and writing the
//! header only when the file is empty.

mod decision;
mod sink;

pub use decision::{action_hint, htf_bias, market_state, HtfBias};
pub use sink::{CsvSink, CSV_HEADER};

use crate::model::Snapshot;

/// One pre-computed CSV row. All fields are value types.
#[derive(Debug, Clone)]
pub struct LogRow {
    /// Unix milliseconds.
    pub timestamp: i64,
    pub price: f64,
    pub final_score: f64,

    // Multi-timeframe scores.
    pub score_1s: f64,
    pub score_1m: f64,
    pub score_5m: f64,
    pub score_15m: f64,
    pub score_1h: f64,

    // Decision layer.
    pub htf_bias: HtfBias,
    pub market_state: &'static str,
    pub action_hint: &'static str,

    // Raw metrics.
    pub delta_1s: f64,
    pub cvd: f64,
    pub ob_score: i32,
    pub oi: f64,
    pub oi_delta: f64,

    pub behavior: u8,
    pub event_flags: u32,
}

/// Build a row from a snapshot. Runs in the engine worker, off the trade
/// hot path.
pub fn build_row(snap: &Snapshot, event_flags: u32) -> LogRow {
    let score_1h = snap.htf[2].avg_score;
    let score_4h = snap.htf[3].avg_score;
    let score_1d = snap.htf[4].avg_score;

    let bias = htf_bias(score_1h, score_4h, score_1d);
    let state = market_state(bias, snap.final_score);
    let action = action_hint(bias, snap.final_score, snap.orderbook.imbalance);

    LogRow {
        timestamp: snap.time_ms,
        price: snap.price,
        final_score: snap.final_score,
        score_1s: snap.final_score,
        score_1m: snap.candle_1m.avg_score,
        score_5m: snap.htf[0].avg_score,
        score_15m: snap.htf[1].avg_score,
        score_1h,
        htf_bias: bias,
        market_state: state,
        action_hint: action,
        delta_1s: snap.candle_1s.delta,
        cvd: snap.cvd,
        ob_score: snap.orderbook.score,
        oi: snap.oi.oi,
        oi_delta: snap.oi.oi_delta_long,
        behavior: snap.oi.behavior,
        event_flags,
    }
}
