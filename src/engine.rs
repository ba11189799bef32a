//! Tick-driven analytics engine — the hot path.
//!
//! The engine is the sole owner of CVD, the scorer, and all seven candle
//! buckets. Each timeframe carries its own EMA of the per-tick composite
//! score, so the same signal is readable at different responsiveness
//! profiles: the 1 s track flips with momentum while the 1 d track moves
//! only with structural pressure.
//!
//! Per trade it updates CVD, publishes the last price for the OI poller,
//! reads the book and OI publications (one atomic load each), runs the
//! composite scorer, folds the trade into every candle, and emits one
//! value-copied [`Snapshot`]. No locks, no allocation beyond the snapshot
//! itself, no I/O.

use std::sync::Arc;

use portable_atomic::{AtomicF64, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::book::PressureHandle;
use crate::history::SnapshotRing;
use crate::logger::{build_row, CsvSink};
use crate::model::{CandleSnapshot, OiSnapshot, OrderbookSnapshot, Snapshot, Trade, NUM_HTF};
use crate::oi::OiStateHandle;
use crate::score::{ScoreInput, Scorer};

/// Higher-timeframe bucket definitions: duration in seconds and the
/// score-EMA coefficient (alpha = 2/(N+1)).
const HTF_DEFS: [(i64, f64); NUM_HTF] = [
    (300, 0.039),    // 5m,  N≈50
    (900, 0.020),    // 15m, N≈100
    (3_600, 0.010),  // 1h,  N≈200
    (14_400, 0.004), // 4h,  N≈500
    (86_400, 0.002), // 1d,  N≈1000
];

/// Score-EMA coefficients for the two fast tracks.
const SCORE_ALPHA_1S: f64 = 0.333;
const SCORE_ALPHA_1M: f64 = 0.065;

/// OHLC + signed flow + score EMA for one time bucket.
#[derive(Debug, Clone, Copy)]
pub struct CandleDelta {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub buy_vol: f64,
    pub sell_vol: f64,
    pub delta: f64,
    pub avg_score: f64,
    score_alpha: f64,
}

impl CandleDelta {
    fn new(score_alpha: f64) -> Self {
        Self {
            time: 0,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            buy_vol: 0.0,
            sell_vol: 0.0,
            delta: 0.0,
            avg_score: 0.0,
            score_alpha,
        }
    }

    /// Fold one trade into the bucket, resetting on rollover.
    fn update(&mut self, bucket_time: i64, price: f64, qty: f64, delta: f64, score: f64) {
        if self.time != bucket_time {
            self.time = bucket_time;
            self.open = price;
            self.high = price;
            self.low = price;
            self.close = price;
            self.buy_vol = 0.0;
            self.sell_vol = 0.0;
            self.delta = 0.0;
            // Seed the EMA with the first score of the bucket.
            self.avg_score = score;
            return;
        }

        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;

        if delta > 0.0 {
            self.buy_vol += qty;
        } else {
            self.sell_vol += qty;
        }
        self.delta += delta;

        self.avg_score = self.score_alpha * score + (1.0 - self.score_alpha) * self.avg_score;
    }

    fn snapshot(&self) -> CandleSnapshot {
        CandleSnapshot {
            time: self.time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            buy_vol: self.buy_vol,
            sell_vol: self.sell_vol,
            delta: self.delta,
            avg_score: self.avg_score,
        }
    }
}

/// The per-trade analytics pipeline.
pub struct Engine {
    cvd: f64,

    candle_1s: CandleDelta,
    candle_1m: CandleDelta,
    htf: [CandleDelta; NUM_HTF],

    scorer: Scorer,

    pressure: PressureHandle,
    oi: OiStateHandle,

    last_price: Arc<AtomicF64>,
}

impl Engine {
    pub fn new(pressure: PressureHandle, oi: OiStateHandle) -> Self {
        let mut htf = [CandleDelta::new(0.0); NUM_HTF];
        for (candle, (_, alpha)) in htf.iter_mut().zip(HTF_DEFS) {
            candle.score_alpha = alpha;
        }
        Self {
            cvd: 0.0,
            candle_1s: CandleDelta::new(SCORE_ALPHA_1S),
            candle_1m: CandleDelta::new(SCORE_ALPHA_1M),
            htf,
            scorer: Scorer::new(),
            pressure,
            oi,
            last_price: Arc::new(AtomicF64::new(0.0)),
        }
    }

    /// Shared slot the OI poller reads the latest trade price from.
    pub fn price_slot(&self) -> Arc<AtomicF64> {
        Arc::clone(&self.last_price)
    }

    pub fn last_price(&self) -> f64 {
        self.last_price.load(Ordering::Relaxed)
    }

    pub fn cvd(&self) -> f64 {
        self.cvd
    }

    /// Process one trade and emit its snapshot.
    pub fn process_trade(&mut self, trade: &Trade) -> Snapshot {
        let price = trade.price;
        let qty = trade.quantity;
        let trade_time_sec = trade.time_ms / 1000;
        let trade_time_min = trade_time_sec / 60 * 60;

        let delta = trade.signed_delta();
        self.cvd += delta;
        self.last_price.store(price, Ordering::Relaxed);

        let pressure = self.pressure.load();
        let oi_state = self.oi.load();

        // The scorer sees the 1 s delta before this tick is folded in; on
        // bucket rollover that is the prior bucket's closing delta.
        let final_score = self.scorer.update(ScoreInput {
            cvd: self.cvd,
            delta_1s: self.candle_1s.delta,
            ob_score: pressure.score,
            oi_delta_long: oi_state.oi_delta_long,
            oi_behavior: oi_state.behavior.as_u8(),
        });

        self.candle_1s
            .update(trade_time_sec, price, qty, delta, final_score);
        self.candle_1m
            .update(trade_time_min, price, qty, delta, final_score);
        for (candle, (seconds, _)) in self.htf.iter_mut().zip(HTF_DEFS) {
            let bucket_time = trade_time_sec / seconds * seconds;
            candle.update(bucket_time, price, qty, delta, final_score);
        }

        let mut snapshot = Snapshot {
            price,
            time_ms: trade.time_ms,
            cvd: self.cvd,
            candle_1s: self.candle_1s.snapshot(),
            candle_1m: self.candle_1m.snapshot(),
            orderbook: OrderbookSnapshot {
                best_bid: pressure.best_bid,
                best_ask: pressure.best_ask,
                spread: pressure.spread,
                imbalance: pressure.imbalance,
                score: pressure.score,
            },
            oi: OiSnapshot {
                oi: oi_state.oi,
                oi_delta_short: oi_state.oi_delta_short,
                oi_delta_long: oi_state.oi_delta_long,
                behavior: oi_state.behavior.as_u8(),
            },
            final_score,
            htf: [CandleSnapshot::default(); NUM_HTF],
        };
        for (slot, candle) in snapshot.htf.iter_mut().zip(&self.htf) {
            *slot = candle.snapshot();
        }

        snapshot
    }
}

/// The engine worker loop: drains the trade bus, emits snapshots, and
/// performs the non-blocking downstream offers.
///
/// The ring receives the freshest snapshot of each completed second; the
/// CSV sink receives at most one row per 1 s candle. Runs until the bus
/// closes or shutdown fires.
pub async fn run_worker(
    mut engine: Engine,
    mut trade_rx: mpsc::Receiver<Trade>,
    ring: Arc<SnapshotRing>,
    snapshot_tx: mpsc::Sender<Snapshot>,
    csv_sink: CsvSink,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending_second: Option<Snapshot> = None;
    let mut last_logged_second: i64 = 0;

    loop {
        tokio::select! {
            trade = trade_rx.recv() => {
                let Some(trade) = trade else { break };
                let snapshot = engine.process_trade(&trade);

                match &mut pending_second {
                    Some(held) if held.candle_1s.time != snapshot.candle_1s.time => {
                        ring.push(*held);
                        pending_second = Some(snapshot);
                    }
                    _ => pending_second = Some(snapshot),
                }

                if snapshot_tx.try_send(snapshot).is_err() {
                    tracing::debug!(target: "orderflow::engine", "live snapshot dropped, hub backed up");
                }

                if snapshot.candle_1s.time != last_logged_second {
                    last_logged_second = snapshot.candle_1s.time;
                    csv_sink.log(build_row(&snapshot, 0));
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    // The current second never completed; keep its freshest snapshot.
    if let Some(held) = pending_second {
        ring.push(held);
    }
    info!(target: "orderflow::engine", "engine worker stopped");
}
