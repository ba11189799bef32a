//! Orderbook pressure engine.
//!
//! Maintains the current L2 partial depth and derives pressure metrics:
//!
//! 1. bid/ask volume imbalance over the top levels, in [-1, +1];
//! 2. liquidity velocity — change in summed bid/ask volume between
//!    consecutive snapshots (stacking vs pulling);
//! 3. absorption — best price stable across consecutive updates while the
//!    other side churns, in [-1, +1] (bid absorption positive);
//! 4. an integer pressure score in [-100, +100] fusing the three.
//!
//! The book is owned by a single writer (the depth ingest worker). Each
//! update computes a fresh [`Pressure`] and publishes it through an
//! `ArcSwap`; readers obtain a point-in-time copy with one atomic load and
//! never synchronize with the writer.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::model::PriceLevel;

/// Depth levels tracked per side.
pub const MAX_DEPTH: usize = 20;

/// Levels summed for the imbalance calculation.
const IMBALANCE_LEVELS: usize = 10;

/// Score weights: imbalance, liquidity velocity, absorption.
const W_IMBALANCE: f64 = 0.50;
const W_LIQ_VEL: f64 = 0.30;
const W_ABSORB: f64 = 0.20;

/// Net volume change that saturates the liquidity-velocity signal.
const LIQ_VEL_SCALE: f64 = 100.0;

/// Consecutive stable updates for a full absorption signal.
const STABILITY_SCALE: f64 = 10.0;

/// Computed book analytics. Immutable after publication.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pressure {
    pub best_bid: f64,
    pub best_ask: f64,
    /// `best_ask - best_bid`, never negative on a sane feed.
    pub spread: f64,
    /// Total bid volume over the top imbalance levels.
    pub bid_vol: f64,
    pub ask_vol: f64,
    /// Volume skew in [-1, +1]; +1 means all resting volume is on the bid.
    pub imbalance: f64,
    /// Bid volume growth minus ask volume growth since the last update.
    pub liq_vel: f64,
    /// Net absorption in [-1, +1]; bid absorption is bullish.
    pub absorb: f64,
    /// Fused pressure score in [-100, +100].
    pub score: i32,
}

/// Cloneable lock-free reader for the latest [`Pressure`].
#[derive(Clone)]
pub struct PressureHandle {
    slot: Arc<ArcSwap<Pressure>>,
}

impl PressureHandle {
    /// Latest published pressure. One atomic load; read once per use.
    #[inline]
    pub fn load(&self) -> Pressure {
        **self.slot.load()
    }
}

/// L2 book plus writer-private velocity and stability state.
pub struct Book {
    bids: [PriceLevel; MAX_DEPTH],
    asks: [PriceLevel; MAX_DEPTH],
    bid_n: usize,
    ask_n: usize,

    prev_bid_vol: f64,
    prev_ask_vol: f64,

    prev_best_bid: f64,
    prev_best_ask: f64,
    bid_stable: u32,
    ask_stable: u32,

    slot: Arc<ArcSwap<Pressure>>,
}

impl Default for Book {
    fn default() -> Self {
        Self::new()
    }
}

impl Book {
    pub fn new() -> Self {
        Self {
            bids: [PriceLevel::default(); MAX_DEPTH],
            asks: [PriceLevel::default(); MAX_DEPTH],
            bid_n: 0,
            ask_n: 0,
            prev_bid_vol: 0.0,
            prev_ask_vol: 0.0,
            prev_best_bid: 0.0,
            prev_best_ask: 0.0,
            bid_stable: 0,
            ask_stable: 0,
            slot: Arc::new(ArcSwap::from_pointee(Pressure::default())),
        }
    }

    /// Handle for lock-free readers.
    pub fn handle(&self) -> PressureHandle {
        PressureHandle {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Latest published pressure.
    pub fn pressure(&self) -> Pressure {
        **self.slot.load()
    }

    /// Replace the depth snapshot and publish fresh pressure metrics.
    ///
    /// `bids` must be sorted descending, `asks` ascending; levels with
    /// non-positive quantity are dropped upstream. Called from the depth
    /// ingest worker only.
    pub fn update(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bid_n = bids.len().min(MAX_DEPTH);
        self.bids[..self.bid_n].copy_from_slice(&bids[..self.bid_n]);

        self.ask_n = asks.len().min(MAX_DEPTH);
        self.asks[..self.ask_n].copy_from_slice(&asks[..self.ask_n]);

        self.compute_and_publish();
    }

    fn compute_and_publish(&mut self) {
        let mut p = Pressure::default();

        // One-sided or empty book: publish the zero pressure and leave the
        // velocity/stability state untouched.
        if self.bid_n == 0 || self.ask_n == 0 {
            self.slot.store(Arc::new(p));
            return;
        }

        p.best_bid = self.bids[0].price;
        p.best_ask = self.asks[0].price;
        p.spread = p.best_ask - p.best_bid;

        for level in &self.bids[..IMBALANCE_LEVELS.min(self.bid_n)] {
            p.bid_vol += level.quantity;
        }
        for level in &self.asks[..IMBALANCE_LEVELS.min(self.ask_n)] {
            p.ask_vol += level.quantity;
        }

        let total = p.bid_vol + p.ask_vol;
        if total > 0.0 {
            p.imbalance = (p.bid_vol - p.ask_vol) / total;
        }

        if self.prev_bid_vol > 0.0 || self.prev_ask_vol > 0.0 {
            let bid_delta = p.bid_vol - self.prev_bid_vol;
            let ask_delta = p.ask_vol - self.prev_ask_vol;
            p.liq_vel = bid_delta - ask_delta;
        }
        self.prev_bid_vol = p.bid_vol;
        self.prev_ask_vol = p.ask_vol;

        // Stability counters advance only once a previous best exists.
        if self.prev_best_bid > 0.0 {
            if p.best_bid == self.prev_best_bid {
                self.bid_stable += 1;
            } else {
                self.bid_stable = 0;
            }
        }
        if self.prev_best_ask > 0.0 {
            if p.best_ask == self.prev_best_ask {
                self.ask_stable += 1;
            } else {
                self.ask_stable = 0;
            }
        }

        let bid_stability = (f64::from(self.bid_stable) / STABILITY_SCALE).clamp(0.0, 1.0);
        let ask_stability = (f64::from(self.ask_stable) / STABILITY_SCALE).clamp(0.0, 1.0);
        p.absorb = (bid_stability - ask_stability).clamp(-1.0, 1.0);

        self.prev_best_bid = p.best_bid;
        self.prev_best_ask = p.best_ask;

        let liq_norm = (p.liq_vel / LIQ_VEL_SCALE).clamp(-1.0, 1.0);
        let raw = W_IMBALANCE * p.imbalance * 100.0
            + W_LIQ_VEL * liq_norm * 100.0
            + W_ABSORB * p.absorb * 100.0;
        // Round toward zero, then saturate.
        p.score = (raw as i32).clamp(-100, 100);

        self.slot.store(Arc::new(p));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(entries: &[(f64, f64)]) -> Vec<PriceLevel> {
        entries
            .iter()
            .map(|&(price, quantity)| PriceLevel::new(price, quantity))
            .collect()
    }

    #[test]
    fn empty_side_publishes_zero_pressure() {
        let mut book = Book::new();
        book.update(&levels(&[(30_000.0, 1.0)]), &[]);
        let p = book.pressure();
        assert_eq!(p, Pressure::default());
        assert_eq!(p.score, 0);
        assert!(p.imbalance == 0.0 && !p.imbalance.is_nan());
    }

    #[test]
    fn one_sided_imbalance_saturates() {
        let mut book = Book::new();
        // Ten bid levels totaling 100, one dust ask so both sides exist.
        let bids: Vec<PriceLevel> = (0..10)
            .map(|i| PriceLevel::new(30_000.0 - i as f64, 10.0))
            .collect();
        let asks = levels(&[(30_001.0, 1e-9)]);
        book.update(&bids, &asks);

        let p = book.pressure();
        assert!((p.imbalance - 1.0).abs() < 1e-9);
        assert_eq!(p.liq_vel, 0.0, "first update has no velocity");
        // 0.5 * imbalance * 100 truncated toward zero.
        assert_eq!(p.score, 49);
    }

    #[test]
    fn absorption_builds_over_stable_updates() {
        let mut book = Book::new();
        // Identical best bid across 11 updates, best ask walking away.
        // Equal volumes keep imbalance and velocity at zero, isolating the
        // absorption term.
        for i in 0..11 {
            let bids = levels(&[(30_000.0, 5.0)]);
            let asks = levels(&[(30_001.0 + i as f64, 5.0)]);
            book.update(&bids, &asks);
        }
        let p = book.pressure();
        assert_eq!(p.absorb, 1.0);
        assert_eq!(p.imbalance, 0.0);
        assert_eq!(p.liq_vel, 0.0);
        assert_eq!(p.score, 20);
    }

    #[test]
    fn stability_resets_when_best_moves() {
        let mut book = Book::new();
        for _ in 0..11 {
            book.update(
                &levels(&[(30_000.0, 5.0)]),
                &levels(&[(30_001.0, 5.0)]),
            );
        }
        assert_eq!(book.pressure().absorb, 0.0, "both sides equally stable");

        // Bid steps down: its counter resets while the ask stays stable.
        book.update(&levels(&[(29_999.0, 5.0)]), &levels(&[(30_001.0, 5.0)]));
        assert!(book.pressure().absorb < 0.0);
    }

    #[test]
    fn liquidity_velocity_tracks_volume_changes() {
        let mut book = Book::new();
        book.update(&levels(&[(30_000.0, 10.0)]), &levels(&[(30_001.0, 10.0)]));
        // Bids stack by 40, asks pull by 5.
        book.update(&levels(&[(30_000.0, 50.0)]), &levels(&[(30_001.0, 5.0)]));
        let p = book.pressure();
        assert_eq!(p.liq_vel, 45.0);
    }

    #[test]
    fn depth_is_truncated_to_max_levels() {
        let mut book = Book::new();
        let bids: Vec<PriceLevel> = (0..40)
            .map(|i| PriceLevel::new(30_000.0 - i as f64, 1.0))
            .collect();
        let asks: Vec<PriceLevel> = (0..40)
            .map(|i| PriceLevel::new(30_001.0 + i as f64, 1.0))
            .collect();
        book.update(&bids, &asks);

        let p = book.pressure();
        // Only the top ten levels feed the volume sums.
        assert_eq!(p.bid_vol, 10.0);
        assert_eq!(p.ask_vol, 10.0);
        assert_eq!(p.imbalance, 0.0);
    }

    #[test]
    fn score_stays_in_bounds() {
        let mut book = Book::new();
        for i in 0..50 {
            let bids = levels(&[(30_000.0, 1_000.0 + i as f64 * 500.0)]);
            let asks = levels(&[(30_001.0, 1e-9)]);
            book.update(&bids, &asks);
            let p = book.pressure();
            assert!((-100..=100).contains(&p.score));
            assert!((-1.0..=1.0).contains(&p.imbalance));
            assert!((-1.0..=1.0).contains(&p.absorb));
        }
    }

    #[test]
    fn readers_see_latest_publication() {
        let mut book = Book::new();
        let handle = book.handle();
        assert_eq!(handle.load(), Pressure::default());

        book.update(&levels(&[(30_000.0, 2.0)]), &levels(&[(30_002.0, 1.0)]));
        let p = handle.load();
        assert_eq!(p.best_bid, 30_000.0);
        assert_eq!(p.best_ask, 30_002.0);
        assert_eq!(p.spread, 2.0);
    }
}
