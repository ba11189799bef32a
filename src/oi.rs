//! Open-interest behavior engine.
//!
//! Consumes periodic OI samples together with the latest trade price and
//! derives short- and long-horizon OI deltas plus a five-state behavior
//! classification of (price, OI) co-movement:
//!
//! | price | OI | behavior |
//! |-------|----|----------|
//! | up    | up | long buildup |
//! | down  | up | short buildup |
//! | up    | down | short covering |
//! | down  | down | long liquidation |
//!
//! Anything below the noise floors is neutral. Written by the single OI
//! poller worker; readers get a point-in-time [`OiState`] through one
//! atomic load.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// Samples retained for the long-horizon delta (~60 s at the 3 s poll
/// cadence).
pub const OI_RING_LEN: usize = 20;

/// OI must move by this fraction of its previous value to count.
const OI_NOISE_FRACTION: f64 = 1e-4;

/// Price must move by at least this much (price units) to count.
const PRICE_NOISE_FLOOR: f64 = 1.0;

/// Classification of (price, OI) co-movement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum OiBehavior {
    #[default]
    Neutral = 0,
    /// New longs opening: price up, OI up.
    LongBuildup = 1,
    /// New shorts opening: price down, OI up.
    ShortBuildup = 2,
    /// Shorts closing: price up, OI down.
    ShortCovering = 3,
    /// Longs closing: price down, OI down.
    LongLiquidation = 4,
}

impl OiBehavior {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire value; unknown values map to neutral.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::LongBuildup,
            2 => Self::ShortBuildup,
            3 => Self::ShortCovering,
            4 => Self::LongLiquidation,
            _ => Self::Neutral,
        }
    }
}

/// Computed OI analytics. Immutable after publication.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OiState {
    /// Current open interest, contracts.
    pub oi: f64,
    /// Change since the previous poll.
    pub oi_delta_short: f64,
    /// Change over the ring lookback (~1 minute).
    pub oi_delta_long: f64,
    /// Price when this sample was taken.
    pub price_at_sample: f64,
    pub behavior: OiBehavior,
}

/// Cloneable lock-free reader for the latest [`OiState`].
#[derive(Clone)]
pub struct OiStateHandle {
    slot: Arc<ArcSwap<OiState>>,
}

impl OiStateHandle {
    /// Latest published state. One atomic load; read once per use.
    #[inline]
    pub fn load(&self) -> OiState {
        **self.slot.load()
    }
}

/// OI engine owned by the poller worker.
pub struct OiEngine {
    slot: Arc<ArcSwap<OiState>>,

    prev_oi: f64,
    prev_price: f64,

    ring: [f64; OI_RING_LEN],
    ring_idx: usize,
    ring_len: usize,
}

impl Default for OiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OiEngine {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(ArcSwap::from_pointee(OiState::default())),
            prev_oi: 0.0,
            prev_price: 0.0,
            ring: [0.0; OI_RING_LEN],
            ring_idx: 0,
            ring_len: 0,
        }
    }

    /// Handle for lock-free readers.
    pub fn handle(&self) -> OiStateHandle {
        OiStateHandle {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Latest published state.
    pub fn state(&self) -> OiState {
        **self.slot.load()
    }

    /// Fold in a fresh OI sample. Called from the poller worker only.
    pub fn update(&mut self, oi: f64, current_price: f64) {
        let mut state = OiState {
            oi,
            price_at_sample: current_price,
            ..Default::default()
        };

        if self.prev_oi > 0.0 {
            state.oi_delta_short = oi - self.prev_oi;
        }

        // The slot at ring_idx holds the oldest retained sample once the
        // ring has wrapped.
        if self.ring_len >= OI_RING_LEN {
            state.oi_delta_long = oi - self.ring[self.ring_idx];
        }
        self.ring[self.ring_idx] = oi;
        self.ring_idx = (self.ring_idx + 1) % OI_RING_LEN;
        if self.ring_len < OI_RING_LEN {
            self.ring_len += 1;
        }

        if self.prev_oi > 0.0 && self.prev_price > 0.0 {
            let oi_change = oi - self.prev_oi;
            let price_change = current_price - self.prev_price;

            let oi_threshold = self.prev_oi * OI_NOISE_FRACTION;

            let oi_up = oi_change > oi_threshold;
            let oi_down = oi_change < -oi_threshold;
            let price_up = price_change > PRICE_NOISE_FLOOR;
            let price_down = price_change < -PRICE_NOISE_FLOOR;

            state.behavior = match (price_up, price_down, oi_up, oi_down) {
                (true, _, true, _) => OiBehavior::LongBuildup,
                (_, true, true, _) => OiBehavior::ShortBuildup,
                (true, _, _, true) => OiBehavior::ShortCovering,
                (_, true, _, true) => OiBehavior::LongLiquidation,
                _ => OiBehavior::Neutral,
            };
        }

        self.prev_oi = oi;
        self.prev_price = current_price;

        self.slot.store(Arc::new(state));
    }
}
