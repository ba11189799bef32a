//! Feed ingest workers and the seams they publish through.
//!
//! Workers depend on the small sink traits below rather than on the bus,
//! book, or OI engine concretely, so the pipeline can be fed from tests
//! or replayed captures the same way it is fed from live streams.

mod depth;
mod oi;
mod trades;

pub use depth::DepthIngest;
pub use oi::OiPoller;
pub use trades::TradeIngest;

use std::time::{Duration, Instant};

use crate::book::Book;
use crate::bus::TradeBus;
use crate::model::{PriceLevel, Trade};
use crate::oi::OiEngine;

/// Where parsed trades are delivered.
pub trait TradeSink: Send + Sync {
    fn publish(&self, trade: Trade);
}

/// Where parsed depth snapshots are delivered. The worker is the sole
/// mutator of its sink.
pub trait DepthSink: Send {
    fn update_depth(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]);
}

/// Where open-interest samples are delivered.
pub trait OiSink: Send {
    fn update_oi(&mut self, oi: f64, price: f64);
}

impl TradeSink for TradeBus {
    fn publish(&self, trade: Trade) {
        TradeBus::publish(self, trade)
    }
}

impl DepthSink for Book {
    fn update_depth(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.update(bids, asks)
    }
}

impl OiSink for OiEngine {
    fn update_oi(&mut self, oi: f64, price: f64) {
        self.update(oi, price)
    }
}

/// Initial reconnect delay.
const RECONNECT_INITIAL: Duration = Duration::from_secs(1);

/// Reconnect delay cap.
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Jitter applied to each delay to avoid synchronized reconnects.
const RECONNECT_JITTER: f64 = 0.2;

/// Exponential reconnect backoff, reset on a successful connection.
pub(crate) struct Backoff {
    delay: Duration,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self {
            delay: RECONNECT_INITIAL,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.delay = RECONNECT_INITIAL;
    }

    /// Current delay with jitter; doubles the base up to the cap.
    pub(crate) fn next_delay(&mut self) -> Duration {
        use rand::Rng;
        let jitter = rand::thread_rng().gen_range(1.0 - RECONNECT_JITTER..=1.0 + RECONNECT_JITTER);
        let delay = self.delay.mul_f64(jitter);
        self.delay = (self.delay * 2).min(RECONNECT_MAX);
        delay
    }
}

/// Rate limit for malformed-payload warnings so a poisoned stream cannot
/// flood the logs.
pub(crate) struct WarnGate {
    last: Option<Instant>,
    period: Duration,
}

impl WarnGate {
    pub(crate) fn new(period: Duration) -> Self {
        Self { last: None, period }
    }

    pub(crate) fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
