//! Trade fan-out bus.
//!
//! Fans freshly ingested trades out to engine subscribers over bounded
//! per-subscriber queues. Publishing is a non-blocking offer: a slow
//! subscriber loses trades rather than stalling ingest.

use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::model::Trade;

pub struct TradeBus {
    subscribers: RwLock<Vec<mpsc::Sender<Trade>>>,
}

impl Default for TradeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register a subscriber with its own bounded queue.
    pub fn subscribe(&self, buffer: usize) -> mpsc::Receiver<Trade> {
        let (tx, rx) = mpsc::channel(buffer);
        self.subscribers.write().unwrap().push(tx);
        rx
    }

    /// Offer the trade to every subscriber, dropping on full or closed
    /// queues.
    pub fn publish(&self, trade: Trade) {
        let subscribers = self.subscribers.read().unwrap();
        for tx in subscribers.iter() {
            if let Err(e) = tx.try_send(trade) {
                tracing::trace!(error = %e, "trade dropped for slow subscriber");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}
