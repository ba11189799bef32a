//! Partial-depth stream worker — the sole mutator of the book.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{info, warn};

use super::{Backoff, DepthSink, WarnGate};
use crate::book::MAX_DEPTH;
use crate::errors::{ParseError, WsError};
use crate::model::PriceLevel;
use crate::prelude::{Error, Result};

/// Partial depth envelope: level arrays of `[price, quantity]` decimal
/// strings, bids descending, asks ascending.
#[derive(Debug, Deserialize)]
struct DepthEvent {
    #[serde(rename = "b", alias = "bids")]
    bids: Vec<Vec<String>>,
    #[serde(rename = "a", alias = "asks")]
    asks: Vec<Vec<String>>,
}

/// Parse one side into `out`, dropping malformed levels and levels with
/// non-positive quantity.
fn parse_levels(raw: &[Vec<String>], out: &mut Vec<PriceLevel>) {
    out.clear();
    for level in raw {
        if level.len() < 2 {
            continue;
        }
        let (Ok(price), Ok(quantity)) = (level[0].parse::<f64>(), level[1].parse::<f64>()) else {
            continue;
        };
        if quantity > 0.0 {
            out.push(PriceLevel::new(price, quantity));
        }
    }
}

/// Connects to the partial-depth stream and feeds full snapshots into the
/// depth sink.
pub struct DepthIngest<S> {
    url: String,
    sink: S,
}

impl<S: DepthSink + 'static> DepthIngest<S> {
    pub fn new(url: impl Into<String>, sink: S) -> Self {
        Self {
            url: url.into(),
            sink,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new();
        let mut gate = WarnGate::new(Duration::from_secs(5));

        // Parse buffers reused across messages.
        let mut bids = Vec::with_capacity(MAX_DEPTH);
        let mut asks = Vec::with_capacity(MAX_DEPTH);

        while !*shutdown.borrow() {
            let result = self
                .connect_and_consume(&mut shutdown, &mut gate, &mut backoff, &mut bids, &mut asks)
                .await;
            match result {
                Ok(()) => return,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(target: "orderflow::ingest", error = %e, ?delay, "depth stream lost, reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return,
                    }
                }
            }
        }
    }

    async fn connect_and_consume(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        gate: &mut WarnGate,
        backoff: &mut Backoff,
        bids: &mut Vec<PriceLevel>,
        asks: &mut Vec<PriceLevel>,
    ) -> Result<()> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::ws_connection(e.to_string()))?;
        info!(target: "orderflow::ingest", url = %self.url, "depth stream connected");
        backoff.reset();

        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<DepthEvent>(&text) {
                                Ok(event) => {
                                    parse_levels(&event.bids, bids);
                                    parse_levels(&event.asks, asks);
                                    self.sink.update_depth(bids, asks);
                                }
                                Err(e) => {
                                    if gate.allow() {
                                        warn!(
                                            target: "orderflow::ingest",
                                            error = %ParseError::Json(e.to_string()),
                                            "malformed depth event dropped"
                                        );
                                    }
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write
                                .send(Message::Pong(payload))
                                .await
                                .map_err(|e| WsError::Send(e.to_string()))?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Err(WsError::Closed.into()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(WsError::Connection(e.to_string()).into()),
                    }
                }
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sorted_levels_and_drops_empties() {
        let text = r#"{"lastUpdateId":123456,"E":1672515782136,"T":1672515782100,
            "b":[["16850.00","1.5"],["16849.50","0"],["16849.00","2.25"]],
            "a":[["16850.50","0.8"],["bad","1"],["16851.00"]]}"#;
        let event: DepthEvent = serde_json::from_str(text).unwrap();

        let mut bids = Vec::new();
        let mut asks = Vec::new();
        parse_levels(&event.bids, &mut bids);
        parse_levels(&event.asks, &mut asks);

        // Zero-quantity and malformed levels are gone.
        assert_eq!(
            bids,
            vec![
                PriceLevel::new(16_850.0, 1.5),
                PriceLevel::new(16_849.0, 2.25)
            ]
        );
        assert_eq!(asks, vec![PriceLevel::new(16_850.5, 0.8)]);
    }

    #[test]
    fn accepts_the_long_field_names() {
        let text = r#"{"bids":[["100.0","1.0"]],"asks":[["101.0","2.0"]]}"#;
        let event: DepthEvent = serde_json::from_str(text).unwrap();
        assert_eq!(event.bids.len(), 1);
        assert_eq!(event.asks.len(), 1);
    }

    #[test]
    fn buffers_are_cleared_between_messages() {
        let mut out = vec![PriceLevel::new(1.0, 1.0)];
        parse_levels(&[], &mut out);
        assert!(out.is_empty());
    }
}
