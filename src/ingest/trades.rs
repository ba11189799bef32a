//! Aggregated-trade stream worker.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{info, warn};

use super::{Backoff, TradeSink, WarnGate};
use crate::errors::{ParseError, WsError};
use crate::model::Trade;
use crate::prelude::{Error, Result};

/// Aggregated trade event envelope. Prices and quantities arrive as
/// decimal strings.
#[derive(Debug, Deserialize)]
struct AggTradeEvent {
    /// Aggregate trade id.
    #[serde(rename = "a")]
    id: i64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    /// Trade time, unix milliseconds.
    #[serde(rename = "T")]
    time_ms: i64,
    /// True when the buyer is the maker, i.e. the aggressor sold.
    #[serde(rename = "m")]
    is_maker_buyer: bool,
}

fn parse_trade(text: &str) -> Result<Trade> {
    let event: AggTradeEvent =
        serde_json::from_str(text).map_err(|e| ParseError::Json(e.to_string()))?;
    let price = event
        .price
        .parse()
        .map_err(|_| ParseError::FloatString(event.price.clone()))?;
    let quantity = event
        .quantity
        .parse()
        .map_err(|_| ParseError::FloatString(event.quantity.clone()))?;
    Ok(Trade {
        id: event.id,
        price,
        quantity,
        time_ms: event.time_ms,
        is_maker_buyer: event.is_maker_buyer,
    })
}

/// Connects to the aggregated-trade stream and publishes parsed trades.
pub struct TradeIngest<S> {
    url: String,
    sink: Arc<S>,
}

impl<S: TradeSink + 'static> TradeIngest<S> {
    pub fn new(url: impl Into<String>, sink: Arc<S>) -> Self {
        Self {
            url: url.into(),
            sink,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new();
        let mut gate = WarnGate::new(Duration::from_secs(5));

        while !*shutdown.borrow() {
            match self.connect_and_consume(&mut shutdown, &mut gate, &mut backoff).await {
                Ok(()) => return,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(target: "orderflow::ingest", error = %e, ?delay, "trade stream lost, reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return,
                    }
                }
            }
        }
    }

    /// Returns `Ok` only on shutdown; any stream end is an error that
    /// triggers a reconnect.
    async fn connect_and_consume(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        gate: &mut WarnGate,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::ws_connection(e.to_string()))?;
        info!(target: "orderflow::ingest", url = %self.url, "trade stream connected");
        backoff.reset();

        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match parse_trade(&text) {
                            Ok(trade) => self.sink.publish(trade),
                            Err(e) => {
                                if gate.allow() {
                                    warn!(target: "orderflow::ingest", error = %e, "malformed trade event dropped");
                                }
                            }
                        },
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
