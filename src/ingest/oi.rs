//! Open-interest REST poller — the sole mutator of the OI engine.
//!
//! Polls off the hot path on a fixed interval and reads the latest trade
//! price from the engine's atomic slot. Poll failures are logged and the
//! previous published state stays visible.

use std::sync::Arc;
use std::time::Duration;

use portable_atomic::{AtomicF64, Ordering};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::OiSink;
use crate::errors::ParseError;
use crate::prelude::{Error, Result};

/// HTTP timeout; a hung poll must never outlive its interval.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OiResponse {
    open_interest: String,
}

fn parse_open_interest(body: &OiResponse) -> Result<f64> {
    body.open_interest
        .parse()
        .map_err(|_| ParseError::FloatString(body.open_interest.clone()).into())
}

/// Interval-driven open-interest poller.
pub struct OiPoller<S> {
    url: String,
    interval: Duration,
    sink: S,
    price: Arc<AtomicF64>,
    client: reqwest::Client,
}

impl<S: OiSink + 'static> OiPoller<S> {
    pub fn new(
        url: impl Into<String>,
        interval: Duration,
        sink: S,
        price: Arc<AtomicF64>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Request(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            interval,
            sink,
            price,
            client,
        })
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        warn!(target: "orderflow::ingest", error = %e, "OI poll failed");
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn poll(&mut self) -> Result<()> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::http(status.as_u16(), body));
        }

        let body: OiResponse = response
            .json()
            .await
            .map_err(|e| Error::json_parse(e.to_string()))?;
        let oi = parse_open_interest(&body)?;

        let price = self.price.load(Ordering::Relaxed);
        self.sink.update_oi(oi, price);
        debug!(target: "orderflow::ingest", oi, price, "OI updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_rest_body() {
        let body: OiResponse =
            serde_json::from_str(r#"{"openInterest":"10659.509","symbol":"BTCUSDT","time":1583127900000}"#)
                .unwrap();
        assert_eq!(parse_open_interest(&body).unwrap(), 10_659.509);
    }

    #[test]
    fn rejects_a_non_numeric_body() {
        let body = OiResponse {
            open_interest: "n/a".to_string(),
        };
        assert!(parse_open_interest(&body).is_err());
    }
}
