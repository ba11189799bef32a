//! Application configuration: TOML file with serde defaults, overridable
//! from the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;
use crate::prelude::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub feeds: FeedConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Upstream feed endpoints for the instrument.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Instrument symbol, lowercase as it appears in stream names.
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// WebSocket base for the market streams.
    #[serde(default = "default_ws_base")]
    pub ws_base: String,
    /// REST base for the open-interest endpoint.
    #[serde(default = "default_rest_base")]
    pub rest_base: String,
    /// Open-interest poll interval, seconds.
    #[serde(default = "default_oi_poll_secs")]
    pub oi_poll_secs: u64,
}

fn default_symbol() -> String {
    "btcusdt".to_string()
}

fn default_ws_base() -> String {
    "wss://fstream.binance.com/ws".to_string()
}

fn default_rest_base() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_oi_poll_secs() -> u64 {
    3
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            ws_base: default_ws_base(),
            rest_base: default_rest_base(),
            oi_poll_secs: default_oi_poll_secs(),
        }
    }
}

impl FeedConfig {
    pub fn trade_stream_url(&self) -> String {
        format!("{}/{}@aggTrade", self.ws_base, self.symbol)
    }

    /// Partial book depth: top 20 levels every 100 ms, a full snapshot per
    /// message.
    pub fn depth_stream_url(&self) -> String {
        format!("{}/{}@depth20@100ms", self.ws_base, self.symbol)
    }

    pub fn oi_url(&self) -> String {
        format!(
            "{}/fapi/v1/openInterest?symbol={}",
            self.rest_base,
            self.symbol.to_uppercase()
        )
    }

    pub fn oi_poll_interval(&self) -> Duration {
        Duration::from_secs(self.oi_poll_secs.max(1))
    }
}

/// Engine worker queue sizes and history depth.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Snapshot history capacity; 3600 is one hour at the 1 Hz cadence.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Engine subscriber queue on the trade bus.
    #[serde(default = "default_trade_queue")]
    pub trade_queue: usize,
    /// Live snapshot queue into the observer hub.
    #[serde(default = "default_snapshot_queue")]
    pub snapshot_queue: usize,
}

fn default_ring_capacity() -> usize {
    3600
}

fn default_trade_queue() -> usize {
    1024
}

fn default_snapshot_queue() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            trade_queue: default_trade_queue(),
            snapshot_queue: default_snapshot_queue(),
        }
    }
}

/// Observer transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// CSV sink location.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| Error::io(&e))?;
        toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))
    }

    /// Serialize the current config as sample TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Sanity-check the values that would otherwise fail deep inside a
    /// worker.
    pub fn validate(&self) -> Result<()> {
        if self.feeds.symbol.is_empty() {
            return Err(Error::Config("feeds.symbol must not be empty".into()));
        }
        if self.engine.ring_capacity == 0 {
            return Err(Error::Config("engine.ring_capacity must be > 0".into()));
        }
        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "server.listen_addr is not a socket address: {}",
                self.server.listen_addr
            )));
        }
        Ok(())
    }
}
