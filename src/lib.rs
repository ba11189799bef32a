//! Real-time orderflow analytics engine for a single perpetual futures
//! instrument.
//!
//! Three live feeds — aggregated trades, L2 partial depth, and periodic
//! open-interest samples — drive a tick-level pipeline that emits, on
//! every trade, an enriched multi-timeframe snapshot: aggressor flow
//! (CVD, candle deltas), book pressure, positioning behavior, and a fused
//! composite score. Snapshots fan out to WebSocket observers (with
//! streaming history hydration) and to an append-only daily CSV log.
//!
//! Concurrency model: each mutable component has exactly one writer
//! worker; cross-worker reads go through atomically swapped immutable
//! values ([`book::Pressure`], [`oi::OiState`], the last-price slot) or
//! by value through bounded channels. Nothing on the trade hot path
//! blocks on I/O.

#![deny(unreachable_pub)]

mod errors;
mod prelude;

pub mod book;
pub mod broadcast;
pub mod bus;
pub mod config;
pub mod engine;
pub mod history;
pub mod ingest;
pub mod logger;
pub mod logging;
pub mod model;
pub mod oi;
pub mod score;

pub use book::{Book, Pressure, PressureHandle, MAX_DEPTH};
pub use broadcast::Broadcaster;
pub use bus::TradeBus;
pub use config::AppConfig;
pub use engine::Engine;
pub use errors::{Error, ParseError, WsError};
pub use history::{load_recent, SnapshotRing};
pub use ingest::{DepthIngest, DepthSink, OiPoller, OiSink, TradeIngest, TradeSink};
pub use logger::{build_row, CsvSink, LogRow};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use model::{
    decode_snapshot, CandleSnapshot, OiSnapshot, OrderbookSnapshot, PriceLevel, Snapshot, Trade,
    NUM_HTF,
};
pub use oi::{OiBehavior, OiEngine, OiState, OiStateHandle};
pub use prelude::Result;
pub use score::{ScoreInput, Scorer};
