//! Core data model: trades, depth levels, and the enriched snapshot.

mod codec;
mod snapshot;
mod trade;

pub use codec::{count_header, decode_count_header, decode_snapshot, SNAPSHOT_WIRE_CAPACITY};
pub use snapshot::{CandleSnapshot, OiSnapshot, OrderbookSnapshot, Snapshot, NUM_HTF};
pub use trade::{PriceLevel, Trade};
