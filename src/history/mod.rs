//! In-memory snapshot history and restart recovery.

mod buffer;
mod loader;

pub use buffer::SnapshotRing;
pub use loader::load_recent;
