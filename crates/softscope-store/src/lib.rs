//! Bounded per-channel sample buffers.
//!
//! One FIFO ring buffer per channel name. The ingest thread appends, the
//! consumer takes point-in-time copies for plotting. Each buffer has its own
//! lock, so a reader never sees a buffer mid-eviction and never blocks the
//! writer for longer than one copy.

pub mod buffer;
pub mod error;
pub mod store;

pub use buffer::{ChannelBuffer, Sample};
pub use error::{Result, StoreError};
pub use store::ChannelStore;
