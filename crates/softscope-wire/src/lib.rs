//! Wire codec for the softscope UDP telemetry protocol.
//!
//! Three message shapes share one UDP port:
//! - Control commands: the literals `METADATA`, `START` and `PULSE`
//! - Metadata response: magic `0xCD 0xAB`, channel count, length-prefixed names
//! - Telemetry batch: 6-byte header (sync `0xAA55`, sequence, snapshot count,
//!   channel count) followed by fixed-size snapshots
//!
//! The codec is stateless and never panics on hostile input. Decoders return
//! [`WireError`] to say "not a valid message of this kind"; callers discard.

pub mod batch;
pub mod command;
pub mod error;
pub mod metadata;

pub use batch::{
    snapshot_size, BatchHeader, Snapshot, TelemetryBatch, BATCH_HEADER_SIZE, CRC_PLACEHOLDER_SIZE,
    SYNC,
};
pub use command::{Command, KEEPALIVE_PERIOD, PEER_PULSE_TIMEOUT};
pub use error::{Result, WireError};
pub use metadata::{
    decode_metadata_response, encode_metadata_response, METADATA_HEADER_SIZE, METADATA_MAGIC,
};
