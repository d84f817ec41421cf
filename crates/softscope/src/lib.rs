//! Live UDP telemetry collector for embedded devices.
//!
//! softscope discovers a device's channels over UDP, starts its telemetry
//! stream and keeps the most recent samples of every channel in bounded
//! buffers that a plotting or logging consumer reads on its own schedule.
//!
//! # Crate Structure
//!
//! - [`transport`]: UDP endpoint with bounded-wait receives
//! - [`wire`]: codec for commands, metadata responses and telemetry batches
//! - [`store`]: per-channel ring buffers shared between ingest and readers
//! - [`session`]: discovery, commands, the ingest loop and a device emulator

/// Re-export transport types.
pub mod transport {
    pub use softscope_transport::*;
}

/// Re-export wire codec types.
pub mod wire {
    pub use softscope_wire::*;
}

/// Re-export channel store types.
pub mod store {
    pub use softscope_store::*;
}

/// Re-export session types.
pub mod session {
    pub use softscope_session::*;
}
