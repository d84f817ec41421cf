//! Telemetry session management.
//!
//! This is the layer a consumer talks to. Discover the device's channels,
//! start the stream, and read live samples from the shared store while a
//! background thread keeps it filled:
//!
//! ```no_run
//! use softscope_session::{SessionConfig, TransportSession};
//!
//! # fn main() -> softscope_session::Result<()> {
//! let session = TransportSession::bind(SessionConfig::default())?;
//! let discovered = session.discover_channels()?;
//! let live = session.start_session(discovered)?;
//!
//! for name in live.channels() {
//!     let samples = live.store().snapshot(name).unwrap_or_default();
//!     println!("{name}: {} samples", samples.len());
//! }
//! live.send_keepalive();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod emulator;
pub mod error;
pub mod ingest;
pub mod session;

pub use config::{DiscoveryConfig, SessionConfig, Timebase};
pub use discovery::{Discovered, Discovery, DiscoveryStep};
pub use emulator::{
    demo_source, DeviceEmulator, EmulatorConfig, EmulatorHandle, EmulatorState, SampleSource,
};
pub use error::{ConfigError, Result, SessionError};
pub use ingest::{DropReason, IngestLoop, IngestOutcome, IngestStats, StatsSnapshot};
pub use session::{LiveSession, TransportSession};
