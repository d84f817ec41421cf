//! UDP transport for the softscope telemetry collector.
//!
//! Owns the single datagram socket a session talks through. Everything
//! above this layer (codec, discovery, ingest) builds on the
//! [`UdpEndpoint`] type provided here.
//!
//! Receive timeouts and connection-reset notifications are not errors at
//! this layer: [`UdpEndpoint::recv_from`] reports them as "no datagram".

pub mod error;
pub mod udp;

pub use error::{Result, TransportError};
pub use udp::{UdpEndpoint, MAX_DATAGRAM_SIZE};
