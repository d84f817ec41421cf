use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] softscope_transport::TransportError),

    /// Payload could not be encoded.
    #[error("wire error: {0}")]
    Wire(#[from] softscope_wire::WireError),

    /// Channel store rejected the discovered channel list.
    #[error("store error: {0}")]
    Store(#[from] softscope_store::StoreError),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Discovery gave up after the configured number of probes.
    #[error("no metadata response from {peer} after {attempts} attempts")]
    DiscoveryExhausted { peer: SocketAddr, attempts: u32 },

    /// The endpoint is owned by a running ingest loop.
    #[error("a live session is ingesting on this endpoint")]
    IngestActive,

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

/// Errors that can occur while loading a session configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not valid JSON or misses required keys.
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    /// An address field does not parse.
    #[error("invalid address in {field}: '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    /// A value is out of its allowed range.
    #[error("invalid {field}: {reason}")]
    OutOfRange {
        field: &'static str,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, SessionError>;
