/// Reasons a payload is not a valid message of the kind being decoded.
///
/// None of these are fatal. Decoders report them so callers can count and
/// discard the datagram; the retry loops above supply the resilience.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The payload is shorter than the fixed header of this message kind.
    #[error("payload too short ({len} bytes, need at least {min})")]
    TooShort { len: usize, min: usize },

    /// Metadata response does not start with 0xCD 0xAB.
    #[error("invalid metadata magic (expected 0xCD 0xAB)")]
    InvalidMetadataMagic,

    /// Telemetry batch sync marker is not 0xAA55.
    #[error("invalid batch sync marker 0x{found:04X} (expected 0xAA55)")]
    InvalidSync { found: u16 },

    /// A channel name runs past the end of the payload.
    #[error("channel name {index} truncated")]
    TruncatedName { index: usize },

    /// A channel name contains non-ASCII bytes.
    #[error("channel name {index} is not ASCII")]
    NonAsciiName { index: usize },

    /// The same channel name appears twice in one metadata response.
    #[error("duplicate channel name '{0}'")]
    DuplicateName(String),

    /// More channels than a one-byte count can describe.
    #[error("too many channels ({count}, max 255)")]
    TooManyChannels { count: usize },

    /// More snapshots than a one-byte count can describe.
    #[error("too many snapshots ({count}, max 255)")]
    TooManySnapshots { count: usize },

    /// A channel name longer than its one-byte length prefix allows.
    #[error("channel name too long ({len} bytes, max 255)")]
    NameTooLong { len: usize },

    /// A snapshot carries a different number of values than the batch declares.
    #[error("snapshot has {found} values, batch declares {expected} channels")]
    ValueCount { expected: usize, found: usize },
}

pub type Result<T> = std::result::Result<T, WireError>;
