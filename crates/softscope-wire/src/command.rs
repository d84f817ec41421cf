//! Control commands sent from the collector to the device.
//!
//! Commands are bare ASCII literals with no body and no acknowledgement.

use std::time::Duration;

/// How often the consumer should send [`Command::Pulse`].
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(1);

/// Silence after which the device stops streaming and waits for `METADATA`.
pub const PEER_PULSE_TIMEOUT: Duration = Duration::from_millis(2000);

const METADATA: &[u8] = b"METADATA";
const START: &[u8] = b"START";
const PULSE: &[u8] = b"PULSE";

/// A collector-to-device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Ask the device to describe its channels.
    Metadata,
    /// Begin streaming telemetry batches.
    Start,
    /// Liveness ping; keeps an active stream alive.
    Pulse,
}

impl Command {
    /// The literal payload for this command.
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Command::Metadata => METADATA,
            Command::Start => START,
            Command::Pulse => PULSE,
        }
    }

    /// Human-readable command name.
    pub const fn name(self) -> &'static str {
        match self {
            Command::Metadata => "METADATA",
            Command::Start => "START",
            Command::Pulse => "PULSE",
        }
    }

    /// Recognise a command payload.
    ///
    /// Matching is exact. Trailing NUL bytes are ignored since C senders
    /// sometimes include the terminator.
    pub fn decode(payload: &[u8]) -> Option<Command> {
        let end = payload
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |pos| pos + 1);
        match &payload[..end] {
            METADATA => Some(Command::Metadata),
            START => Some(Command::Start),
            PULSE => Some(Command::Pulse),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_match_protocol() {
        assert_eq!(Command::Metadata.as_bytes(), b"METADATA");
        assert_eq!(Command::Start.as_bytes(), b"START");
        assert_eq!(Command::Pulse.as_bytes(), b"PULSE");
    }

    #[test]
    fn decode_recognises_each_command() {
        for cmd in [Command::Metadata, Command::Start, Command::Pulse] {
            assert_eq!(Command::decode(cmd.as_bytes()), Some(cmd));
        }
    }

    #[test]
    fn decode_ignores_trailing_nul() {
        assert_eq!(Command::decode(b"START\0"), Some(Command::Start));
    }

    #[test]
    fn decode_rejects_prefixes_and_noise() {
        assert_eq!(Command::decode(b"STAR"), None);
        assert_eq!(Command::decode(b"STARTX"), None);
        assert_eq!(Command::decode(b"pulse"), None);
        assert_eq!(Command::decode(b""), None);
        assert_eq!(Command::decode(&[0xAA, 0x55]), None);
    }
}
