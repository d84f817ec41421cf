use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use softscope_wire::KEEPALIVE_PERIOD;

use crate::error::ConfigError;

/// Default UDP port shared by the collector and the device.
pub const DEFAULT_PORT: u16 = 12345;

/// Default static address of the device.
pub const DEFAULT_PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 137, 50);

/// Default samples retained per channel.
pub const DEFAULT_MAX_POINTS: usize = 2000;

/// Receive wait of the ingest loop; keeps it responsive to shutdown.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Controls the metadata probe loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// How long to wait for a reply after each probe.
    pub response_timeout: Duration,
    /// Pause before re-probing after a timeout or an invalid reply.
    pub backoff: Duration,
    /// Give up after this many probes. `None` retries forever, since the
    /// device may simply not be powered on yet.
    pub max_attempts: Option<u32>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(100),
            backoff: Duration::from_millis(50),
            max_attempts: None,
        }
    }
}

/// Oscilloscope-style horizontal scale. Display only; ingestion ignores it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timebase {
    pub time_per_div_ms: f64,
    pub num_divs: u32,
}

impl Timebase {
    /// Width of the visible time window.
    pub fn window_ms(&self) -> f64 {
        self.time_per_div_ms * self.num_divs as f64
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self {
            time_per_div_ms: 10.0,
            num_divs: 10,
        }
    }
}

/// Everything a collector session needs to know up front.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Local address to bind.
    pub bind: SocketAddr,
    /// Device address metadata probes are sent to.
    pub peer: SocketAddr,
    /// Samples retained per channel.
    pub max_points: usize,
    pub timebase: Timebase,
    pub discovery: DiscoveryConfig,
    /// Bounded wait of each ingest receive.
    pub recv_timeout: Duration,
    /// Interval between keepalive pulses sent by the consumer.
    pub keepalive_period: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            peer: SocketAddr::new(IpAddr::V4(DEFAULT_PEER_IP), DEFAULT_PORT),
            max_points: DEFAULT_MAX_POINTS,
            timebase: Timebase::default(),
            discovery: DiscoveryConfig::default(),
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            keepalive_period: KEEPALIVE_PERIOD,
        }
    }
}

/// On-disk layout shared with the device toolchain.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(rename = "ESP_IP")]
    esp_ip: String,
    #[serde(rename = "UDP_IP")]
    udp_ip: String,
    #[serde(rename = "UDP_PORT")]
    udp_port: u16,
    #[serde(rename = "MAX_POINTS")]
    max_points: usize,
    #[serde(rename = "TIME_PER_DIV", default)]
    time_per_div: Option<f64>,
    #[serde(rename = "NUM_DIVS", default)]
    num_divs: Option<u32>,
}

impl SessionConfig {
    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse a JSON config document.
    ///
    /// `UDP_PORT` is used both for the local bind and for the device. An
    /// empty `UDP_IP` means all interfaces.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(text)?;
        let defaults = Timebase::default();

        let config = Self {
            bind: SocketAddr::new(parse_ip("UDP_IP", &file.udp_ip)?, file.udp_port),
            peer: SocketAddr::new(parse_ip("ESP_IP", &file.esp_ip)?, file.udp_port),
            max_points: file.max_points,
            timebase: Timebase {
                time_per_div_ms: file.time_per_div.unwrap_or(defaults.time_per_div_ms),
                num_divs: file.num_divs.unwrap_or(defaults.num_divs),
            },
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_points == 0 {
            return Err(ConfigError::OutOfRange {
                field: "MAX_POINTS",
                reason: "must be at least 1",
            });
        }
        let per_div = self.timebase.time_per_div_ms;
        if !per_div.is_finite() || per_div <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "TIME_PER_DIV",
                reason: "must be a positive number of milliseconds",
            });
        }
        if self.timebase.num_divs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "NUM_DIVS",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
    trimmed.parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}
