use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use softscope_session::SessionConfig;

use crate::exit::{config_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod discover;
pub mod simulate;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Probe the device and print its channel list.
    Discover(DiscoverArgs),
    /// Stream telemetry and print the latest values.
    Watch(WatchArgs),
    /// Run a software device that speaks the telemetry protocol.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Discover(args) => discover::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where to listen, where the device is, and how hard to look for it.
#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// JSON config file (ESP_IP, UDP_IP, UDP_PORT, MAX_POINTS, ...).
    #[arg(long, value_name = "FILE", env = "SOFTSCOPE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Local address to bind (overrides the config file).
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,
    /// Device address (overrides the config file).
    #[arg(long, value_name = "ADDR")]
    pub peer: Option<SocketAddr>,
    /// Samples kept per channel (overrides the config file).
    #[arg(long, value_name = "N")]
    pub max_points: Option<usize>,
    /// Wait for a metadata reply after each probe (e.g. 100ms).
    #[arg(long, value_name = "DURATION")]
    pub response_timeout: Option<String>,
    /// Give up discovery after N probes.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub attempts: Option<u32>,
}

impl ConnectArgs {
    /// Defaults, then the config file, then flags.
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => {
                SessionConfig::load(path).map_err(|err| config_error("config load failed", err))?
            }
            None => SessionConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(peer) = self.peer {
            config.peer = peer;
        }
        if let Some(max_points) = self.max_points {
            config.max_points = max_points;
        }
        if let Some(timeout) = &self.response_timeout {
            config.discovery.response_timeout = parse_duration(timeout)?;
        }
        if let Some(attempts) = self.attempts {
            config.discovery.max_attempts = Some(attempts);
        }

        config
            .validate()
            .map_err(|err| config_error("invalid settings", err))?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Channels to print (comma-separated). Default: all.
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<String>>,
    /// Time between printed updates (e.g. 500ms, 1s).
    #[arg(long, default_value = "500ms")]
    pub interval: String,
    /// Re-send START when no batch has arrived for this long.
    #[arg(long, default_value = "3s")]
    pub stall: String,
    /// Keepalive period; defaults to one second.
    #[arg(long, value_name = "DURATION")]
    pub keepalive: Option<String>,
    /// Stop after this long instead of waiting for Ctrl-C.
    #[arg(long, value_name = "DURATION")]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Address to bind the emulated device on.
    #[arg(long, default_value = "0.0.0.0:12345")]
    pub bind: SocketAddr,
    /// Channel names to advertise (comma-separated). Default: var0..var9.
    #[arg(long, value_delimiter = ',')]
    pub channels: Option<Vec<String>>,
    /// Stop streaming after this long without a keepalive.
    #[arg(long, default_value = "2s")]
    pub pulse_timeout: String,
    /// Exit after this long instead of waiting for Ctrl-C.
    #[arg(long, value_name = "DURATION")]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `150ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Clear the returned flag on Ctrl-C.
pub fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}
