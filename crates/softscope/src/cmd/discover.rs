use softscope_session::TransportSession;
use tracing::debug;

use crate::cmd::DiscoverArgs;
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_discovery, DiscoveryOutput, OutputFormat};

/// Probe budget when `--attempts` is not given; a one-shot probe should end.
const DEFAULT_ATTEMPTS: u32 = 20;

pub fn run(args: DiscoverArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = args.connect.session_config()?;
    config.discovery.max_attempts = config.discovery.max_attempts.or(Some(DEFAULT_ATTEMPTS));

    let session = TransportSession::bind(config).map_err(|err| session_error("bind failed", err))?;
    let mut discovery = session
        .discovery()
        .map_err(|err| session_error("discovery failed", err))?;
    let discovered = discovery
        .run()
        .map_err(|err| session_error("discovery failed", err))?;
    debug!(attempts = discovery.attempts(), "discovery finished");

    let out = DiscoveryOutput {
        kind: "discovery",
        peer: discovered.peer,
        local: session.local_addr(),
        channels: &discovered.channels,
        attempts: discovery.attempts(),
    };
    print_discovery(&out, format);

    Ok(SUCCESS)
}

