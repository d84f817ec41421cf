use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use softscope_session::{DeviceEmulator, EmulatorConfig};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, SimulateArgs};
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_listening, ListeningOutput, OutputFormat};

const POLL: Duration = Duration::from_millis(50);

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = EmulatorConfig {
        bind: args.bind,
        pulse_timeout: parse_duration(&args.pulse_timeout)?,
        ..EmulatorConfig::default()
    };
    if let Some(channels) = args.channels {
        config.channels = channels;
    }
    let deadline = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|d| Instant::now() + d);

    let running = install_ctrlc_handler()?;
    let channels = config.channels.clone();
    let emulator =
        DeviceEmulator::bind(config).map_err(|err| session_error("emulator start failed", err))?;
    let handle = emulator
        .spawn()
        .map_err(|err| session_error("emulator start failed", err))?;

    print_listening(
        &ListeningOutput {
            kind: "listening",
            local: handle.local_addr(),
            channels: &channels,
        },
        format,
    );

    let mut last_state = handle.state();
    while running.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
        let state = handle.state();
        if state != last_state {
            info!(from = %last_state, to = %state, "device state changed");
            last_state = state;
        }
        thread::sleep(POLL);
    }

    handle.stop();
    Ok(SUCCESS)
}
