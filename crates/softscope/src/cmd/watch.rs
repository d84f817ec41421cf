use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use softscope_session::{Discovered, LiveSession, TransportSession};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, WatchArgs};
use crate::exit::{session_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_watch_tick, ChannelReading, OutputFormat, WatchTick};

/// Granularity of the consumer loop.
const TICK: Duration = Duration::from_millis(10);

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = args.connect.session_config()?;
    let interval = parse_duration(&args.interval)?;
    let stall = parse_duration(&args.stall)?;
    if let Some(keepalive) = &args.keepalive {
        config.keepalive_period = parse_duration(keepalive)?;
    }
    let deadline = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|d| Instant::now() + d);

    let running = install_ctrlc_handler()?;
    let session = TransportSession::bind(config).map_err(|err| session_error("bind failed", err))?;

    let Some(discovered) = discover(&session, &running, deadline)? else {
        return Ok(SUCCESS);
    };
    let selected = select_channels(&discovered.channels, args.channels.as_deref())?;

    let live = session
        .start_session(discovered)
        .map_err(|err| session_error("session start failed", err))?;

    let keepalive_period = session.config().keepalive_period;
    let started = Instant::now();
    let mut last_keepalive = started;
    let mut last_print = started;
    let mut last_restart = started;

    while running.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
        let now = Instant::now();

        if now.duration_since(last_keepalive) >= keepalive_period {
            live.send_keepalive();
            last_keepalive = now;
        }

        if now.duration_since(last_print) >= interval {
            print_tick(&live, &selected, started, format);
            last_print = now;
        }

        let quiet = live
            .stats()
            .since_last_batch()
            .unwrap_or_else(|| now.duration_since(started));
        if quiet >= stall && now.duration_since(last_restart) >= stall {
            warn!(
                quiet_ms = quiet.as_millis() as u64,
                peer = %live.peer(),
                "no telemetry, re-sending START"
            );
            live.resend_start();
            last_restart = now;
        }

        thread::sleep(TICK);
    }

    print_tick(&live, &selected, started, format);
    let stats = live.stats();
    info!(
        batches = stats.batches,
        snapshots = stats.snapshots,
        malformed = stats.malformed,
        "watch finished"
    );
    live.stop();

    Ok(SUCCESS)
}

/// Ctrl-C and `--duration` interrupt discovery too.
fn discover(
    session: &TransportSession,
    running: &AtomicBool,
    deadline: Option<Instant>,
) -> CliResult<Option<Discovered>> {
    session
        .discovery()
        .and_then(|mut discovery| discovery.run_while(running, deadline))
        .map_err(|err| session_error("discovery failed", err))
}

fn select_channels(available: &[String], requested: Option<&[String]>) -> CliResult<Vec<String>> {
    let Some(requested) = requested else {
        return Ok(available.to_vec());
    };
    if let Some(unknown) = requested.iter().find(|name| !available.contains(name)) {
        return Err(CliError::new(
            USAGE,
            format!(
                "unknown channel '{unknown}'; device has: {}",
                available.join(",")
            ),
        ));
    }
    Ok(requested.to_vec())
}

fn print_tick(live: &LiveSession, selected: &[String], started: Instant, format: OutputFormat) {
    let store = live.store();
    let channels = selected
        .iter()
        .map(|name| {
            let latest = store.latest(name);
            ChannelReading {
                name,
                samples: store.len(name),
                latest: latest.map(|s| s.value),
                timestamp_ms: latest.map(|s| s.timestamp_ms),
            }
        })
        .collect();

    let tick = WatchTick {
        kind: "watch",
        elapsed_ms: started.elapsed().as_millis() as u64,
        peer: live.peer(),
        channels,
        stats: live.stats(),
    };
    print_watch_tick(&tick, format);
}
