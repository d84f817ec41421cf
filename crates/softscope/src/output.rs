use std::io::IsTerminal;
use std::net::SocketAddr;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use softscope_session::StatsSnapshot;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
pub struct DiscoveryOutput<'a> {
    pub kind: &'static str,
    pub peer: SocketAddr,
    pub local: SocketAddr,
    pub channels: &'a [String],
    pub attempts: u32,
}

#[derive(Serialize)]
pub struct ChannelReading<'a> {
    pub name: &'a str,
    pub samples: usize,
    pub latest: Option<f32>,
    pub timestamp_ms: Option<f64>,
}

#[derive(Serialize)]
pub struct WatchTick<'a> {
    pub kind: &'static str,
    pub elapsed_ms: u64,
    pub peer: SocketAddr,
    pub channels: Vec<ChannelReading<'a>>,
    pub stats: StatsSnapshot,
}

#[derive(Serialize)]
pub struct ListeningOutput<'a> {
    pub kind: &'static str,
    pub local: SocketAddr,
    pub channels: &'a [String],
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_discovery(out: &DiscoveryOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["INDEX", "CHANNEL"]);
            for (index, name) in out.channels.iter().enumerate() {
                table.add_row(vec![index.to_string(), name.clone()]);
            }
            println!("peer: {} (after {} probes)", out.peer, out.attempts);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "peer={} local={} attempts={} channels={}",
                out.peer,
                out.local,
                out.attempts,
                out.channels.join(",")
            );
        }
    }
}

pub fn print_watch_tick(tick: &WatchTick<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(tick),
        OutputFormat::Table => {
            let mut table = new_table(vec!["CHANNEL", "SAMPLES", "LATEST", "TIME (ms)"]);
            for reading in &tick.channels {
                table.add_row(vec![
                    reading.name.to_string(),
                    reading.samples.to_string(),
                    format_opt(reading.latest.map(f64::from), 4),
                    format_opt(reading.timestamp_ms, 3),
                ]);
            }
            println!(
                "t+{}ms batches={} snapshots={} malformed={} seq={}",
                tick.elapsed_ms,
                tick.stats.batches,
                tick.stats.snapshots,
                tick.stats.malformed,
                tick.stats
                    .last_sequence
                    .map_or_else(|| "-".to_string(), |s| s.to_string())
            );
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let readings: Vec<String> = tick
                .channels
                .iter()
                .map(|r| format!("{}={}", r.name, format_opt(r.latest.map(f64::from), 4)))
                .collect();
            println!(
                "t+{}ms batches={} {}",
                tick.elapsed_ms,
                tick.stats.batches,
                readings.join(" ")
            );
        }
    }
}

pub fn print_listening(out: &ListeningOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "emulating device on {} with channels {}",
                out.local,
                out.channels.join(",")
            );
        }
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn format_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}
