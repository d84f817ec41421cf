use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Environment override, in `EnvFilter` syntax (e.g. `softscope_session=trace`).
pub const LOG_ENV: &str = "SOFTSCOPE_LOG";

/// Crates whose events follow `--log-level`. Everything else stays at `warn`.
const SOFTSCOPE_TARGETS: [&str; 5] = [
    "softscope",
    "softscope_transport",
    "softscope_wire",
    "softscope_store",
    "softscope_session",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Directives for `level`: the collector's crates at `level`, the rest at `warn`.
fn directives(level: LogLevel) -> String {
    let mut out = String::from("warn");
    for target in SOFTSCOPE_TARGETS {
        out.push(',');
        out.push_str(target);
        out.push('=');
        out.push_str(level.as_str());
    }
    out
}

fn build_filter(level: LogLevel, env_override: Option<&str>) -> EnvFilter {
    env_override
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(directives(level)))
}

/// Install the stderr subscriber. Stdout is reserved for command output.
///
/// A valid `SOFTSCOPE_LOG` wins over `--log-level`. Thread names are on so
/// lines from the `softscope-ingest` thread can be told apart.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env_override = std::env::var(LOG_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, env_override.as_deref()))
        .with_ansi(false)
        .with_thread_names(true)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_scope_level_to_collector_crates() {
        let spec = directives(LogLevel::Debug);
        assert!(spec.starts_with("warn,"));
        assert!(spec.contains("softscope_session=debug"));
        assert!(spec.contains("softscope_transport=debug"));
        assert!(EnvFilter::try_new(&spec).is_ok());
    }

    #[test]
    fn env_override_wins_when_valid() {
        let filter = build_filter(LogLevel::Error, Some("softscope_wire=trace"));
        assert_eq!(filter.to_string(), "softscope_wire=trace");

        let fallback = build_filter(LogLevel::Info, Some("softscope_wire=loud"));
        assert!(fallback.to_string().contains("softscope_store=info"));
    }
}
