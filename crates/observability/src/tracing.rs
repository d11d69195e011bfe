//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG` (default `info`); the output format from
//! `FORGEJOBS_LOG_FORMAT` (`json`, the default, or `pretty`).

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "FORGEJOBS_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Multi-line human-readable output
    Pretty,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown log format '{0}' (expected json or pretty)")]
pub struct UnknownLogFormat(String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(UnknownLogFormat(s.to_string())),
        }
    }
}

/// Initialize tracing/logging for the process, reading the format from the
/// environment. An unknown format falls back to JSON.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let format = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    init_with(format);
}

/// Initialize tracing/logging with an explicit output format.
pub fn init_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let _ = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().with_thread_names(true).try_init(),
    };
}
