//! Tracing subscriber setup and log-safe text helpers.

use clap::ValueEnum;
use std::borrow::Cow;
use tracing_subscriber::EnvFilter;

/// Output format for the process-wide subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event, with the current span attached.
    Json,
}

/// Install the global subscriber. Filtering follows `RUST_LOG`, default `info`.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .init(),
    }
}

/// Truncate `text` to `max` characters for logging, noting the full length.
pub fn preview(text: &str, max: usize) -> Cow<'_, str> {
    let len = text.chars().count();
    if len <= max {
        return Cow::Borrowed(text);
    }
    let head: String = text.chars().take(max).collect();
    Cow::Owned(format!("{head}…({len})"))
}
