// src/logging.rs

//! Process-wide `tracing` subscriber for the `suitelink` binary.
//!
//! `--log-level` wins over `SUITELINK_LOG`; with neither set the level is
//! `info`. Everything is written to stderr so that `run`, `suites` and
//! `file` can pipe server replies from stdout.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "SUITELINK_LOG";

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Install the global subscriber. Call once, before any session starts.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let level = effective_level(cli_level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    Ok(())
}

fn effective_level(cli_level: Option<LogLevel>, env_value: Option<&str>) -> Level {
    if let Some(level) = cli_level {
        return level.into();
    }
    env_value.and_then(env_level).unwrap_or(Level::INFO)
}

/// `tracing` parses the level names case-insensitively; `warning` is
/// accepted as well since people type it.
fn env_level(value: &str) -> Option<Level> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("warning") => Some(Level::WARN),
        v => v.parse().ok(),
    }
}
