//! Logging setup.
//!
//! Environment variables:
//!
//! - `DELAYED_QUEUE_DEBUG=1` - enable debug logging
//! - `DELAYED_QUEUE_LOG_LEVEL=trace|debug|info|warn|error|off` - set log level
//! - `DELAYED_QUEUE_LOG_FORMAT=pretty|compact|json` - set output format
//!
//! `RUST_LOG`, when set, takes precedence over the level.

use std::env;
use std::sync::OnceLock;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human readable output
    Pretty,
    /// Single-line output
    Compact,
    /// JSON lines for structured logging
    Json,
}

impl LogFormat {
    /// Parse a format name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `delayed_queue=debug`
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let debug = flag("DELAYED_QUEUE_DEBUG");

        let level = env::var("DELAYED_QUEUE_LOG_LEVEL")
            .ok()
            .map(|s| s.to_lowercase())
            .filter(|s| matches!(s.as_str(), "trace" | "debug" | "info" | "warn" | "error" | "off"))
            .unwrap_or_else(|| if debug { "debug" } else { "info" }.to_string());

        let format = env::var("DELAYED_QUEUE_LOG_FORMAT")
            .ok()
            .and_then(|s| LogFormat::parse(&s))
            .unwrap_or(LogFormat::Json);

        Self { level, format }
    }
}

static INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber from environment configuration.
///
/// Later calls are no-ops, as is calling this when another subscriber is
/// already installed.
pub fn init() {
    init_with(LogConfig::from_env());
}

/// Install the global subscriber with explicit configuration.
pub fn init_with(config: LogConfig) {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
        let registry = tracing_subscriber::registry().with(filter);

        let result = match config.format {
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
            LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        };
        // Another subscriber already owns the global slot.
        let _ = result;
    });
}
