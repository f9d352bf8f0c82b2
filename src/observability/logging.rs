//! Structured logging using the tracing crate
//!
//! ## Log Format Options
//!
//! `LOG_FORMAT` selects one of three outputs:
//!
//! - `json` - one JSON object per event, for log shipping
//! - `pretty` - multi-line human-readable output with colors
//! - `compact` - single-line console output with colors (default for a node
//!   whose primary sink is a serial console or journald)
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG, TRACE - defaults to INFO
//! - `LOG_FORMAT`: json, pretty, compact - defaults to compact
//! - `LOG_SPANS`: include span open/close events (true/false) - defaults to false
//! - `RUST_LOG`: overrides filtering entirely (env_logger syntax)
//!
//! ```bash
//! LOG_FORMAT=json LOG_LEVEL=INFO sensor-node run
//! LOG_FORMAT=compact LOG_LEVEL=DEBUG sensor-node -c node.toml run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies that are noisy at INFO
const QUIET_TARGETS: [&str; 3] = ["rumqttc", "rustls", "tokio"];

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to compact
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Map a `LOG_LEVEL` value to a level; unknown values give INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Build the event filter for `level`, quieting transport internals
pub fn build_filter(level: Level) -> EnvFilter {
    QUIET_TARGETS
        .iter()
        .filter_map(|target| format!("{target}=warn").parse::<Directive>().ok())
        .fold(EnvFilter::new(level.to_string()), EnvFilter::add_directive)
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Initialize logging with manual configuration
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => build_filter(level),
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = env::var("LOG_SPANS")
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    init_logging(level, format, include_spans);
}

/// Span around one read-evaluate-publish cycle
#[macro_export]
macro_rules! cycle_span {
    ($($field:tt)*) => {
        tracing::info_span!("sensor_cycle", $($field)*)
    };
}

/// Span around an MQTT operation
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

pub use {cycle_span, mqtt_span};
