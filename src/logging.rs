//! Structured logging setup using the tracing crate.
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable
//! (`json`, `pretty`, or `compact`), the level by `LOG_LEVEL`, and `RUST_LOG`
//! overrides both when set.

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable).
    Json,
    /// Pretty format with colors and indentation (human-readable).
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly).
    Compact,
}

impl LogFormat {
    /// Parse a log format from a string, defaulting to JSON.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize logging with an explicit level and format.
pub fn init_logging(level: Level, format: LogFormat) {
    let mut filter = EnvFilter::new(level.to_string())
        // Reduce noise from the wire engine
        .add_directive("rumqttc=warn".parse().expect("static directive"));

    if let Ok(rust_log) = env::var("RUST_LOG") {
        filter = EnvFilter::new(rust_log);
    }

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            subscriber.with(fmt::layer().json()).init();
        }
        LogFormat::Pretty => {
            subscriber.with(fmt::layer().pretty().with_ansi(true)).init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_ansi(true).with_target(false))
                .init();
        }
    }
}

/// Initialize logging from `LOG_LEVEL` / `LOG_FORMAT` environment variables.
pub fn init_default_logging() {
    let level = match env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "INFO".to_string())
        .to_uppercase()
        .as_str()
    {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    };
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    init_logging(level, format);
}
