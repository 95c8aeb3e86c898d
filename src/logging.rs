//! Logging setup for the `procvisor` binary and embedding applications.
//!
//! # Environment Variables
//!
//! - `PROCVISOR_LOG` - Log filter (overrides RUST_LOG)
//! - `PROCVISOR_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `PROCVISOR_LOG_FORMAT` - Output format: pretty, compact, json
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! # Example
//!
//! ```no_run
//! use procvisor::logging::{LogConfig, LogFormat, init};
//!
//! init(LogConfig::default().with_format(LogFormat::Compact).with_env_overrides());
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration, passed to [`init`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: INFO)
    pub level: Level,
    /// Log format (default: Pretty)
    pub format: LogFormat,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    /// Show target module in logs (default: true)
    pub show_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            filter: None,
            show_target: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// CLI arguments take precedence: an already set filter is never replaced,
    /// and `PROCVISOR_LOG_LEVEL` only applies when no filter is set.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            if let Ok(filter) = std::env::var("PROCVISOR_LOG") {
                self.filter = Some(filter);
            } else if let Ok(filter) = std::env::var("RUST_LOG") {
                self.filter = Some(filter);
            }
        }

        if self.filter.is_none() {
            if let Some(level) = std::env::var("PROCVISOR_LOG_LEVEL")
                .ok()
                .and_then(|s| parse_level(&s))
            {
                self.level = level;
            }
        }

        if let Some(format) = std::env::var("PROCVISOR_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.format = format;
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }
}

/// Parse a log level string.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Initialize the global tracing subscriber, writing to stderr.
///
/// Subsequent calls are silently ignored.
pub fn init(config: LogConfig) {
    let filter = config.build_filter();

    let result = match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(config.show_target)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_target(config.show_target)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(config.show_target)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
    };

    let _ = result;
}
