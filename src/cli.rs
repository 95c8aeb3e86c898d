//! Command-line interface definitions using clap.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use procvisor::logging::LogFormat;
use procvisor::{Config, Timeouts};

/// Keeps a pool of worker processes alive, with rolling restarts and crash-loop protection.
#[derive(Parser, Debug)]
#[command(name = "procvisor")]
#[command(author, version, about, long_about = None)]
#[command(trailing_var_arg = true)]
pub struct Cli {
    /// Number of workers (0 for one per CPU).
    #[arg(short = 'n', long, env = "PROCVISOR_WORKERS", default_value_t = 0)]
    pub workers: usize,

    /// Discard the workers' stdout and stderr.
    #[arg(short, long)]
    pub silent: bool,

    /// Debug logging.
    #[arg(short, long)]
    pub debug: bool,

    /// Verbose logging (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Time a worker has to start listening, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 30_000)]
    pub start_timeout: u64,

    /// Time a disconnected worker has to exit, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 30_000)]
    pub stop_timeout: u64,

    /// Base worker lifetime before it is recycled, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 30 * 60 * 1000)]
    pub max_age: u64,

    /// Log output format: pretty, compact, json.
    #[arg(long, env = "PROCVISOR_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Relay every worker message to all other workers.
    #[arg(long)]
    pub pubsub: bool,

    /// Worker program.
    pub program: PathBuf,

    /// Arguments passed to every worker.
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<OsString>,
}

impl Cli {
    /// Master configuration derived from the flags.
    pub fn config(&self) -> Config {
        Config {
            workers: self.workers,
            timeouts: Timeouts {
                start: Duration::from_millis(self.start_timeout),
                stop: Duration::from_millis(self.stop_timeout),
                max_age: Duration::from_millis(self.max_age),
            },
            ..Config::default()
        }
    }

    /// Filter implied by `-d` / `-v`, if any.
    pub fn log_filter(&self) -> Option<String> {
        match (self.debug, self.verbose) {
            (_, v) if v >= 2 => Some("trace".into()),
            (true, _) | (_, 1) => Some("debug".into()),
            _ => None,
        }
    }
}
