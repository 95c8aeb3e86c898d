//! Error types used by the procvisor master and its worker handles.
//!
//! This module defines three enums:
//!
//! - [`ConfigError`]: invalid configuration, raised before any worker is forked.
//! - [`WorkerError`]: per-worker failures (spawn, channel, signal delivery).
//! - [`RuntimeError`]: errors raised by the master runtime itself.
//!
//! Per-worker failures never crash the master: they are logged and absorbed by
//! the supervisor. Only [`ConfigError`] is meant to surface to the caller.
//! All types provide `as_label` for logs/metrics.

use std::path::PathBuf;

use thiserror::Error;

/// # Configuration errors.
///
/// Fatal at startup: the master never reaches a running state.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No worker program was given.
    #[error("worker start program must be specified")]
    MissingEntryPoint,

    /// The worker program does not exist or cannot be resolved through `PATH`.
    #[error("cannot find worker start program: {path}")]
    EntryPointNotFound {
        /// The path or name that was looked up.
        path: PathBuf,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::ConfigError;
    ///
    /// assert_eq!(ConfigError::MissingEntryPoint.as_label(), "config_missing_entry_point");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::MissingEntryPoint => "config_missing_entry_point",
            ConfigError::EntryPointNotFound { .. } => "config_entry_point_not_found",
        }
    }
}

/// # Errors produced while operating on a single worker.
///
/// All of them are non-fatal for the master.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The OS refused to spawn the worker process.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The IPC channel to the worker is closed (disconnected or exited).
    #[error("worker channel closed")]
    ChannelClosed,

    /// The target process no longer exists.
    #[error("worker process {pid} not running")]
    NotRunning {
        /// Process id the signal was addressed to.
        pid: u32,
    },

    /// No live worker carries this id.
    #[error("unknown worker {0}")]
    UnknownWorker(crate::process::WorkerId),

    /// Signal delivery failed for another reason.
    #[error("failed to signal worker process {pid}: {source}")]
    Signal {
        /// Process id the signal was addressed to.
        pid: u32,
        /// Underlying errno.
        #[source]
        source: nix::Error,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Spawn(_) => "worker_spawn_failed",
            WorkerError::ChannelClosed => "worker_channel_closed",
            WorkerError::NotRunning { .. } => "worker_not_running",
            WorkerError::UnknownWorker(_) => "worker_unknown",
            WorkerError::Signal { .. } => "worker_signal_failed",
        }
    }

    /// Indicates the target was already gone (treated as success by escalations).
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            WorkerError::NotRunning { .. } | WorkerError::ChannelClosed | WorkerError::UnknownWorker(_)
        )
    }
}

/// # Errors produced by the master runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Invalid configuration detected before startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    /// The master has already terminated; the request could not be delivered.
    #[error("master is not running")]
    MasterGone,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use procvisor::RuntimeError;
    ///
    /// assert_eq!(RuntimeError::MasterGone.as_label(), "runtime_master_gone");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Config(_) => "runtime_config",
            RuntimeError::Signals(_) => "runtime_signals",
            RuntimeError::MasterGone => "runtime_master_gone",
        }
    }
}
