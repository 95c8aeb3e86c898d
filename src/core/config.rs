//! # Master configuration.
//!
//! Provides [`Config`], the centralized settings consumed by the [`Master`](crate::Master).
//!
//! ## Sentinel values
//! - `workers = 0` → one worker per available CPU
//! - `bus_capacity` is clamped to a minimum of 1 by the bus
//!
//! ## Derived values
//! - lifecycle splay = `start + stop` (upper bound of the per-worker max-age jitter)
//! - fork-loop threshold = `target × fork_loop_factor`
//! - fork-loop window = `(start + stop) × target × fork_loop_factor`

use std::time::Duration;

/// Per-transition deadlines, all escalating to `SIGKILL`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Time a freshly forked worker has to reach `listening`.
    pub start: Duration,
    /// Time a disconnected worker has to exit.
    pub stop: Duration,
    /// Base lifetime of a worker before it is recycled.
    pub max_age: Duration,
}

impl Timeouts {
    /// Upper bound of the random splay added on top of `max_age`.
    #[inline]
    pub fn lifecycle_splay(&self) -> Duration {
        self.start.saturating_add(self.stop)
    }

    /// Number of one-second liveness probes performed after an exit is observed.
    ///
    /// `ceil(stop / 1s)`, at least one.
    pub fn confirm_budget(&self) -> u32 {
        let ms = self.stop.as_millis();
        let probes = ms.div_ceil(1000).max(1);
        probes.min(u128::from(u32::MAX)) as u32
    }
}

impl Default for Timeouts {
    /// `start = 30s`, `stop = 30s`, `max_age = 30min`.
    fn default() -> Self {
        Self {
            start: Duration::from_secs(30),
            stop: Duration::from_secs(30),
            max_age: Duration::from_secs(30 * 60),
        }
    }
}

/// Global configuration for the master process.
///
/// ## Field semantics
/// - `workers`: target pool size (`0` = autodetect CPU count)
/// - `timeouts`: fork / disconnect / lifecycle deadlines
/// - `bus_capacity`: event bus ring buffer size
/// - `fork_loop_factor`: multiplier used for crash-loop detection
/// - `confirm_interval`: period of the post-exit liveness probe
/// - `shutdown_poll`: backoff used while shutdown waits for a restart to finish
/// - `handle_signals`: install `SIGTERM`/`SIGINT`/`SIGABRT`/`SIGHUP`/`SIGUSR2` handlers
///
/// All fields are public; prefer the helper accessors over sprinkling sentinel
/// checks across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of workers to keep alive.
    pub workers: usize,

    /// Escalation deadlines.
    pub timeouts: Timeouts,

    /// Capacity of the event bus broadcast channel.
    ///
    /// Receivers lagging more than `bus_capacity` events observe `Lagged`.
    pub bus_capacity: usize,

    /// Crash-loop detection multiplier (`5` in production).
    pub fork_loop_factor: u32,

    /// Period between liveness probes of a worker whose exit was reported.
    pub confirm_interval: Duration,

    /// Poll period while a shutdown waits for an in-flight restart.
    pub shutdown_poll: Duration,

    /// Whether [`Master::run`](crate::Master::run) listens for OS signals.
    pub handle_signals: bool,
}

impl Config {
    /// Resolves the target worker count (`0` → available parallelism).
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Number of `online` events tolerated inside one fork-loop window.
    #[inline]
    pub fn fork_loop_threshold(&self, target: usize) -> usize {
        target.saturating_mul(self.fork_loop_factor as usize)
    }

    /// Length of the fork-loop window for the given target count.
    pub fn fork_loop_window(&self, target: usize) -> Duration {
        let factor = (target as u32).saturating_mul(self.fork_loop_factor).max(1);
        self.timeouts.lifecycle_splay().saturating_mul(factor)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `workers = 0` (one per CPU)
    /// - `timeouts = Timeouts::default()`
    /// - `bus_capacity = 1024`
    /// - `fork_loop_factor = 5`
    /// - `confirm_interval = 1s`
    /// - `shutdown_poll = 50ms`
    /// - `handle_signals = true`
    fn default() -> Self {
        Self {
            workers: 0,
            timeouts: Timeouts::default(),
            bus_capacity: 1024,
            fork_loop_factor: 5,
            confirm_interval: Duration::from_secs(1),
            shutdown_poll: Duration::from_millis(50),
            handle_signals: true,
        }
    }
}
