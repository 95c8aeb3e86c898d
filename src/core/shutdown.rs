//! # Shutdown coordinator.
//!
//! ```text
//!   Idle ──shutdown(cause)──► Pending ──(restart finished, polled)──► Draining ──(N exits)──► Done
//!     │                                                                ▲
//!     └───────────────(no restart running)─────────────────────────────┘
//! ```
//!
//! - Runs at most once per master; later calls are no-ops.
//! - Never overlaps a rolling restart: while one runs, the coordinator polls.
//! - Draining snapshots the `N` live workers, retires each one (disconnect
//!   deadline, `"shutdown"` message, disconnect) and completes after `N` exits.
//! - Once called, nothing is ever reforked.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::master::Master;
use super::pool::ExitIntent;
use super::timers::TimerKind;
use crate::events::{Event, EventKind};
use crate::process::MasterMessage;

/// Why the master shut down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownCause {
    /// [`MasterHandle::shutdown`](crate::MasterHandle::shutdown) or `stop`.
    Requested,
    /// A termination signal, by name.
    Signal(&'static str),
    /// Crash loop detected.
    ForkLoop,
}

impl ShutdownCause {
    pub fn as_label(&self) -> String {
        match self {
            ShutdownCause::Requested => "requested".to_string(),
            ShutdownCause::Signal(name) => format!("signal:{name}"),
            ShutdownCause::ForkLoop => "fork_loop".to_string(),
        }
    }
}

/// Returned by [`Master::run`] once every worker has exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    pub cause: ShutdownCause,
    /// Workers alive when the drain started.
    pub retired: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending { poll_at: Instant },
    Draining { expected: usize, exits: usize },
    Done { retired: usize },
}

pub(crate) struct ShutdownState {
    phase: Phase,
    cause: ShutdownCause,
    poll: Duration,
    waiters: Vec<oneshot::Sender<()>>,
}

impl ShutdownState {
    pub fn new(poll: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            cause: ShutdownCause::Requested,
            poll: poll.max(Duration::from_millis(1)),
            waiters: Vec::new(),
        }
    }

    /// Whether shutdown was ever requested.
    #[inline]
    pub fn is_called(&self) -> bool {
        self.phase != Phase::Idle
    }

    #[cfg(test)]
    pub fn is_draining(&self) -> bool {
        matches!(self.phase, Phase::Draining { .. })
    }

    /// Next poll instant while waiting out a restart.
    pub fn poll_deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Pending { poll_at } => Some(poll_at),
            _ => None,
        }
    }

    /// Final report, once every worker has exited.
    pub fn report(&self) -> Option<ShutdownReport> {
        match self.phase {
            Phase::Done { retired } => Some(ShutdownReport {
                cause: self.cause,
                retired,
            }),
            _ => None,
        }
    }

    pub fn add_waiter(&mut self, waiter: oneshot::Sender<()>) {
        self.waiters.push(waiter);
    }
}

impl Master {
    /// Idempotent entry point of the shutdown sequence.
    pub(super) fn begin_shutdown(&mut self, cause: ShutdownCause) {
        if self.shutdown.is_called() {
            tracing::debug!(cause = %cause.as_label(), "shutdown already in progress");
            return;
        }
        tracing::info!(cause = %cause.as_label(), workers = self.pool.count(), "shutting down");
        self.shutdown.cause = cause;

        if self.restart.is_running() {
            tracing::info!("waiting for the rolling restart to finish");
            self.shutdown.phase = Phase::Pending {
                poll_at: Instant::now() + self.shutdown.poll,
            };
        } else {
            self.begin_drain();
        }
    }

    pub(super) fn on_shutdown_poll(&mut self) {
        if !matches!(self.shutdown.phase, Phase::Pending { .. }) {
            return;
        }
        if self.restart.is_running() {
            self.shutdown.phase = Phase::Pending {
                poll_at: Instant::now() + self.shutdown.poll,
            };
        } else {
            self.begin_drain();
        }
    }

    fn begin_drain(&mut self) {
        let ids = self.pool.ids();
        let stop = self.cfg.timeouts.stop;
        self.shutdown.phase = Phase::Draining {
            expected: ids.len(),
            exits: 0,
        };

        for id in ids {
            self.timers.clear(id, TimerKind::Lifecycle);
            self.timers.set(id, TimerKind::Disconnect, stop);
            let Some(worker) = self.pool.get_mut(id) else {
                continue;
            };
            worker.expect_exit(ExitIntent::Retire);
            if let Err(e) = worker.process.send(&MasterMessage::Shutdown) {
                tracing::debug!(worker = %id, error = %e, "shutdown message not delivered");
            }
            worker.process.disconnect();
        }
        self.check_drained();
    }

    /// Counts one observed exit while draining.
    pub(super) fn shutdown_on_exit(&mut self) {
        if let Phase::Draining { exits, .. } = &mut self.shutdown.phase {
            *exits += 1;
        }
        self.check_drained();
    }

    fn check_drained(&mut self) {
        let Phase::Draining { expected, exits } = self.shutdown.phase else {
            return;
        };
        if exits < expected {
            return;
        }
        self.shutdown.phase = Phase::Done { retired: expected };
        tracing::info!(retired = expected, "all workers exited");
        self.emit(Event::new(EventKind::Shutdown).with_reason(self.shutdown.cause.as_label()));
        for w in self.shutdown.waiters.drain(..) {
            let _ = w.send(());
        }
    }
}
