//! # Per-worker lifecycle supervisor.
//!
//! ```text
//!   fork ──► Forking ──online──► Online ──listening──► Listening
//!    │  arm Fork(T_start)   │ arm Lifecycle            │ clear Fork
//!    │                      │ (max_age + splay)        │
//!    │                      ▼                          ▼
//!    │                 ── disconnect ──► Disconnecting ── exit ──► removed
//!    │                    clear Lifecycle                clear all timers
//!    │                    arm Disconnect(T_stop)         take intent:
//!    │                    if still running                 None    → refork one
//!    │                                                     Recycle → refork one
//!    │                                                     Restart → restart coordinator
//!    │                                                     Retire  → nothing
//!    │
//!    ├─ Fork timeout        → intent Recycle, SIGKILL
//!    ├─ Lifecycle timeout   → serial max-age recycle (intent Restart, "shutdown" + disconnect)
//!    │                        (re-armed while a rolling restart runs, ignored after shutdown)
//!    └─ Disconnect timeout  → intent Recycle unless set, SIGKILL
//! ```
//!
//! Every handler tolerates events for workers that already left the pool:
//! a forced kill can race the worker's own exit.

use std::sync::Arc;

use nix::sys::signal::Signal;

use super::master::Master;
use super::pool::{ExitIntent, Forked, Worker, WorkerState};
use super::timers::TimerKind;
use super::{Inbound, ShutdownCause};
use crate::error::WorkerError;
use crate::events::{Event, EventKind};
use crate::process::{ExitStatus, ProcessEvent, WorkerId, WorkerProcess};

impl Master {
    /// Forks one worker and arms its fork deadline.
    ///
    /// Returns the id used for the attempt; a failed spawn is reported back
    /// through the inbox and handled on a later turn.
    pub(super) fn fork_worker(&mut self) -> WorkerId {
        match self.pool.fork() {
            Forked::Spawned(id) => {
                let pid = self.pool.get(id).and_then(Worker::pid);
                tracing::debug!(worker = %id, pid = ?pid, "worker forked");
                self.timers.set(id, TimerKind::Fork, self.cfg.timeouts.start);
                self.emit(Event::new(EventKind::Fork).with_worker(id).with_pid_opt(pid));
                id
            }
            Forked::Failed { id, error } => {
                tracing::error!(worker = %id, error = %error, "failed to fork worker");
                self.emit(
                    Event::new(EventKind::Fork)
                        .with_worker(id)
                        .with_reason(error.to_string()),
                );
                let _ = self.inbox_tx.send(Inbound::SpawnFailed { id, error });
                id
            }
        }
    }

    /// Forks the replacement of `dead`, unless shutdown was requested.
    pub(super) fn replace(&mut self, dead: WorkerId) -> Option<WorkerId> {
        let new = if self.shutdown.is_called() {
            tracing::debug!(worker = %dead, "shutting down, not replacing");
            None
        } else {
            Some(self.fork_worker())
        };
        self.restart_on_replaced(dead, new);
        new
    }

    pub(super) fn on_process_event(&mut self, id: WorkerId, event: ProcessEvent) {
        match event {
            ProcessEvent::Online => self.on_online(id),
            ProcessEvent::Listening { address } => self.on_listening(id, address),
            ProcessEvent::Message(payload) => {
                if self.pool.get(id).is_some() {
                    self.relay_message(id, &payload);
                }
            }
            ProcessEvent::Disconnected => self.on_disconnect(id),
            ProcessEvent::Exited(status) => self.on_exit(id, status),
        }
    }

    fn on_online(&mut self, id: WorkerId) {
        let Some(worker) = self.pool.get_mut(id) else {
            tracing::debug!(worker = %id, "online event for unknown worker");
            return;
        };
        if worker.state == WorkerState::Forking {
            worker.state = WorkerState::Online;
        }
        let pid = worker.pid();
        self.emit(Event::new(EventKind::Online).with_worker(id).with_pid_opt(pid));

        if !self.shutdown.is_called() {
            self.arm_lifecycle(id);
        }
        self.record_start();
    }

    fn on_listening(&mut self, id: WorkerId, address: Option<String>) {
        let Some(worker) = self.pool.get_mut(id) else {
            tracing::debug!(worker = %id, "listening event for unknown worker");
            return;
        };
        if worker.state != WorkerState::Disconnecting {
            worker.state = WorkerState::Listening;
        }
        worker.address.clone_from(&address);
        let pid = worker.pid();
        self.timers.clear(id, TimerKind::Fork);

        let mut ev = Event::new(EventKind::Listening).with_worker(id).with_pid_opt(pid);
        if let Some(address) = address {
            ev = ev.with_address(address);
        }
        self.emit(ev);
        self.restart_on_listening(id);
    }

    fn on_disconnect(&mut self, id: WorkerId) {
        let Some(worker) = self.pool.get_mut(id) else {
            tracing::debug!(worker = %id, "disconnect event for unknown worker");
            return;
        };
        worker.state = WorkerState::Disconnecting;
        let pid = worker.pid();

        self.timers.clear(id, TimerKind::Lifecycle);
        if self.pool.is_running(id) {
            self.timers.set(id, TimerKind::Disconnect, self.cfg.timeouts.stop);
        }
        self.emit(Event::new(EventKind::Disconnect).with_worker(id).with_pid_opt(pid));
    }

    fn on_exit(&mut self, id: WorkerId, status: ExitStatus) {
        let Some(worker) = self.pool.remove(id) else {
            tracing::debug!(worker = %id, "exit event for unknown worker");
            return;
        };
        self.timers.clear_all(id);

        let mut ev = Event::new(EventKind::Exit).with_worker(id).with_pid_opt(worker.pid());
        if let Some(code) = status.code {
            ev = ev.with_code(code);
        }
        if let Some(signal) = status.signal {
            ev = ev.with_signal(signal.as_str());
        }
        self.emit(ev);
        self.confirm_death(Arc::clone(&worker.process));

        match worker.intent {
            None => {
                tracing::warn!(
                    worker = %id,
                    pid = ?worker.pid(),
                    code = ?status.code,
                    signal = ?status.signal,
                    "worker died unexpectedly"
                );
                self.replace(id);
            }
            Some(ExitIntent::Recycle) => {
                self.replace(id);
            }
            Some(ExitIntent::Restart) => self.restart_on_exit(id),
            Some(ExitIntent::Retire) => {}
        }
        self.shutdown_on_exit();
    }

    /// A spawn that never produced a process: counts as a start and as an unexpected death.
    pub(super) fn on_spawn_failed(&mut self, id: WorkerId, error: WorkerError) {
        self.emit(
            Event::new(EventKind::Exit)
                .with_worker(id)
                .with_reason(error.to_string()),
        );
        self.record_start();
        self.replace(id);
    }

    pub(super) fn on_timeout(&mut self, id: WorkerId, kind: TimerKind) {
        match kind {
            TimerKind::Fork => self.on_fork_timeout(id),
            TimerKind::Lifecycle => self.on_lifecycle_timeout(id),
            TimerKind::Disconnect => self.on_disconnect_timeout(id),
        }
    }

    fn on_fork_timeout(&mut self, id: WorkerId) {
        let start = self.cfg.timeouts.start;
        let Some(worker) = self.pool.get_mut(id) else {
            return;
        };
        tracing::warn!(worker = %id, pid = ?worker.pid(), timeout = ?start, "worker did not start listening in time, killing");
        worker.expect_exit(ExitIntent::Recycle);
        force_kill(worker);
    }

    fn on_lifecycle_timeout(&mut self, id: WorkerId) {
        if self.shutdown.is_called() {
            return;
        }
        if self.pool.get(id).is_some_and(|w| w.intent.is_none()) {
            self.recycle_expired(id);
        }
    }

    fn on_disconnect_timeout(&mut self, id: WorkerId) {
        let stop = self.cfg.timeouts.stop;
        let Some(worker) = self.pool.get_mut(id) else {
            return;
        };
        tracing::warn!(worker = %id, pid = ?worker.pid(), timeout = ?stop, "worker did not exit after disconnect, killing");
        worker.expect_exit(ExitIntent::Recycle);
        force_kill(worker);
    }

    /// Arms the lifecycle deadline: `max_age` plus a per-worker random splay.
    pub(super) fn arm_lifecycle(&mut self, id: WorkerId) {
        let t = self.cfg.timeouts;
        let deadline = self.jitter.splay(t.max_age, t.lifecycle_splay());
        self.timers.set(id, TimerKind::Lifecycle, deadline);
    }

    /// Feeds the fork-loop guard; trips the shutdown when workers crash-loop.
    fn record_start(&mut self) {
        if !self.fork_loop.record() {
            return;
        }
        let reason = format!(
            "online={} threshold={} window={:?}",
            self.fork_loop.count(),
            self.fork_loop.threshold(),
            self.fork_loop.window()
        );
        tracing::error!(%reason, "fork loop detected, shutting down");
        self.emit(Event::new(EventKind::ForkLoop).with_reason(reason));
        self.begin_shutdown(ShutdownCause::ForkLoop);
    }

    /// Exit notifications can be faked or lost: keep probing the pid for a
    /// while and kill it if it is still there.
    fn confirm_death(&self, process: Arc<dyn WorkerProcess>) {
        let interval = self.cfg.confirm_interval;
        let budget = self.cfg.timeouts.confirm_budget();

        tokio::spawn(async move {
            for _ in 0..budget {
                if !process.is_running() {
                    return;
                }
                tokio::time::sleep(interval).await;
            }
            if process.is_running() {
                tracing::warn!(pid = ?process.pid(), "worker still alive after reported exit, killing");
                if let Err(e) = process.signal(Signal::SIGKILL) {
                    tracing::debug!(pid = ?process.pid(), error = %e, "confirm-death kill failed");
                }
            }
        });
    }
}

fn force_kill(worker: &Worker) {
    match worker.process.kill() {
        Ok(()) => {}
        Err(e) if e.is_gone() => {
            tracing::debug!(worker = %worker.id, "kill target already gone");
        }
        Err(e) => {
            tracing::error!(worker = %worker.id, error = %e, label = e.as_label(), "failed to kill worker");
        }
    }
}
