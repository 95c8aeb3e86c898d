//! # Rolling restart coordinator.
//!
//! Replaces every worker of a snapshot, one at a time, never taking the next
//! worker down before the previous one's replacement reports `listening`:
//!
//! ```text
//!   snapshot ids ─► pop ─► skip if gone / already disconnecting
//!                     │
//!                     ├─► intent = Restart, send "shutdown", disconnect
//!                     ├─► exit observed       ─► fork replacement, await it
//!                     ├─► replacement dies    ─► await its replacement instead
//!                     └─► replacement listens ─► pop next
//!   stack empty ─► Completed          shutdown called ─► Aborted
//! ```
//!
//! Waiters are resolved exactly once per pass. Requests arriving during a pass
//! are coalesced into one fresh pass afterwards.
//!
//! Max-age expiry goes through the same machinery: an expired worker starts a
//! recycle pass, or joins the running one, so aged workers are also replaced
//! one at a time.

use tokio::sync::oneshot;

use super::master::Master;
use super::pool::ExitIntent;
use crate::events::{Event, EventKind};
use crate::process::{MasterMessage, WorkerId};

/// How a rolling restart ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Every snapshotted worker was replaced (or skipped as already leaving).
    Completed,
    /// A shutdown interrupted the pass.
    Aborted,
}

impl RestartOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartOutcome::Completed => "completed",
            RestartOutcome::Aborted => "aborted",
        }
    }
}

type Waiter = oneshot::Sender<RestartOutcome>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PassKind {
    /// Snapshot of the whole pool (restart, reload).
    Rolling,
    /// Workers past their max age, appended as their deadlines fire.
    MaxAge,
}

struct RestartRun {
    kind: PassKind,
    stack: Vec<WorkerId>,
    total: usize,
    replaced: usize,
    /// Worker taken down, exit not yet observed.
    current: Option<WorkerId>,
    /// Replacement whose `listening` unblocks the next step.
    awaiting: Option<WorkerId>,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
pub(crate) struct RestartState {
    run: Option<RestartRun>,
    queued: Option<Vec<Waiter>>,
}

impl RestartState {
    #[inline]
    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    fn awaiting(&self) -> Option<WorkerId> {
        self.run.as_ref().and_then(|r| r.awaiting)
    }

    fn current(&self) -> Option<WorkerId> {
        self.run.as_ref().and_then(|r| r.current)
    }
}

impl Master {
    /// Starts a pass, or queues one if a pass is already running.
    pub(super) fn request_restart(&mut self, waiter: Option<Waiter>) {
        if self.shutdown.is_called() {
            tracing::debug!("restart requested during shutdown, ignoring");
            if let Some(w) = waiter {
                let _ = w.send(RestartOutcome::Aborted);
            }
            return;
        }
        if self.restart.is_running() {
            tracing::debug!("restart already in progress, queueing another pass");
            self.restart.queued.get_or_insert_with(Vec::new).extend(waiter);
            return;
        }
        self.start_restart(waiter.into_iter().collect());
    }

    fn start_restart(&mut self, waiters: Vec<Waiter>) {
        // Reversed so that popping visits ascending ids.
        let stack: Vec<WorkerId> = self.pool.ids().into_iter().rev().collect();
        tracing::info!(workers = stack.len(), "rolling restart started");

        self.restart.run = Some(RestartRun {
            kind: PassKind::Rolling,
            total: stack.len(),
            stack,
            replaced: 0,
            current: None,
            awaiting: None,
            waiters,
        });
        self.restart_step();
    }

    /// Max-age expiry of `id`: recycled through the serial coordinator.
    ///
    /// A rolling pass replaces the whole snapshot anyway, so the deadline is
    /// only re-armed while one runs.
    pub(super) fn recycle_expired(&mut self, id: WorkerId) {
        match self.restart.run.as_ref().map(|r| r.kind) {
            Some(PassKind::MaxAge) => {
                let Some(run) = self.restart.run.as_mut() else {
                    return;
                };
                if run.current != Some(id) && !run.stack.contains(&id) {
                    tracing::debug!(worker = %id, "max age reached, queued for recycling");
                    // Bottom of the stack: expired workers go down in deadline order.
                    run.stack.insert(0, id);
                    run.total += 1;
                }
            }
            Some(PassKind::Rolling) => self.arm_lifecycle(id),
            None => {
                tracing::info!(worker = %id, "max age reached, recycling");
                self.restart.run = Some(RestartRun {
                    kind: PassKind::MaxAge,
                    stack: vec![id],
                    total: 1,
                    replaced: 0,
                    current: None,
                    awaiting: None,
                    waiters: Vec::new(),
                });
                self.restart_step();
            }
        }
    }

    /// Takes down the next worker of the pass, or finishes it.
    fn restart_step(&mut self) {
        loop {
            if self.shutdown.is_called() {
                self.finish_restart(RestartOutcome::Aborted);
                return;
            }
            let next = match self.restart.run.as_mut() {
                Some(run) => run.stack.pop(),
                None => return,
            };
            let Some(id) = next else {
                self.finish_restart(RestartOutcome::Completed);
                return;
            };

            let Some(worker) = self.pool.get_mut(id) else {
                tracing::debug!(worker = %id, "restart: worker already gone, skipping");
                continue;
            };
            if !worker.process.is_connected() || worker.intent.is_some() {
                tracing::warn!(worker = %id, "restart: worker already disconnecting, skipping");
                continue;
            }

            tracing::info!(worker = %id, pid = ?worker.pid(), "restart: stopping worker");
            worker.intent = Some(ExitIntent::Restart);
            if let Err(e) = worker.process.send(&MasterMessage::Shutdown) {
                tracing::debug!(worker = %id, error = %e, "restart: shutdown message not delivered");
            }
            worker.process.disconnect();

            if let Some(run) = self.restart.run.as_mut() {
                run.current = Some(id);
            }
            return;
        }
    }

    /// Exit of a worker retired by the coordinator.
    pub(super) fn restart_on_exit(&mut self, id: WorkerId) {
        if self.restart.current() != Some(id) {
            // Not the one we are waiting on (pass already finished): plain replacement.
            self.replace(id);
            return;
        }
        if self.shutdown.is_called() {
            self.finish_restart(RestartOutcome::Aborted);
            return;
        }
        let new = self.fork_worker();
        if let Some(run) = self.restart.run.as_mut() {
            run.current = None;
            run.awaiting = Some(new);
        }
    }

    /// `listening` of any worker; unblocks the pass when it is the awaited replacement.
    pub(super) fn restart_on_listening(&mut self, id: WorkerId) {
        if self.restart.awaiting() != Some(id) {
            return;
        }
        if let Some(run) = self.restart.run.as_mut() {
            run.awaiting = None;
            run.replaced += 1;
        }
        self.restart_step();
    }

    /// The awaited replacement died; its own replacement (if any) takes over.
    pub(super) fn restart_on_replaced(&mut self, dead: WorkerId, new: Option<WorkerId>) {
        if self.restart.awaiting() != Some(dead) {
            return;
        }
        match new {
            Some(new) => {
                tracing::debug!(dead = %dead, new = %new, "restart: awaiting replacement instead");
                if let Some(run) = self.restart.run.as_mut() {
                    run.awaiting = Some(new);
                }
            }
            None => self.finish_restart(RestartOutcome::Aborted),
        }
    }

    fn finish_restart(&mut self, outcome: RestartOutcome) {
        let Some(run) = self.restart.run.take() else {
            return;
        };
        match run.kind {
            PassKind::Rolling => {
                tracing::info!(
                    outcome = outcome.as_str(),
                    replaced = run.replaced,
                    total = run.total,
                    "rolling restart finished"
                );
                self.emit(Event::new(EventKind::Restart).with_reason(outcome.as_str()));
            }
            PassKind::MaxAge => {
                tracing::debug!(
                    outcome = outcome.as_str(),
                    replaced = run.replaced,
                    total = run.total,
                    "max-age recycling finished"
                );
            }
        }
        for w in run.waiters {
            let _ = w.send(outcome);
        }

        if let Some(queued) = self.restart.queued.take() {
            if outcome == RestartOutcome::Completed && !self.shutdown.is_called() {
                self.start_restart(queued);
            } else {
                for w in queued {
                    let _ = w.send(RestartOutcome::Aborted);
                }
            }
        }
    }
}
