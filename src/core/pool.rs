//! # Process pool: the set of live workers.
//!
//! The pool owns one [`Worker`] record per live child, keyed by [`WorkerId`]
//! in a `BTreeMap`, so every iteration (restart snapshot, relay fan-out, sticky
//! routing) sees workers in the same, id-ascending order.
//!
//! The pool never retries a failed spawn by itself; failures are handed back to
//! the caller as [`Forked::Failed`].

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::Inbound;
use crate::error::WorkerError;
use crate::process::{EventSink, Spawner, WorkerId, WorkerProcess};

/// Lifecycle state of one worker.
///
/// There is no `Exited` variant: a worker whose exit was observed is removed
/// from the pool in the same turn, so snapshots never contain it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Spawn requested; waiting for the OS to confirm.
    Forking,
    /// Executing, not yet accepting connections.
    Online,
    /// Accepting connections.
    Listening,
    /// IPC channel closed; exit expected.
    Disconnecting,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Forking => "forking",
            WorkerState::Online => "online",
            WorkerState::Listening => "listening",
            WorkerState::Disconnecting => "disconnecting",
        }
    }
}

/// Why the master expects a worker to exit.
///
/// Taken exactly once, when the exit is observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExitIntent {
    /// Killed or retired by the supervisor; the supervisor forks the replacement.
    Recycle,
    /// Retired by the restart coordinator, which forks the replacement.
    Restart,
    /// Retired by shutdown; never replaced.
    Retire,
}

/// Public snapshot of one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub pid: Option<u32>,
    pub state: WorkerState,
    /// Listen address reported by the worker.
    pub address: Option<String>,
}

pub(crate) struct Worker {
    pub id: WorkerId,
    pub process: Arc<dyn WorkerProcess>,
    pub state: WorkerState,
    pub intent: Option<ExitIntent>,
    pub address: Option<String>,
}

impl Worker {
    #[inline]
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            pid: self.pid(),
            state: self.state,
            address: self.address.clone(),
        }
    }

    /// Records an intent unless one is already set; an earlier decision wins.
    pub fn expect_exit(&mut self, intent: ExitIntent) {
        if self.intent.is_none() {
            self.intent = Some(intent);
        }
    }
}

/// Outcome of one fork request.
pub(crate) enum Forked {
    Spawned(WorkerId),
    Failed { id: WorkerId, error: WorkerError },
}

pub(crate) struct Pool {
    spawner: Arc<dyn Spawner>,
    workers: BTreeMap<WorkerId, Worker>,
    next_id: u64,
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl Pool {
    pub fn new(spawner: Arc<dyn Spawner>, inbox: mpsc::UnboundedSender<Inbound>) -> Self {
        Self {
            spawner,
            workers: BTreeMap::new(),
            next_id: 1,
            inbox,
        }
    }

    /// Requests one worker from the spawner under a fresh id.
    pub fn fork(&mut self) -> Forked {
        let id = WorkerId::new(self.next_id);
        self.next_id += 1;

        let sink = EventSink::new(id, self.inbox.clone());
        match self.spawner.spawn(id, sink) {
            Ok(process) => {
                self.workers.insert(
                    id,
                    Worker {
                        id,
                        process,
                        state: WorkerState::Forking,
                        intent: None,
                        address: None,
                    },
                );
                Forked::Spawned(id)
            }
            Err(error) => Forked::Failed { id, error },
        }
    }

    /// Requests `n` workers.
    #[cfg(test)]
    pub fn fork_n(&mut self, n: usize) -> Vec<Forked> {
        (0..n).map(|_| self.fork()).collect()
    }

    #[inline]
    pub fn get(&self, id: WorkerId) -> Option<&Worker> {
        self.workers.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: WorkerId) -> Option<&mut Worker> {
        self.workers.get_mut(&id)
    }

    pub fn remove(&mut self, id: WorkerId) -> Option<Worker> {
        self.workers.remove(&id)
    }

    /// Number of workers not yet observed exiting.
    #[inline]
    pub fn count(&self) -> usize {
        self.workers.len()
    }

    /// Snapshot of live ids, ascending.
    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    pub fn each_worker(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    pub fn snapshot(&self) -> Vec<WorkerInfo> {
        self.workers.values().map(Worker::info).collect()
    }

    /// OS-level liveness of a tracked worker.
    pub fn is_running(&self, id: WorkerId) -> bool {
        self.workers.get(&id).is_some_and(|w| w.process.is_running())
    }
}
