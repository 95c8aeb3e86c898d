//! # Per-worker timeout registry.
//!
//! Three independent deadlines protect three transitions, each with its own
//! escalation:
//!
//! ```text
//!   Fork        forking → listening       (T_start)        → SIGKILL
//!   Lifecycle   online  → recycled        (max_age+splay)  → graceful recycle
//!   Disconnect  disconnecting → exited    (T_stop)         → SIGKILL
//! ```
//!
//! ## Rules
//! - At most one timer per `(worker, kind)`; `set` replaces (and cancels) the previous one.
//! - `clear` is always safe, including on unknown or already-fired keys.
//! - A fired key is removed from the registry **before** [`TimeoutRegistry::fired`] returns it,
//!   so every timer is handled at most once.
//! - A sleep task that wins the race against `clear`/`set` carries a stale generation
//!   and is discarded.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::process::WorkerId;

/// Kind of per-worker deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    Fork,
    Lifecycle,
    Disconnect,
}

impl TimerKind {
    pub const ALL: [TimerKind; 3] = [TimerKind::Fork, TimerKind::Lifecycle, TimerKind::Disconnect];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::Fork => "fork",
            TimerKind::Lifecycle => "lifecycle",
            TimerKind::Disconnect => "disconnect",
        }
    }
}

pub(crate) type TimerKey = (WorkerId, TimerKind);

struct Armed {
    generation: u64,
    #[cfg(test)]
    deadline: Instant,
    token: CancellationToken,
}

/// Registry of armed per-worker timers.
pub(crate) struct TimeoutRegistry {
    armed: HashMap<TimerKey, Armed>,
    generation: u64,
    tx: mpsc::UnboundedSender<(TimerKey, u64)>,
    rx: mpsc::UnboundedReceiver<(TimerKey, u64)>,
}

impl TimeoutRegistry {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            armed: HashMap::new(),
            generation: 0,
            tx,
            rx,
        }
    }

    /// Arms `(id, kind)` to fire after `delay`, replacing any previous timer for that key.
    pub fn set(&mut self, id: WorkerId, kind: TimerKind, delay: Duration) {
        self.clear(id, kind);

        self.generation += 1;
        let generation = self.generation;
        let deadline = Instant::now() + delay;
        let token = CancellationToken::new();
        let tx = self.tx.clone();
        let cancelled = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = tx.send(((id, kind), generation));
                }
                _ = cancelled.cancelled() => {}
            }
        });

        self.armed.insert(
            (id, kind),
            Armed {
                generation,
                #[cfg(test)]
                deadline,
                token,
            },
        );
    }

    /// Cancels `(id, kind)`. Returns whether a timer was armed.
    pub fn clear(&mut self, id: WorkerId, kind: TimerKind) -> bool {
        match self.armed.remove(&(id, kind)) {
            Some(armed) => {
                armed.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every timer of `id`.
    pub fn clear_all(&mut self, id: WorkerId) {
        for kind in TimerKind::ALL {
            self.clear(id, kind);
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, id: WorkerId, kind: TimerKind) -> bool {
        self.armed.contains_key(&(id, kind))
    }

    /// Deadline of an armed timer.
    #[cfg(test)]
    pub fn deadline(&self, id: WorkerId, kind: TimerKind) -> Option<Instant> {
        self.armed.get(&(id, kind)).map(|a| a.deadline)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Waits for the next live timer and removes it from the registry.
    ///
    /// Cancel safe.
    pub async fn fired(&mut self) -> TimerKey {
        loop {
            let Some((key, generation)) = self.rx.recv().await else {
                // The registry holds a sender; the channel never closes.
                return std::future::pending().await;
            };
            if self.armed.get(&key).is_some_and(|a| a.generation == generation) {
                self.armed.remove(&key);
                return key;
            }
        }
    }
}

impl Drop for TimeoutRegistry {
    fn drop(&mut self) {
        for armed in self.armed.values() {
            armed.token.cancel();
        }
    }
}
