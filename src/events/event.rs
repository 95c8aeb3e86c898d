//! # Lifecycle events emitted by the master.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Master events**: whole-pool transitions (start, stop, restart, shutdown, fork loop, reload)
//! - **Worker events**: passthrough per-worker transitions (fork, online, listening, disconnect, exit)
//! - **Subscriber events**: delivery problems inside the [`SubscriberSet`](crate::SubscriberSet)
//!
//! The [`Event`] struct carries additional metadata such as timestamps, worker id,
//! pid, exit status and listen address.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use procvisor::{Event, EventKind, WorkerId};
//!
//! let ev = Event::new(EventKind::Exit)
//!     .with_worker(WorkerId::new(3))
//!     .with_pid(4242)
//!     .with_code(1);
//!
//! assert_eq!(ev.kind, EventKind::Exit);
//! assert_eq!(ev.worker, Some(WorkerId::new(3)));
//! assert_eq!(ev.code, Some(1));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::process::WorkerId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Master events ===
    /// Initial pool forked.
    ///
    /// Sets:
    /// - `reason`: target worker count
    Start,

    /// Stop requested through [`MasterHandle::stop`](crate::MasterHandle::stop).
    Stop,

    /// Rolling restart finished (all snapshotted workers replaced, or aborted).
    ///
    /// Sets:
    /// - `reason`: `"completed"` or `"aborted"`
    Restart,

    /// Every worker has exited; the master is about to return.
    ///
    /// Sets:
    /// - `reason`: shutdown cause (`"requested"`, `"signal:SIGTERM"`, `"fork_loop"`)
    Shutdown,

    /// Crash loop detected; a shutdown follows immediately.
    ///
    /// Sets:
    /// - `reason`: observed online count and threshold
    ForkLoop,

    /// Reload broadcast to every worker (a rolling restart follows).
    Reload,

    // === Worker events ===
    /// A worker process was requested from the spawner.
    ///
    /// Sets:
    /// - `worker`, `pid` (absent if the spawn failed)
    Fork,

    /// The OS confirmed the worker program is executing.
    ///
    /// Sets:
    /// - `worker`, `pid`
    Online,

    /// The worker reported it is accepting connections.
    ///
    /// Sets:
    /// - `worker`, `pid`
    /// - `address`: listen address reported by the worker, if any
    Listening,

    /// The worker IPC channel closed.
    ///
    /// Sets:
    /// - `worker`, `pid`
    Disconnect,

    /// The worker process terminated.
    ///
    /// Sets:
    /// - `worker`, `pid`
    /// - `code`: exit code, if the process exited normally
    /// - `signal`: terminating signal name, if killed
    /// - `reason`: spawn error, if the worker never started
    Exit,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `reason`: subscriber name and panic info
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `reason`: subscriber name and reason (`"full"`, `"closed"`)
    SubscriberOverflow,
}

impl EventKind {
    /// Stable lowercase name used in logs and wire relays.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Stop => "stop",
            EventKind::Restart => "restart",
            EventKind::Shutdown => "shutdown",
            EventKind::ForkLoop => "forkLoop",
            EventKind::Reload => "reload",
            EventKind::Fork => "fork",
            EventKind::Online => "online",
            EventKind::Listening => "listening",
            EventKind::Disconnect => "disconnect",
            EventKind::Exit => "exit",
            EventKind::SubscriberPanicked => "subscriberPanicked",
            EventKind::SubscriberOverflow => "subscriberOverflow",
        }
    }

    /// Whether the event describes a single worker.
    #[inline]
    pub fn is_worker_event(&self) -> bool {
        matches!(
            self,
            EventKind::Fork
                | EventKind::Online
                | EventKind::Listening
                | EventKind::Disconnect
                | EventKind::Exit
        )
    }
}

/// Lifecycle event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Logical worker id, if applicable.
    pub worker: Option<WorkerId>,
    /// OS process id, if known.
    pub pid: Option<u32>,
    /// Exit code of a terminated worker.
    pub code: Option<i32>,
    /// Terminating signal name of a killed worker.
    pub signal: Option<Arc<str>>,
    /// Listen address reported by a worker.
    pub address: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            pid: None,
            code: None,
            signal: None,
            address: None,
            reason: None,
        }
    }

    /// Attaches a worker id.
    #[inline]
    pub fn with_worker(mut self, id: WorkerId) -> Self {
        self.worker = Some(id);
        self
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches a process id if known.
    #[inline]
    pub fn with_pid_opt(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Attaches an exit code.
    #[inline]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Attaches a terminating signal name.
    #[inline]
    pub fn with_signal(mut self, signal: impl Into<Arc<str>>) -> Self {
        self.signal = Some(signal.into());
        self
    }

    /// Attaches a listen address.
    #[inline]
    pub fn with_address(mut self, address: impl Into<Arc<str>>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}
