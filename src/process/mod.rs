//! # Worker process boundary.
//!
//! Everything the master knows about a child goes through two traits:
//!
//! - [`Spawner`] starts a worker and wires its lifecycle notifications into the
//!   master inbox through an [`EventSink`].
//! - [`WorkerProcess`] is the handle to one running child: pid, IPC channel,
//!   OS liveness and signal delivery.
//!
//! ```text
//!  Master ── spawn(id, sink) ──► Spawner ──► child process
//!    ▲                                          │
//!    └──── Inbound::Process { id, event } ◄──── EventSink
//!              Online | Listening | Message | Disconnected | Exited
//! ```
//!
//! The production implementation is [`CommandSpawner`]; tests plug in a fake.

mod channel;
mod command;
mod liveness;
mod protocol;

use std::fmt;
use std::sync::Arc;

use nix::sys::signal::Signal;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::Inbound;
use crate::error::WorkerError;

pub use channel::{LineReader, LineWriter};
pub use command::{CHANNEL_FD_ENV, CommandSpawner, WORKER_ID_ENV, WorkerCommand};
pub use protocol::{MasterMessage, WorkerMessage};

/// Logical worker identifier.
///
/// Assigned by the pool at fork time from a monotonically increasing counter,
/// so an id is never reused within one master run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Wraps a raw id.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a worker process terminated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, if the process exited on its own.
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed.
    pub signal: Option<Signal>,
}

impl ExitStatus {
    /// Normal termination with the given code.
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Termination by signal.
    pub fn signaled(signal: Signal) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            code: status.code(),
            signal: status.signal().and_then(|s| Signal::try_from(s).ok()),
        }
    }
}

/// Lifecycle notification reported by a spawner for one worker.
#[derive(Clone, Debug)]
pub enum ProcessEvent {
    /// The OS confirmed the program is executing.
    Online,
    /// The worker reported it accepts connections.
    Listening {
        /// Address reported by the worker, if any.
        address: Option<String>,
    },
    /// Arbitrary payload sent up by the worker.
    Message(Value),
    /// The IPC channel closed.
    Disconnected,
    /// The process terminated.
    Exited(ExitStatus),
}

/// Per-worker handle into the master inbox.
///
/// Cheap to clone; sending after the master terminated is a silent no-op.
#[derive(Clone, Debug)]
pub struct EventSink {
    id: WorkerId,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    pub(crate) fn new(id: WorkerId, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { id, tx }
    }

    /// Worker this sink reports for.
    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Posts a raw event.
    pub fn post(&self, event: ProcessEvent) {
        let _ = self.tx.send(Inbound::Process { id: self.id, event });
    }

    pub fn online(&self) {
        self.post(ProcessEvent::Online);
    }

    pub fn listening(&self, address: Option<String>) {
        self.post(ProcessEvent::Listening { address });
    }

    pub fn message(&self, payload: Value) {
        self.post(ProcessEvent::Message(payload));
    }

    pub fn disconnected(&self) {
        self.post(ProcessEvent::Disconnected);
    }

    pub fn exited(&self, status: ExitStatus) {
        self.post(ProcessEvent::Exited(status));
    }
}

/// Handle to one child process.
///
/// All methods are synchronous and must return quickly: they run inside the
/// master event loop.
pub trait WorkerProcess: Send + Sync + 'static {
    /// OS process id, if the process was started.
    fn pid(&self) -> Option<u32>;

    /// Queues a message on the IPC channel.
    fn send(&self, msg: &MasterMessage) -> Result<(), WorkerError>;

    /// Closes the IPC channel. A `Disconnected` event follows.
    fn disconnect(&self);

    /// Whether the IPC channel is still open.
    fn is_connected(&self) -> bool;

    /// OS-level liveness, independent of the master's bookkeeping.
    fn is_running(&self) -> bool;

    /// Delivers a signal to the process.
    fn signal(&self, signal: Signal) -> Result<(), WorkerError>;

    /// Shorthand for `signal(SIGKILL)`.
    fn kill(&self) -> Result<(), WorkerError> {
        self.signal(Signal::SIGKILL)
    }
}

/// Starts worker processes.
pub trait Spawner: Send + Sync + 'static {
    /// Starts worker `id`. Lifecycle notifications for it go to `sink`.
    ///
    /// Called from inside the master's tokio runtime.
    fn spawn(&self, id: WorkerId, sink: EventSink) -> Result<Arc<dyn WorkerProcess>, WorkerError>;
}
