//! Master core: the worker lifecycle state machine.
//!
//! The only public entry points are [`Master`], [`MasterBuilder`] and
//! [`MasterHandle`]. Everything else is state owned by the one `Master` value
//! and mutated from its event loop, one event at a time.
//!
//! ```text
//!                       ┌──────────── Master::run (current-thread loop) ────────────┐
//!  EventSink ──┐        │                                                           │
//!  MasterHandle├─► inbox ─► dispatch ─┬─► lifecycle  (online/listening/disconnect/exit)
//!  spawn fail ─┘        │             ├─► restart    (one worker at a time)         │
//!  TimeoutRegistry ─────┤             ├─► shutdown   (idempotent drain)             │
//!  ForkLoopGuard tick ──┤             └─► relay / sticky / snapshots                │
//!  OS signals ──────────┘                                                           │
//!                       └──────────► emit(Event) ─► SubscriberSet + Bus ────────────┘
//! ```
//!
//! Internal modules:
//! - [`pool`]: live worker records, fork, snapshots;
//! - [`timers`]: per-worker fork / lifecycle / disconnect deadlines;
//! - [`lifecycle`]: per-worker transitions and escalation;
//! - [`restart`]: serial rolling restart;
//! - [`shutdown`]: idempotent drain of the whole pool;
//! - [`fork_loop`]: crash-loop detection;
//! - [`signals`]: OS signal wiring.

mod builder;
mod config;
mod fork_loop;
mod handle;
mod lifecycle;
mod master;
mod pool;
mod restart;
mod shutdown;
mod signals;
mod timers;

use std::net::IpAddr;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::WorkerError;
use crate::process::{ProcessEvent, WorkerId};

pub use builder::MasterBuilder;
pub use config::{Config, Timeouts};
pub use handle::MasterHandle;
pub use master::Master;
pub use pool::{WorkerInfo, WorkerState};
pub use restart::RestartOutcome;
pub use shutdown::{ShutdownCause, ShutdownReport};
pub use timers::TimerKind;

pub(crate) use pool::Pool;

/// Requests from [`MasterHandle`]s.
#[derive(Debug)]
pub(crate) enum Control {
    Restart(Option<oneshot::Sender<RestartOutcome>>),
    Stop(oneshot::Sender<()>),
    Shutdown,
    Reload,
    Workers(oneshot::Sender<Vec<WorkerInfo>>),
    Broadcast(Value, oneshot::Sender<usize>),
    Route(IpAddr, oneshot::Sender<Option<WorkerInfo>>),
}

/// Everything the master inbox carries.
#[derive(Debug)]
pub(crate) enum Inbound {
    Process { id: WorkerId, event: ProcessEvent },
    Control(Control),
    SpawnFailed { id: WorkerId, error: WorkerError },
}
