//! # procvisor
//!
//! **Procvisor** keeps a fixed-size pool of worker processes alive behind a
//! single master.
//!
//! It forks `N` copies of a worker program, watches each one through an IPC
//! channel and replaces it when it dies. On top of that it performs rolling
//! restarts that never take more than one worker down at a time, recycles
//! workers after a randomized maximum age, escalates stuck workers to
//! `SIGKILL`, and shuts the whole pool down when workers crash in a loop.
//!
//! ## Architecture
//! ```text
//!    OS signals     MasterHandle (restart / stop / reload / workers / route)
//!        │                 │
//!        ▼                 ▼
//! ┌────────────────────────────────────────────────────────────────────┐
//! │  Master::run (single current-thread event loop)                    │
//! │  - Pool (live workers by id)          - TimeoutRegistry            │
//! │  - restart coordinator                - shutdown coordinator       │
//! │  - ForkLoopGuard                      - StickyRouter / Relay       │
//! └──────┬──────────────────┬──────────────────┬───────────────┬───────┘
//!        ▼                  ▼                  ▼               │
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐         │ emit(Event)
//!   │ worker #1│       │ worker #2│       │ worker #N│         ▼
//!   │  (fd 3)  │       │  (fd 3)  │       │  (fd 3)  │   SubscriberSet + Bus
//!   └──────────┘       └──────────┘       └──────────┘
//!    JSON lines over a Unix socket: shutdown / reload / message ⇄ listening / message
//! ```
//!
//! ### Worker lifecycle
//! ```text
//! fork ──► online ──► listening ──► disconnect ──► exit
//!   │        │                          │            ├─ unexpected ─► fork one replacement
//!   │        └─ arm max-age (+ splay)   └─ arm stop  ├─ recycled   ─► fork one replacement
//!   └─ arm start deadline                  deadline  ├─ restarted  ─► restart coordinator
//!                                                    └─ retired    ─► nothing
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                          |
//! |-------------------|----------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Pool, rolling restart, shutdown, fork-loop guard.        | [`Master`], [`MasterHandle`], [`Config`]    |
//! | **Processes**     | Spawn workers and talk to them.                          | [`Spawner`], [`WorkerProcess`], [`WorkerCommand`] |
//! | **Worker side**   | Channel client for Rust workers.                         | [`WorkerChannel`]                           |
//! | **Messaging**     | Relay worker messages, sticky routing.                   | [`MessageHandler`], [`PubSub`], [`StickyRouter`] |
//! | **Subscriber API**| Observe lifecycle events.                                | [`Subscribe`], [`Event`]                    |
//! | **Errors**        | Typed errors with stable labels.                         | [`ConfigError`], [`WorkerError`], [`RuntimeError`] |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use procvisor::{Config, Master, PubSub, WorkerCommand};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = vec![Arc::new(procvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn procvisor::Subscribe>> = Vec::new();
//!
//!     let master = Master::builder(Config { workers: 4, ..Config::default() })
//!         .command(WorkerCommand::new("./server"))
//!         .with_subscribers(subs)
//!         .message_handler(PubSub)
//!         .build()?;
//!
//!     let report = master.run().await?;
//!     println!("{} workers retired", report.retired);
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
pub mod logging;
mod policies;
mod process;
mod relay;
mod sticky;
mod subscribers;
mod worker;

#[cfg(test)]
mod testing;

// ---- Public re-exports ----

pub use crate::core::{
    Config, Master, MasterBuilder, MasterHandle, RestartOutcome, ShutdownCause, ShutdownReport, TimerKind,
    Timeouts, WorkerInfo, WorkerState,
};
pub use error::{ConfigError, RuntimeError, WorkerError};
pub use events::{Event, EventKind};
pub use policies::JitterPolicy;
pub use process::{
    CHANNEL_FD_ENV, CommandSpawner, EventSink, ExitStatus, MasterMessage, ProcessEvent, Spawner, WORKER_ID_ENV,
    WorkerCommand, WorkerId, WorkerMessage, WorkerProcess,
};
pub use relay::{MessageHandler, PubSub, Relay};
pub use sticky::{StickyRouter, ip_hash};
pub use subscribers::{Subscribe, SubscriberSet};
pub use worker::WorkerChannel;

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
