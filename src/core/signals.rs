//! # OS signal handling for the master.
//!
//! | Signal                          | Action                              |
//! |---------------------------------|-------------------------------------|
//! | `SIGTERM`, `SIGINT`, `SIGABRT`  | full shutdown                       |
//! | `SIGHUP`, `SIGUSR2`             | broadcast `reload` + rolling restart |
//!
//! Listeners are installed once per [`Master::run`](super::Master::run) and stay
//! registered for the whole run, so a second `SIGTERM` during the drain is simply
//! absorbed by the idempotent shutdown.

use nix::sys::signal::Signal;
use tokio::signal::unix::{self, SignalKind};

/// What the master does with a received signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SignalAction {
    Shutdown,
    Reload,
}

pub(crate) fn action(signal: Signal) -> SignalAction {
    match signal {
        Signal::SIGHUP | Signal::SIGUSR2 => SignalAction::Reload,
        _ => SignalAction::Shutdown,
    }
}

struct Streams {
    term: unix::Signal,
    int: unix::Signal,
    abrt: unix::Signal,
    hup: unix::Signal,
    usr2: unix::Signal,
}

/// Registered signal listeners; inert when disabled.
pub(crate) struct Signals {
    streams: Option<Streams>,
}

impl Signals {
    /// Registers the listeners, or returns an inert set when `enabled` is false.
    pub fn install(enabled: bool) -> std::io::Result<Self> {
        if !enabled {
            return Ok(Self { streams: None });
        }
        Ok(Self {
            streams: Some(Streams {
                term: unix::signal(SignalKind::terminate())?,
                int: unix::signal(SignalKind::interrupt())?,
                abrt: unix::signal(SignalKind::from_raw(libc::SIGABRT))?,
                hup: unix::signal(SignalKind::hangup())?,
                usr2: unix::signal(SignalKind::user_defined2())?,
            }),
        })
    }

    /// Waits for the next signal. Never completes when disabled.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Signal {
        let Some(s) = self.streams.as_mut() else {
            return std::future::pending().await;
        };
        tokio::select! {
            Some(()) = s.term.recv() => Signal::SIGTERM,
            Some(()) = s.int.recv() => Signal::SIGINT,
            Some(()) = s.abrt.recv() => Signal::SIGABRT,
            Some(()) = s.hup.recv() => Signal::SIGHUP,
            Some(()) = s.usr2.recv() => Signal::SIGUSR2,
            else => std::future::pending().await,
        }
    }
}
