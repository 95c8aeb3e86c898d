//! # Control handle for a running master.
//!
//! [`MasterHandle`] is the only way to talk to a [`Master`](super::Master)
//! once `run` owns it. Every request is a message on the master's inbox; the
//! ones with an answer carry a `oneshot` that the event loop resolves.
//!
//! All methods fail with [`RuntimeError::MasterGone`] after the event loop
//! returned.

use std::net::IpAddr;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::{Control, Inbound, RestartOutcome, WorkerInfo};
use crate::error::RuntimeError;
use crate::events::{Bus, Event};

/// Cloneable control handle.
#[derive(Clone, Debug)]
pub struct MasterHandle {
    tx: mpsc::UnboundedSender<Inbound>,
    bus: Bus,
}

impl MasterHandle {
    pub(super) fn new(tx: mpsc::UnboundedSender<Inbound>, bus: Bus) -> Self {
        Self { tx, bus }
    }

    fn send(&self, ctl: Control) -> Result<(), RuntimeError> {
        self.tx
            .send(Inbound::Control(ctl))
            .map_err(|_| RuntimeError::MasterGone)
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Control) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| RuntimeError::MasterGone)
    }

    /// Rolling restart of every live worker, one at a time.
    ///
    /// Resolves when the pass ends. A request made while a pass is running is
    /// served by one extra pass afterwards.
    pub async fn restart(&self) -> Result<RestartOutcome, RuntimeError> {
        self.ask(|tx| Control::Restart(Some(tx))).await
    }

    /// Fire-and-forget variant of [`restart`](Self::restart).
    pub fn request_restart(&self) -> Result<(), RuntimeError> {
        self.send(Control::Restart(None))
    }

    /// Emits `stop`, shuts down and resolves once every worker has exited.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.ask(Control::Stop).await
    }

    /// Starts the shutdown without waiting for it. Idempotent.
    pub fn shutdown(&self) -> Result<(), RuntimeError> {
        self.send(Control::Shutdown)
    }

    /// Broadcasts `reload` to every worker, then performs a rolling restart.
    pub fn reload(&self) -> Result<(), RuntimeError> {
        self.send(Control::Reload)
    }

    /// Snapshot of the live workers, ascending by id.
    pub async fn workers(&self) -> Result<Vec<WorkerInfo>, RuntimeError> {
        self.ask(Control::Workers).await
    }

    /// Number of workers not yet observed exiting.
    pub async fn count(&self) -> Result<usize, RuntimeError> {
        Ok(self.workers().await?.len())
    }

    /// Sends an application message to every connected worker.
    /// Returns the number of deliveries.
    pub async fn broadcast(&self, payload: Value) -> Result<usize, RuntimeError> {
        self.ask(|tx| Control::Broadcast(payload, tx)).await
    }

    /// Worker that connections from `ip` stick to, if any worker is live.
    pub async fn route(&self, ip: IpAddr) -> Result<Option<WorkerInfo>, RuntimeError> {
        self.ask(|tx| Control::Route(ip, tx)).await
    }

    /// Receiver observing every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }
}
