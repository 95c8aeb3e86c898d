//! # Inter-worker message relay.
//!
//! Workers may send arbitrary payloads up to the master. The master hands each
//! one to an injected [`MessageHandler`] together with a [`Relay`], the handler's
//! only access to the pool.
//!
//! ```text
//!   worker #2 ── {"type":"message","payload":P} ──► Master
//!                                                     └─► handler.on_message(P, #2, &relay)
//!                                                            └─► relay.send_to_others(#2, P)
//!                                                                  ├─► worker #1
//!                                                                  └─► worker #3
//! ```
//!
//! Handlers run inside the master event loop: keep them short and non-blocking.

use serde_json::Value;

use crate::core::Pool;
use crate::error::WorkerError;
use crate::process::{MasterMessage, WorkerId};

/// Injected capability invoked for every message a worker sends up.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, payload: &Value, origin: WorkerId, relay: &Relay<'_>);
}

impl<F> MessageHandler for F
where
    F: Fn(&Value, WorkerId, &Relay<'_>) + Send + Sync + 'static,
{
    fn on_message(&self, payload: &Value, origin: WorkerId, relay: &Relay<'_>) {
        self(payload, origin, relay)
    }
}

/// Built-in handler forwarding every message to all workers except its origin.
#[derive(Clone, Copy, Debug, Default)]
pub struct PubSub;

impl MessageHandler for PubSub {
    fn on_message(&self, payload: &Value, origin: WorkerId, relay: &Relay<'_>) {
        let delivered = relay.send_to_others(origin, payload);
        tracing::trace!(origin = %origin, delivered, "pubsub relay");
    }
}

/// Send access to the live workers, borrowed for one handler call.
pub struct Relay<'a> {
    pool: &'a Pool,
}

impl<'a> Relay<'a> {
    pub(crate) fn new(pool: &'a Pool) -> Self {
        Self { pool }
    }

    /// Ids of live workers, ascending.
    pub fn workers(&self) -> Vec<WorkerId> {
        self.pool.ids()
    }

    /// Sends `payload` to one worker.
    pub fn send_to(&self, id: WorkerId, payload: &Value) -> Result<(), WorkerError> {
        let worker = self.pool.get(id).ok_or(WorkerError::UnknownWorker(id))?;
        worker.process.send(&MasterMessage::message(payload.clone()))
    }

    /// Sends `payload` to every connected worker but `origin`. Returns the delivery count.
    pub fn send_to_others(&self, origin: WorkerId, payload: &Value) -> usize {
        self.fan_out(Some(origin), payload)
    }

    /// Sends `payload` to every connected worker. Returns the delivery count.
    pub fn broadcast(&self, payload: &Value) -> usize {
        self.fan_out(None, payload)
    }

    fn fan_out(&self, skip: Option<WorkerId>, payload: &Value) -> usize {
        let msg = MasterMessage::message(payload.clone());
        self.pool
            .each_worker()
            .filter(|w| Some(w.id) != skip && w.process.is_connected())
            .filter(|w| match w.process.send(&msg) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(worker = %w.id, error = %e, "relay delivery failed");
                    false
                }
            })
            .count()
    }
}
