//! Lifecycle events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the master.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publisher**: the `Master` event loop (one event per transition), plus
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `MasterHandle::subscribe()` receivers and the `SubscriberSet`
//!   fed directly by the master.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
