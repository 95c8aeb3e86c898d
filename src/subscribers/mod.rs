//! # Event subscribers for the procvisor master.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and
//! built-in implementations for observing lifecycle events.
//!
//! ## Architecture
//! ```text
//!   Master ── emit(Event) ──► SubscriberSet ──► per-subscriber queue
//!                                                   │
//!                                              ┌────┴────┬─────────┐
//!                                              ▼         ▼         ▼
//!                                          LogWriter  Metrics   Custom ...
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
