//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging custom lifecycle observers into
//! the master (the "external observer/IPC relay" collaborator). Each subscriber is
//! driven by a dedicated worker loop fed by a bounded queue owned by the
//! [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching, retries); they do **not** block
//!   the master event loop nor other subscribers.
//! - Each subscriber **declares** its preferred queue capacity via
//!   [`Subscribe::queue_capacity`]. If a queue overflows, events for that
//!   subscriber are **dropped** and a `SubscriberOverflow` event is published.
//!
//! ## Example
//! ```rust
//! use procvisor::{Event, EventKind, Subscribe};
//!
//! struct CrashCounter(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl Subscribe for CrashCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::Exit && ev.code != Some(0) {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "crash-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// Called from a subscriber-dedicated worker task. Implementations should avoid
/// blocking the async runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event for this subscriber.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    ///
    /// On overflow, events for this subscriber are **dropped** (warn).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
