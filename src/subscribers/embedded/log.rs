//! # LogWriter: lifecycle events rendered through `tracing`
//!
//! A minimal subscriber that turns every [`Event`] into one log line, the way
//! an operator expects to read a master log.
//!
//! ## Example output
//! ```text
//! INFO procvisor::events: [fork] worker=#1 pid=4242
//! INFO procvisor::events: [listening] worker=#1 pid=4242 address=0.0.0.0:8080
//! WARN procvisor::events: [exit] worker=#1 pid=4242 code=1 signal=-
//! ERROR procvisor::events: [fork-loop] online=21 threshold=20
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn worker(e: &Event) -> String {
    e.worker.map_or_else(|| "-".to_string(), |id| id.to_string())
}

fn pid(e: &Event) -> String {
    e.pid.map_or_else(|| "-".to_string(), |p| p.to_string())
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::Start => {
                tracing::info!(target: "procvisor::events", "[start] workers={reason}");
            }
            EventKind::Stop => tracing::info!(target: "procvisor::events", "[stop]"),
            EventKind::Restart => {
                tracing::info!(target: "procvisor::events", "[restart] outcome={reason}");
            }
            EventKind::Shutdown => {
                tracing::info!(target: "procvisor::events", "[shutdown] cause={reason}");
            }
            EventKind::Reload => tracing::info!(target: "procvisor::events", "[reload]"),
            EventKind::ForkLoop => {
                tracing::error!(target: "procvisor::events", "[fork-loop] {reason}");
            }
            EventKind::Fork => {
                tracing::info!(target: "procvisor::events", "[fork] worker={} pid={}", worker(e), pid(e));
            }
            EventKind::Online => {
                tracing::debug!(target: "procvisor::events", "[online] worker={} pid={}", worker(e), pid(e));
            }
            EventKind::Listening => {
                tracing::info!(
                    target: "procvisor::events",
                    "[listening] worker={} pid={} address={}",
                    worker(e),
                    pid(e),
                    e.address.as_deref().unwrap_or("-"),
                );
            }
            EventKind::Disconnect => {
                tracing::debug!(target: "procvisor::events", "[disconnect] worker={} pid={}", worker(e), pid(e));
            }
            EventKind::Exit => {
                tracing::warn!(
                    target: "procvisor::events",
                    "[exit] worker={} pid={} code={} signal={}",
                    worker(e),
                    pid(e),
                    e.code.map_or_else(|| "-".to_string(), |c| c.to_string()),
                    e.signal.as_deref().unwrap_or("-"),
                );
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: "procvisor::events", "[subscriber-overflow] {reason}");
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(target: "procvisor::events", "[subscriber-panicked] {reason}");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
