//! # Crash-loop detection.
//!
//! One pool-wide counter of `online` events (and failed spawns), zeroed by a
//! repeating reset tick. Exceeding `target × factor` inside one window means
//! workers are dying as fast as they are forked: the master gives up and shuts
//! down instead of reforking forever.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

pub(crate) struct ForkLoopGuard {
    count: usize,
    threshold: usize,
    window: Duration,
    reset: Interval,
    tripped: bool,
}

impl ForkLoopGuard {
    pub fn new(threshold: usize, window: Duration) -> Self {
        let window = window.max(Duration::from_millis(1));
        let mut reset = tokio::time::interval_at(Instant::now() + window, window);
        reset.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            count: 0,
            threshold,
            window,
            reset,
            tripped: false,
        }
    }

    /// Counts one start. Returns `true` exactly once: when the threshold is first exceeded.
    pub fn record(&mut self) -> bool {
        self.count += 1;
        if self.count > self.threshold && !self.tripped {
            self.tripped = true;
            return true;
        }
        false
    }

    /// Completes at the next window boundary.
    ///
    /// Cancel safe.
    pub async fn tick(&mut self) {
        self.reset.tick().await;
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[inline]
    pub fn window(&self) -> Duration {
        self.window
    }
}
