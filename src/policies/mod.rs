//! Timing policies.
//!
//! ## Contents
//! - [`JitterPolicy`] randomization of per-worker deadlines to avoid synchronized recycling
//!
//! ## Quick wiring
//! ```text
//! online(worker)
//!      └─► lifecycle deadline = JitterPolicy::Full.splay(max_age, start + stop)
//! ```

mod jitter;

pub use jitter::JitterPolicy;
