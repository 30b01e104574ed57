//! wqpulse - io_uring worker-pool affinity stress tool
//!
//! wqpulse issues an unbounded stream of fixed-size asynchronous writes across
//! a small set of registered files, keeping the submission ring saturated from
//! a bounded pool of reusable buffers. The submitting thread, the optional
//! SQPOLL thread, and the kernel's io-wq workers can each be pinned to their
//! own CPU sets, which is the whole point: the tool exists to exercise the
//! kernel's io-wq CPU-affinity handling under sustained load.
//!
//! # Architecture
//!
//! - **SlotPool**: one aligned allocation sliced into fixed blocks, recycled
//!   through an intrusive index-linked free list
//! - **RingEngine**: thin seam over the io_uring submission/completion queues,
//!   with a mock twin for tests
//! - **Pump**: the fill/drain loop that correlates completions back to pool
//!   slots and enforces the ring accounting invariants

pub mod affinity;
pub mod config;
pub mod engine;
pub mod pool;
pub mod pump;
pub mod stats;
pub mod target;

// Re-export commonly used types
pub use config::Config;
pub use engine::RingEngine;
pub use pump::Pump;

/// Result type used throughout wqpulse
pub type Result<T> = anyhow::Result<T>;
