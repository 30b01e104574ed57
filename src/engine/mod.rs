//! Ring engine abstraction
//!
//! The `RingEngine` trait is the seam between the pump loop and the kernel's
//! asynchronous I/O ring. It exposes exactly what the loop needs: queue one
//! write descriptor, flush the queued descriptors to the kernel, copy out a
//! batch of completions without retiring them, and retire the batch once the
//! caller has verified it.
//!
//! Two implementations exist: [`uring::UringEngine`] wraps a real io_uring
//! instance (Linux 5.1+), and [`mock::MockEngine`] is a deterministic
//! in-memory double used by the pump tests.
//!
//! # Completion acknowledgment
//!
//! `poll_completions()` hands back copies; the engine keeps the batch pending
//! until `acknowledge(n)` retires exactly `n` entries. The pump only
//! acknowledges after every entry in the batch has passed validation, so a
//! batch that names an unknown buffer slot is never half-consumed: the
//! process stops with the batch still pending and the accounting intact.

use crate::Result;
use thiserror::Error;

pub mod mock;

#[cfg(feature = "io_uring")]
pub mod uring;

/// Errors from queueing a descriptor into the submission ring
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// No submission slot available. Expected backpressure: flush and drain
    /// before preparing more work.
    #[error("submission ring full")]
    RingFull,
}

/// One fixed-size write, addressed to a registered file by its table index.
///
/// The buffer must stay valid (and the owning pool slot in-flight) until the
/// completion carrying `tag` is reconciled.
#[derive(Debug, Clone, Copy)]
pub struct WriteOp {
    /// Index into the registered-file table, not a raw descriptor
    pub fd_index: u32,
    /// Source buffer
    pub buf: *const u8,
    /// Write length in bytes
    pub len: u32,
    /// Correlation tag echoed unchanged on completion (the pool slot index)
    pub tag: u64,
}

// Safety: the raw pointer is produced by SlotPool, which outlives the engine,
// and ops never cross threads.
unsafe impl Send for WriteOp {}

/// A completed operation as reported by the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Correlation tag from the originating [`WriteOp`]
    pub tag: u64,
    /// Raw result code: bytes written on success, negated errno on failure
    pub result: i32,
}

/// Submission/completion ring seam used by the pump loop.
///
/// Engines are single-threaded by design: the pump owns its engine and the
/// kernel side does the parallelism.
pub trait RingEngine: Send {
    /// Number of submission slots the ring was created with
    fn queue_depth(&self) -> usize;

    /// Queue one write descriptor without submitting it.
    ///
    /// Fails with [`EngineError::RingFull`] when the submission queue has no
    /// free slot; the caller must flush before retrying.
    fn push_write(&mut self, op: WriteOp) -> std::result::Result<(), EngineError>;

    /// Make all queued descriptors visible to the kernel.
    ///
    /// Returns the number of entries the kernel accepted. Callers that
    /// require full acceptance must compare this against their prepared
    /// count themselves.
    fn submit(&mut self) -> Result<usize>;

    /// Copy out all currently available completions without blocking.
    ///
    /// The returned entries stay pending inside the engine until
    /// [`RingEngine::acknowledge`] retires them; repeated polls may grow the
    /// pending batch but never drop entries.
    fn poll_completions(&mut self) -> Result<Vec<Completion>>;

    /// Retire `count` entries from the pending batch.
    ///
    /// Must only be called after the caller has validated those entries.
    fn acknowledge(&mut self, count: usize);

    /// Submit queued descriptors and block until at least `want` completions
    /// are available. Shutdown-drain helper; never used in the hot loop.
    fn submit_and_wait(&mut self, want: usize) -> Result<usize>;
}
