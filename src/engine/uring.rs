//! io_uring ring engine
//!
//! Wraps a real io_uring instance (Linux 5.1+). Besides the submit/poll hot
//! path this module owns the one-shot setup calls the rest of the tool
//! assumes have already succeeded:
//!
//! - ring creation with `IORING_SETUP_SINGLE_ISSUER` plus either
//!   `COOP_TASKRUN` (default) or `SQPOLL` with an optional dedicated CPU
//! - `IORING_REGISTER_IOWQ_AFF` to confine the kernel's io-wq workers to the
//!   configured CPU set
//! - `IORING_REGISTER_IOWQ_MAX_WORKERS` to cap the worker pool
//! - `IORING_REGISTER_FILES` so writes address targets as fixed-file indices
//!
//! Writes are queued as `IORING_OP_WRITE` against `Fixed(fd_index)` at offset
//! zero, optionally flagged `IOSQE_ASYNC` to force execution on the worker
//! pool instead of inline completion.

use super::{Completion, EngineError, RingEngine, WriteOp};
use crate::affinity;
use crate::config::RingConfig;
use crate::Result;
use anyhow::Context;
use io_uring::{opcode, squeue, types, IoUring};
use std::os::unix::io::RawFd;

/// Ring engine backed by a kernel io_uring instance
pub struct UringEngine {
    ring: IoUring,
    queue_depth: usize,
    sqe_async: bool,

    /// Completions copied out of the CQ but not yet acknowledged.
    ///
    /// The io-uring crate publishes the CQ head when its iterator drops, so
    /// the deferred-acknowledgment protocol is kept here: entries stay in
    /// this buffer until `acknowledge()` retires them, and a batch that fails
    /// validation is never retired.
    pending: Vec<Completion>,
}

impl UringEngine {
    /// Create the ring and run the one-shot registration calls.
    ///
    /// Errors name the failing setup call and carry the underlying OS error,
    /// since each call maps to a distinct kernel facility.
    pub fn new(config: &RingConfig, files: &[RawFd]) -> Result<Self> {
        let mut builder = IoUring::builder();
        builder.setup_single_issuer();

        if config.sqpoll {
            builder.setup_sqpoll(config.sqpoll_idle_ms);
            if let Some(cpu) = config.sqpoll_cpu {
                builder.setup_sqpoll_cpu(cpu);
            }
        } else {
            builder.setup_coop_taskrun();
        }

        let ring = builder
            .build(config.queue_depth as u32)
            .context("io_uring queue init failed")?;

        if !config.worker_cpus.is_empty() {
            let set = affinity::cpu_set(&config.worker_cpus)?;
            // Safety: the mask is a plain value copied by the kernel before
            // the call returns.
            unsafe {
                ring.submitter()
                    .register_iowq_aff(&set)
                    .context("register_iowq_aff failed")?;
            }
        }

        if let Some(max) = config.max_workers {
            // One limit per worker type (bounded and unbounded).
            let mut limits = [max, max];
            ring.submitter()
                .register_iowq_max_workers(&mut limits)
                .context("register_iowq_max_workers failed")?;
        }

        ring.submitter()
            .register_files(files)
            .context("register_files failed")?;

        Ok(UringEngine {
            ring,
            queue_depth: config.queue_depth,
            sqe_async: config.sqe_async,
            pending: Vec::new(),
        })
    }

    fn drain_cq(&mut self) {
        for cqe in self.ring.completion() {
            self.pending.push(Completion {
                tag: cqe.user_data(),
                result: cqe.result(),
            });
        }
    }
}

impl RingEngine for UringEngine {
    fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    fn push_write(&mut self, op: WriteOp) -> std::result::Result<(), EngineError> {
        let mut entry = opcode::Write::new(types::Fixed(op.fd_index), op.buf, op.len)
            .offset(0)
            .build()
            .user_data(op.tag);

        if self.sqe_async {
            entry = entry.flags(squeue::Flags::ASYNC);
        }

        // Safety: the buffer is a pool slot held in-flight until the
        // completion for this tag is reconciled.
        unsafe {
            self.ring
                .submission()
                .push(&entry)
                .map_err(|_| EngineError::RingFull)
        }
    }

    fn submit(&mut self) -> Result<usize> {
        self.ring.submit().context("io_uring_submit failed")
    }

    fn poll_completions(&mut self) -> Result<Vec<Completion>> {
        self.drain_cq();
        Ok(self.pending.clone())
    }

    fn acknowledge(&mut self, count: usize) {
        let count = count.min(self.pending.len());
        self.pending.drain(..count);
    }

    fn submit_and_wait(&mut self, want: usize) -> Result<usize> {
        self.ring
            .submit_and_wait(want)
            .context("io_uring submit_and_wait failed")
    }
}
