//! Mock ring engine for testing
//!
//! Simulates the submission/completion ring without any system calls, so the
//! pump's accounting logic can be tested deterministically. The mock keeps
//! the same three-stage pipeline as the real ring: descriptors are *queued*
//! by `push_write`, become *submitted* on `submit`, and appear as a pending
//! *completion batch* on `poll_completions` until acknowledged.
//!
//! State lives behind an `Arc<Mutex<..>>` and the engine is `Clone`, so a
//! test can keep one handle for failure injection and assertions while the
//! pump owns the other:
//!
//! - `accept_at_most(n)` makes the next `submit` accept only `n` entries,
//!   to exercise the short-submit protocol violation
//! - `inject_completion(tag, result)` plants an arbitrary completion, to
//!   exercise duplicate/stale tag detection
//! - `hold_completions()` keeps submitted work outstanding, to exercise
//!   backpressure

use super::{Completion, EngineError, RingEngine, WriteOp};
use crate::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    queued: Vec<WriteOp>,
    submitted: VecDeque<WriteOp>,
    pending: Vec<Completion>,

    /// Cap on how many entries the next submit() accepts, if set
    short_accept: Option<usize>,
    /// When true, submitted ops do not complete until released
    hold: bool,

    total_submitted: usize,
    total_acknowledged: usize,
    /// fd_index of every op in submission order, for round-robin assertions
    fd_trace: Vec<u32>,
}

/// In-memory ring double with a bounded submission queue
#[derive(Clone)]
pub struct MockEngine {
    queue_depth: usize,
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    /// Create a mock ring with the given submission queue depth
    pub fn new(queue_depth: usize) -> Self {
        MockEngine {
            queue_depth,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Make the next `submit` accept at most `n` entries
    pub fn accept_at_most(&self, n: usize) {
        self.state.lock().unwrap().short_accept = Some(n);
    }

    /// Hold submitted operations instead of completing them on poll
    pub fn hold_completions(&self) {
        self.state.lock().unwrap().hold = true;
    }

    /// Resume completing submitted operations
    pub fn release_completions(&self) {
        self.state.lock().unwrap().hold = false;
    }

    /// Plant a completion that never came from a submission
    pub fn inject_completion(&self, tag: u64, result: i32) {
        self.state
            .lock()
            .unwrap()
            .pending
            .push(Completion { tag, result });
    }

    /// Number of submitted-but-uncompleted operations
    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }

    /// Total entries accepted across all submits
    pub fn total_submitted(&self) -> usize {
        self.state.lock().unwrap().total_submitted
    }

    /// Total completion entries retired via acknowledge()
    pub fn total_acknowledged(&self) -> usize {
        self.state.lock().unwrap().total_acknowledged
    }

    /// fd_index of every submitted op, in submission order
    pub fn fd_trace(&self) -> Vec<u32> {
        self.state.lock().unwrap().fd_trace.clone()
    }
}

impl RingEngine for MockEngine {
    fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    fn push_write(&mut self, op: WriteOp) -> std::result::Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.queued.len() >= self.queue_depth {
            return Err(EngineError::RingFull);
        }
        state.queued.push(op);
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut accepted = state.queued.len();
        if let Some(cap) = state.short_accept.take() {
            accepted = accepted.min(cap);
        }
        // Entries the kernel did not accept stay queued, as on a real ring.
        let moved: Vec<WriteOp> = state.queued.drain(..accepted).collect();
        for op in moved {
            state.fd_trace.push(op.fd_index);
            state.submitted.push_back(op);
        }
        state.total_submitted += accepted;
        Ok(accepted)
    }

    fn poll_completions(&mut self) -> Result<Vec<Completion>> {
        let mut state = self.state.lock().unwrap();
        if !state.hold {
            while let Some(op) = state.submitted.pop_front() {
                let completion = Completion {
                    tag: op.tag,
                    result: op.len as i32,
                };
                state.pending.push(completion);
            }
        }
        Ok(state.pending.clone())
    }

    fn acknowledge(&mut self, count: usize) {
        let mut state = self.state.lock().unwrap();
        let count = count.min(state.pending.len());
        state.pending.drain(..count);
        state.total_acknowledged += count;
    }

    fn submit_and_wait(&mut self, _want: usize) -> Result<usize> {
        // The mock completes synchronously, so waiting just releases held
        // completions and flushes the queue.
        self.state.lock().unwrap().hold = false;
        self.submit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(tag: u64) -> WriteOp {
        WriteOp {
            fd_index: 0,
            buf: std::ptr::null(),
            len: 4096,
            tag,
        }
    }

    #[test]
    fn queued_ops_complete_after_submit() {
        let mut engine = MockEngine::new(4);
        engine.push_write(op(7)).unwrap();
        engine.push_write(op(9)).unwrap();

        // Nothing completes before submit.
        assert!(engine.poll_completions().unwrap().is_empty());

        assert_eq!(engine.submit().unwrap(), 2);
        let batch = engine.poll_completions().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], Completion { tag: 7, result: 4096 });
        assert_eq!(batch[1], Completion { tag: 9, result: 4096 });
    }

    #[test]
    fn push_fails_when_queue_is_full() {
        let mut engine = MockEngine::new(2);
        engine.push_write(op(0)).unwrap();
        engine.push_write(op(1)).unwrap();
        assert_eq!(engine.push_write(op(2)), Err(EngineError::RingFull));
    }

    #[test]
    fn pending_batch_survives_until_acknowledged() {
        let mut engine = MockEngine::new(4);
        engine.push_write(op(1)).unwrap();
        engine.submit().unwrap();

        assert_eq!(engine.poll_completions().unwrap().len(), 1);
        // Unacknowledged entries are reported again.
        assert_eq!(engine.poll_completions().unwrap().len(), 1);

        engine.acknowledge(1);
        assert!(engine.poll_completions().unwrap().is_empty());
        assert_eq!(engine.total_acknowledged(), 1);
    }

    #[test]
    fn short_accept_leaves_remainder_queued() {
        let mut engine = MockEngine::new(4);
        for tag in 0..3 {
            engine.push_write(op(tag)).unwrap();
        }
        engine.accept_at_most(1);
        assert_eq!(engine.submit().unwrap(), 1);
        // The remainder is accepted by a later submit.
        assert_eq!(engine.submit().unwrap(), 2);
    }

    #[test]
    fn held_completions_stay_outstanding() {
        let mut engine = MockEngine::new(4);
        let probe = engine.clone();
        engine.push_write(op(0)).unwrap();
        engine.submit().unwrap();

        probe.hold_completions();
        assert!(engine.poll_completions().unwrap().is_empty());
        assert_eq!(probe.outstanding(), 1);

        probe.release_completions();
        assert_eq!(engine.poll_completions().unwrap().len(), 1);
    }
}
