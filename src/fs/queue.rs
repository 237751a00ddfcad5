//! Per-client command queue.
//!
//! An ordered sequence of command blocks with a single mutex guarding the
//! queue itself, the in-flight marker, and the last-dequeued back
//! reference. Ordinary enqueues keep the sequence sorted by priority
//! (lower value first, FIFO among equals); front pushes bypass priority
//! entirely and are how Busy retries and read-chunk continuations keep
//! their place at the head.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::fs::cmdblock::FsCmdBlockBody;

pub(crate) struct CmdQueueState {
    queue: VecDeque<Arc<FsCmdBlockBody>>,
    /// True while one command is out with the FSA device. At most one per
    /// client, by construction.
    in_flight: bool,
    /// The block most recently handed to the device.
    pub(crate) last_dequeued: Option<Arc<FsCmdBlockBody>>,
    /// Number of re-enqueues (Busy retries and chunk continuations).
    pub(crate) requeues: u64,
}

pub(crate) struct FsCmdQueue {
    state: Mutex<CmdQueueState>,
}

impl FsCmdQueue {
    pub(crate) fn new() -> Self {
        FsCmdQueue {
            state: Mutex::new(CmdQueueState {
                queue: VecDeque::new(),
                in_flight: false,
                last_dequeued: None,
                requeues: 0,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CmdQueueState> {
        self.state.lock().unwrap()
    }
}

impl CmdQueueState {
    /// Insert in priority order, after every block of equal priority.
    pub(crate) fn enqueue(&mut self, block: Arc<FsCmdBlockBody>) {
        let priority = block.priority();
        let position = self
            .queue
            .iter()
            .position(|queued| queued.priority() > priority)
            .unwrap_or(self.queue.len());
        self.queue.insert(position, block);
    }

    pub(crate) fn push_front(&mut self, block: Arc<FsCmdBlockBody>) {
        self.queue.push_front(block);
    }

    /// Take the next block to submit, marking it in flight. Returns `None`
    /// while a command is already out or the queue is empty.
    pub(crate) fn dequeue(&mut self) -> Option<Arc<FsCmdBlockBody>> {
        if self.in_flight {
            return None;
        }
        let block = self.queue.pop_front()?;
        self.in_flight = true;
        self.last_dequeued = Some(block.clone());
        Some(block)
    }

    /// Mark the in-flight command finished so the next dequeue can happen.
    pub(crate) fn finish_cmd(&mut self) {
        self.in_flight = false;
    }

    /// Remove a specific queued block (cancellation before dequeue).
    pub(crate) fn remove(&mut self, block: &Arc<FsCmdBlockBody>) -> Option<Arc<FsCmdBlockBody>> {
        let position = self
            .queue
            .iter()
            .position(|queued| Arc::ptr_eq(queued, block))?;
        self.queue.remove(position)
    }

    pub(crate) fn clear_last_dequeued_if(&mut self, block: &Arc<FsCmdBlockBody>) {
        if let Some(last) = &self.last_dequeued {
            if Arc::ptr_eq(last, block) {
                self.last_dequeued = None;
            }
        }
    }

    pub(crate) fn is_last_dequeued(&self, block: &Arc<FsCmdBlockBody>) -> bool {
        self.last_dequeued
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, block))
    }

    /// Drain every queued block (client teardown).
    pub(crate) fn drain(&mut self) -> Vec<Arc<FsCmdBlockBody>> {
        self.queue.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::cmdblock::FsCmdBlock;

    fn block_with_priority(priority: u8) -> Arc<FsCmdBlockBody> {
        let block = FsCmdBlock::new();
        block.set_priority(priority);
        block.body
    }

    #[test]
    fn dequeue_follows_priority_then_fifo() {
        let queue = FsCmdQueue::new();
        let low = block_with_priority(20);
        let high = block_with_priority(10);
        let default_a = block_with_priority(16);
        let default_b = block_with_priority(16);

        let mut state = queue.lock();
        state.enqueue(low.clone());
        state.enqueue(default_a.clone());
        state.enqueue(high.clone());
        state.enqueue(default_b.clone());

        let first = state.dequeue().unwrap();
        assert!(Arc::ptr_eq(&first, &high));

        // One command in flight: nothing else dequeues until finished.
        assert!(state.dequeue().is_none());
        state.finish_cmd();

        let second = state.dequeue().unwrap();
        assert!(Arc::ptr_eq(&second, &default_a));
        state.finish_cmd();
        let third = state.dequeue().unwrap();
        assert!(Arc::ptr_eq(&third, &default_b));
        state.finish_cmd();
        let fourth = state.dequeue().unwrap();
        assert!(Arc::ptr_eq(&fourth, &low));
    }

    #[test]
    fn push_front_bypasses_priority() {
        let queue = FsCmdQueue::new();
        let urgent = block_with_priority(31);
        let normal = block_with_priority(0);

        let mut state = queue.lock();
        state.enqueue(normal.clone());
        state.push_front(urgent.clone());

        let first = state.dequeue().unwrap();
        assert!(Arc::ptr_eq(&first, &urgent));
    }

    #[test]
    fn remove_targets_the_exact_block() {
        let queue = FsCmdQueue::new();
        let a = block_with_priority(16);
        let b = block_with_priority(16);

        let mut state = queue.lock();
        state.enqueue(a.clone());
        state.enqueue(b.clone());

        let removed = state.remove(&a).unwrap();
        assert!(Arc::ptr_eq(&removed, &a));
        assert!(state.remove(&a).is_none());
        assert_eq!(state.len(), 1);
    }
}
