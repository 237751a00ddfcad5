//! Bounded blocking message queue.
//!
//! [`MessageQueue`] carries completion messages between the kernel reply
//! path, the per-core AppIO pump, and user code waiting on synchronous
//! calls. The buffer is a lock-free [`ArrayQueue`]; blocking is layered on
//! top with a waiter mutex and two condition variables.
//!
//! ## Lost-wakeup guarantee
//!
//! Senders notify the receive side while holding the waiter mutex, and a
//! receiver re-checks the buffer under that same mutex before sleeping, so a
//! push can never slip between a receiver's check and its wait.
//!
//! ## Destruction
//!
//! [`MessageQueue::destroy`] marks the queue dead and wakes every blocked
//! thread; subsequent operations return [`QueueError::Destroyed`]. Messages
//! still buffered at destruction are dropped.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue would block")]
    WouldBlock,
    #[error("queue destroyed")]
    Destroyed,
}

/// A bounded MPMC message queue with blocking and non-blocking operations.
pub struct MessageQueue<T> {
    buffer: ArrayQueue<T>,
    waiters: Mutex<()>,
    send_cond: Condvar,
    recv_cond: Condvar,
    destroyed: AtomicBool,
}

impl<T> MessageQueue<T> {
    /// Create a queue holding at most `capacity` messages (rounded up to 1).
    pub fn new(capacity: usize) -> Self {
        MessageQueue {
            buffer: ArrayQueue::new(capacity.max(1)),
            waiters: Mutex::new(()),
            send_cond: Condvar::new(),
            recv_cond: Condvar::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Send a message, blocking while the queue is full.
    pub fn send(&self, msg: T) -> Result<(), QueueError> {
        let mut pending = Some(msg);
        let mut guard = self.waiters.lock().unwrap();

        loop {
            if self.destroyed.load(Ordering::Acquire) {
                return Err(QueueError::Destroyed);
            }

            match self.buffer.push(pending.take().unwrap()) {
                Ok(()) => {
                    self.recv_cond.notify_one();
                    return Ok(());
                }
                Err(msg) => {
                    pending = Some(msg);
                    guard = self.send_cond.wait(guard).unwrap();
                }
            }
        }
    }

    /// Send without blocking.
    pub fn try_send(&self, msg: T) -> Result<(), QueueError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(QueueError::Destroyed);
        }
        match self.buffer.push(msg) {
            Ok(()) => {
                let _guard = self.waiters.lock().unwrap();
                self.recv_cond.notify_one();
                Ok(())
            }
            Err(_) => Err(QueueError::WouldBlock),
        }
    }

    /// Receive a message, blocking while the queue is empty.
    pub fn recv(&self) -> Result<T, QueueError> {
        let mut guard = self.waiters.lock().unwrap();

        loop {
            if let Some(msg) = self.buffer.pop() {
                self.send_cond.notify_one();
                return Ok(msg);
            }
            if self.destroyed.load(Ordering::Acquire) {
                return Err(QueueError::Destroyed);
            }
            guard = self.recv_cond.wait(guard).unwrap();
        }
    }

    /// Receive without blocking.
    pub fn try_recv(&self) -> Result<T, QueueError> {
        if let Some(msg) = self.buffer.pop() {
            let _guard = self.waiters.lock().unwrap();
            self.send_cond.notify_one();
            return Ok(msg);
        }
        if self.destroyed.load(Ordering::Acquire) {
            return Err(QueueError::Destroyed);
        }
        Err(QueueError::WouldBlock)
    }

    /// Mark the queue destroyed and wake every blocked thread.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        let _guard = self.waiters.lock().unwrap();
        self.send_cond.notify_all();
        self.recv_cond.notify_all();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.is_full()
    }
}
