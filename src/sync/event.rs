//! Blocking event primitive with auto-reset and manual-reset modes.
//!
//! An [`OsEvent`] is the suspension point used by the IPC driver: a request's
//! finish event is waited on by the submitting thread and signalled from the
//! response path, and the driver's free-list event releases threads stuck in
//! request allocation.
//!
//! ## Reset modes
//!
//! - `AutoReset`: a signal wakes exactly one waiter and is consumed by it.
//!   A signal delivered while nobody is waiting is remembered until the next
//!   `wait` (signal-then-wait is not a lost wakeup).
//! - `ManualReset`: once signalled, every waiter passes through until
//!   [`OsEvent::reset`] is called.
//!
//! [`OsEvent::signal_all`] releases every thread currently blocked regardless
//! of mode; for an auto-reset event it does not leave the event signalled.
//! This is the "wake all free-list waiters" broadcast, where each woken
//! thread re-checks its own condition.

use std::sync::{Condvar, Mutex};

/// Reset behavior of an [`OsEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    AutoReset,
    ManualReset,
}

struct EventState {
    signalled: bool,
    /// Bumped by `signal_all`; a waiter that observes a generation change
    /// was released by a broadcast and returns without consuming `signalled`.
    generation: u64,
}

/// A blocking event.
pub struct OsEvent {
    mode: EventMode,
    state: Mutex<EventState>,
    cond: Condvar,
}

impl OsEvent {
    /// Create a new event with the given initial signalled state and mode.
    pub fn new(signalled: bool, mode: EventMode) -> Self {
        OsEvent {
            mode,
            state: Mutex::new(EventState {
                signalled,
                generation: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Signal the event.
    ///
    /// Auto-reset: wakes one waiter, which consumes the signal. If no thread
    /// is waiting the event stays signalled until the next `wait`.
    /// Manual-reset: wakes all waiters and leaves the event signalled.
    pub fn signal(&self) {
        let mut state = self.state.lock().unwrap();
        state.signalled = true;
        drop(state);

        match self.mode {
            EventMode::AutoReset => self.cond.notify_one(),
            EventMode::ManualReset => self.cond.notify_all(),
        }
    }

    /// Release every thread currently blocked in [`wait`](Self::wait).
    ///
    /// Does not change the stored signalled state of an auto-reset event:
    /// released waiters return without consuming a signal, and a thread that
    /// arrives later blocks as usual.
    pub fn signal_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.generation = state.generation.wrapping_add(1);
        if self.mode == EventMode::ManualReset {
            state.signalled = true;
        }
        drop(state);
        self.cond.notify_all();
    }

    /// Block until the event is signalled.
    ///
    /// Returns immediately if the event is already signalled; an auto-reset
    /// event is consumed on the way out.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();

        if state.signalled {
            if self.mode == EventMode::AutoReset {
                state.signalled = false;
            }
            return;
        }

        let entry_generation = state.generation;
        loop {
            state = self.cond.wait(state).unwrap();

            if state.signalled {
                if self.mode == EventMode::AutoReset {
                    state.signalled = false;
                }
                return;
            }

            // Broadcast release without a stored signal.
            if state.generation != entry_generation {
                return;
            }
        }
    }

    /// Clear the signalled state.
    pub fn reset(&self) {
        self.state.lock().unwrap().signalled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_before_wait_is_remembered() {
        let event = OsEvent::new(false, EventMode::AutoReset);
        event.signal();
        event.wait(); // must not block
    }

    #[test]
    fn auto_reset_consumes_signal() {
        let event = Arc::new(OsEvent::new(false, EventMode::AutoReset));
        event.signal();
        event.wait();

        // Second wait blocks until a fresh signal arrives.
        let waiter = {
            let event = event.clone();
            thread::spawn(move || event.wait())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!waiter.is_finished());
        event.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn manual_reset_releases_until_reset() {
        let event = OsEvent::new(false, EventMode::ManualReset);
        event.signal();
        event.wait();
        event.wait(); // still signalled
        event.reset();
        assert!(!event.state.lock().unwrap().signalled);
    }

    #[test]
    fn signal_all_releases_every_waiter() {
        let event = Arc::new(OsEvent::new(false, EventMode::AutoReset));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let event = event.clone();
                thread::spawn(move || event.wait())
            })
            .collect();

        // Give the waiters a chance to block before broadcasting.
        thread::sleep(std::time::Duration::from_millis(20));
        event.signal_all();
        for waiter in waiters {
            waiter.join().unwrap();
        }

        // The broadcast must not have left a stored signal behind.
        assert!(!event.state.lock().unwrap().signalled);
    }
}
