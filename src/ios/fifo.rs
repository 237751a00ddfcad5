//! Fixed-capacity request FIFO.
//!
//! An index ring used by each IPC driver twice over: as the free list of
//! request slots and as the outbound submission queue. Capacity is fixed at
//! construction; the depth of the channel is capped by the number of
//! outstanding requests, so a bounded array ring is all that is needed.
//!
//! The empty/full convention is subtle and deliberately preserved:
//! `push_index == pop_index` alone means *full*, because an empty ring is
//! marked by the `pop_index == -1` sentinel instead. Draining the last
//! element restores the sentinel.
//!
//! The ring is not self-locking. Each driver instance is accessed by one
//! host thread at a time (cores are partitioned); the driver's own lock
//! provides that serialization.

use crate::ios::error::IosError;

/// Bounded FIFO of request slot indices.
#[derive(Debug)]
pub struct RequestFifo {
    slots: Vec<usize>,
    push_index: usize,
    /// Index of the next slot to pop; `-1` when the ring is empty.
    pop_index: isize,
    count: usize,
    /// High-water mark of `count`, for diagnostics.
    max_count: usize,
}

impl RequestFifo {
    /// Create an empty ring with room for `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        RequestFifo {
            slots: vec![0; capacity],
            push_index: 0,
            pop_index: -1,
            count: 0,
            max_count: 0,
        }
    }

    /// Reset to the empty state, keeping the capacity.
    pub fn clear(&mut self) {
        self.push_index = 0;
        self.pop_index = -1;
        self.count = 0;
        self.max_count = 0;
        self.slots.fill(0);
    }

    /// Push a request index.
    ///
    /// Fails with `QFull` when the ring is full; a failed push does not
    /// mutate any state.
    pub fn push(&mut self, request: usize) -> Result<(), IosError> {
        if self.push_index as isize == self.pop_index {
            return Err(IosError::QFull);
        }

        self.slots[self.push_index] = request;

        if self.pop_index == -1 {
            self.pop_index = self.push_index as isize;
        }

        self.count += 1;
        self.push_index = (self.push_index + 1) % self.slots.len();

        if self.count > self.max_count {
            self.max_count = self.count;
        }

        Ok(())
    }

    /// Pop the oldest request index.
    ///
    /// Fails with `QEmpty` when the ring is empty; a failed pop does not
    /// mutate any state.
    pub fn pop(&mut self) -> Result<usize, IosError> {
        if self.pop_index == -1 {
            return Err(IosError::QEmpty);
        }

        let request = self.slots[self.pop_index as usize];
        self.count -= 1;

        if self.count == 0 {
            self.pop_index = -1;
        } else {
            self.pop_index = (self.pop_index + 1) % self.slots.len() as isize;
        }

        Ok(request)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }
}
