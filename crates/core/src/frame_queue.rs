use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::frame::{FrameBuffer, FrameError};

pub const DEFAULT_QUEUE_CAPACITY: usize = 200;
pub const DEFAULT_WAIT_SLICE: Duration = Duration::from_secs(1);

struct QueueState {
    slots: Vec<FrameBuffer>,
    count: usize,
    read_pos: usize,
    write_pos: usize,
    finished: bool,
}

/// Fixed-capacity single-producer/single-consumer ring of frame slots.
///
/// Slots are allocated lazily and reused for the lifetime of the queue.
/// Blocking calls wake up at least once per wait slice to re-check the
/// cancellation token, and [`interrupt`](Self::interrupt) wakes them at once.
pub struct BoundedFrameQueue {
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    cancel: CancellationToken,
    capacity: usize,
    wait_slice: Duration,
}

impl BoundedFrameQueue {
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        Self::with_wait_slice(capacity, cancel, DEFAULT_WAIT_SLICE)
    }

    pub fn with_wait_slice(capacity: usize, cancel: CancellationToken, wait_slice: Duration) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| FrameBuffer::default()).collect();
        Self {
            state: Mutex::new(QueueState {
                slots,
                count: 0,
                read_pos: 0,
                write_pos: 0,
                finished: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            cancel,
            capacity,
            wait_slice,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copies `frame` into the next free slot, blocking while the queue is full.
    ///
    /// Returns `Ok(false)` without touching the queue when cancellation (or a
    /// finished queue) is observed while waiting for room.
    pub fn push(&self, frame: &FrameBuffer) -> Result<bool, FrameError> {
        let mut state = self.lock();
        while state.count == self.capacity {
            if self.cancel.is_cancelled() || state.finished {
                return Ok(false);
            }
            state = self
                .not_full
                .wait_timeout(state, self.wait_slice)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        if self.cancel.is_cancelled() {
            return Ok(false);
        }

        let pos = state.write_pos;
        state.slots[pos].copy_from(frame)?;
        state.write_pos = (pos + 1) % self.capacity;
        state.count += 1;
        drop(state);

        self.not_empty.notify_one();
        Ok(true)
    }

    /// Moves the oldest frame into `out`, blocking while the queue is empty.
    ///
    /// No pixel data is copied: the slot and `out` swap storage, so the
    /// caller's previous buffer goes back into the ring for reuse. Returns
    /// `false` once the queue is empty and finished, or on cancellation.
    pub fn pop(&self, out: &mut FrameBuffer) -> bool {
        let mut state = self.lock();
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if state.count > 0 {
                break;
            }
            if state.finished {
                return false;
            }
            state = self
                .not_empty
                .wait_timeout(state, self.wait_slice)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }

        let pos = state.read_pos;
        std::mem::swap(&mut state.slots[pos], out);
        state.read_pos = (pos + 1) % self.capacity;
        state.count -= 1;
        drop(state);

        self.not_full.notify_one();
        true
    }

    pub fn signal_finished(&self) {
        self.lock().finished = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Wakes every blocked caller so it re-checks cancellation now.
    pub fn interrupt(&self) {
        drop(self.lock());
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
