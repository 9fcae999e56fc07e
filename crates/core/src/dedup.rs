use std::collections::VecDeque;

use tracing::trace;

use crate::frame::{FrameBuffer, FrameError};

pub const HISTORY_CAPACITY: usize = 16;

/// Rolling history of recently accepted frames used to spot near-identical input.
///
/// Independent of the blend window: the history only holds frames this filter
/// accepted, most recent first.
pub struct DuplicateFilter {
    history: VecDeque<FrameBuffer>,
    capacity: usize,
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `true` when `frame` should be discarded.
    ///
    /// The luma plane is compared against up to `range` accepted frames, most
    /// recent first. A frame whose normalized mean absolute luma difference is
    /// below `threshold` for any of them is a duplicate; so is a bit-identical
    /// one. Accepted frames enter the history, evicting the oldest entry.
    pub fn should_drop(
        &mut self,
        frame: &FrameBuffer,
        range: usize,
        threshold: f32,
    ) -> Result<bool, FrameError> {
        let threshold = f64::from(threshold);
        for (age, previous) in self.history.iter().take(range).enumerate() {
            let Some(difference) = luma_difference(frame, previous) else {
                continue;
            };
            if difference == 0.0 || difference < threshold {
                trace!(pts = frame.pts(), age, difference, "Duplicate frame dropped");
                return Ok(true);
            }
        }

        self.remember(frame)?;
        Ok(false)
    }

    fn remember(&mut self, frame: &FrameBuffer) -> Result<(), FrameError> {
        let mut slot = if self.history.len() == self.capacity {
            self.history.pop_back().unwrap_or_default()
        } else {
            FrameBuffer::default()
        };
        slot.copy_from(frame)?;
        self.history.push_front(slot);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Mean absolute luma difference normalized to `[0, 1]`, or `None` when the
/// frames cannot be compared.
pub fn luma_difference(a: &FrameBuffer, b: &FrameBuffer) -> Option<f64> {
    if !a.is_allocated() || !a.same_shape(b) {
        return None;
    }

    let total: u64 = a
        .luma()
        .rows()
        .zip(b.luma().rows())
        .map(|(left, right)| {
            left.iter()
                .zip(right)
                .map(|(l, r)| u64::from(l.abs_diff(*r)))
                .sum::<u64>()
        })
        .sum();
    let pixels = u64::from(a.width()) * u64::from(a.height());
    Some(total as f64 / pixels as f64 / 255.0)
}
