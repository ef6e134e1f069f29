//! Rolling Buffer Implementation

use crate::BufferError;
use std::collections::VecDeque;

/// Fixed-capacity FIFO buffer (overwrites oldest when full)
///
/// The buffer has a single owner. Other threads never hold a reference to the live
/// buffer; they receive an independent copy through [`RollingBuffer::snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct RollingBuffer<T> {
    /// Frames in capture order, oldest at the front
    data: VecDeque<T>,
    /// Maximum number of frames held
    capacity: usize,
    /// Total frames pushed (for statistics)
    total_pushed: u64,
}

impl<T> RollingBuffer<T> {
    /// Create a new rolling buffer with given capacity
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }
        Ok(Self::with_capacity_unchecked(capacity))
    }

    fn with_capacity_unchecked(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
            total_pushed: 0,
        }
    }

    /// Push a frame into the buffer (evicts the oldest if full)
    ///
    /// Returns the evicted frame, if any.
    pub fn push(&mut self, frame: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(frame);
        }

        let evicted = if self.data.len() >= self.capacity {
            self.data.pop_front()
        } else {
            None
        };

        self.data.push_back(frame);
        self.total_pushed += 1;
        evicted
    }

    /// Number of frames currently held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.data.len() as f64 / self.capacity as f64
    }

    /// Total frames pushed since creation, including evicted ones
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// Empty the buffer in place
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Iterate frames from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    /// Oldest frame
    pub fn front(&self) -> Option<&T> {
        self.data.front()
    }

    /// Most recent frame
    pub fn back(&self) -> Option<&T> {
        self.data.back()
    }

    /// Consume the buffer, returning frames oldest first
    pub fn into_vec(self) -> Vec<T> {
        self.data.into()
    }
}

impl<T: Clone> RollingBuffer<T> {
    /// Independent copy of the frames present right now
    pub fn snapshot(&self) -> RollingBuffer<T> {
        Self {
            data: self.data.clone(),
            capacity: self.capacity,
            total_pushed: self.total_pushed,
        }
    }
}

impl<'a, T> IntoIterator for &'a RollingBuffer<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

/// Join two buffers into a new one sized exactly to hold both
///
/// The result holds `before`'s frames followed by `after`'s, and its capacity is
/// `before.len() + after.len()`.
pub fn concat<T>(before: RollingBuffer<T>, after: RollingBuffer<T>) -> RollingBuffer<T> {
    let capacity = before.len() + after.len();
    let mut joined = RollingBuffer::with_capacity_unchecked(capacity);
    joined.data.extend(before.data);
    joined.data.extend(after.data);
    joined.total_pushed = capacity as u64;
    joined
}
