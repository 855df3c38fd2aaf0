//! Fixed-capacity FIFO for messages that arrive ahead of their epoch.

use std::collections::VecDeque;

/// Ring buffer keeping the `capacity` most recent items.
///
/// Pushing onto a full buffer evicts the oldest item.
#[derive(Debug, Clone)]
pub struct MessageBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> MessageBuffer<T> {
    /// Create an empty buffer. A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an item, evicting the front item if the buffer is full.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// The oldest item.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Remove and return the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer holds nothing.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
