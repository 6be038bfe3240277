use std::collections::VecDeque;

use tokio::time::Instant;

use super::config::{OverflowPolicy, QueueConfig};
use super::types::request::Payload;

/// A message waiting for the connection to open.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub payload: Payload,
    pub enqueued_at: Instant,
}

/// Bounded FIFO of outbound messages sent while not connected.
#[derive(Debug)]
pub struct MessageQueue {
    items: VecDeque<QueuedMessage>,
    capacity: usize,
    overflow: OverflowPolicy,
}

impl MessageQueue {
    #[must_use]
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            items: VecDeque::with_capacity(config.capacity),
            capacity: config.capacity,
            overflow: config.overflow,
        }
    }

    /// Append a message, applying the overflow policy when full.
    ///
    /// Returns the message that was dropped to respect the capacity, if any.
    pub fn enqueue(&mut self, payload: Payload, now: Instant) -> Option<QueuedMessage> {
        let message = QueuedMessage {
            payload,
            enqueued_at: now,
        };

        if self.items.len() < self.capacity {
            self.items.push_back(message);
            return None;
        }

        match self.overflow {
            OverflowPolicy::DropOldest => {
                let evicted = self.items.pop_front();
                self.items.push_back(message);
                evicted
            }
            OverflowPolicy::DropNewest => Some(message),
        }
    }

    /// Remove every queued message, oldest first, for replay.
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        self.items.drain(..).collect()
    }

    /// Drop all pending messages, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.items.iter()
    }
}
