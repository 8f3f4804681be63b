use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::protocol::Message;

/// A message held back until the session is idle again.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: Message,
    pub received_at: DateTime<Utc>,
}

/// FIFO of deferred messages. No reordering, no deduplication.
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<QueuedMessage>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.items.push_back(QueuedMessage {
            message,
            received_at: Utc::now(),
        });
    }

    pub fn pop(&mut self) -> Option<QueuedMessage> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
