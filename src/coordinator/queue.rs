//! Bounded assignment queue
//!
//! Holds assignments produced by the scheduler until a worker polls for them.
//! Both ends are non-blocking: a full queue rejects the insert and an empty
//! queue yields nothing, so producers and consumers never wait on each other.

use std::collections::VecDeque;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::Assignment;

/// Default number of pending assignments
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Queue errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue at capacity; the assignment was not accepted
    #[error("Assignment queue full ({capacity} pending), rejected delivery {delivery_id}")]
    Full { delivery_id: i64, capacity: usize },
}

/// FIFO of pending assignments with a fixed upper bound
#[derive(Debug)]
pub struct AssignmentQueue {
    items: Mutex<VecDeque<Assignment>>,
    capacity: usize,
}

impl AssignmentQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Insert without waiting; returns the queue depth after the insert
    pub async fn try_enqueue(&self, assignment: Assignment) -> Result<usize, QueueError> {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            return Err(QueueError::Full {
                delivery_id: assignment.delivery_id,
                capacity: self.capacity,
            });
        }
        items.push_back(assignment);
        Ok(items.len())
    }

    /// Remove the oldest assignment without waiting
    pub async fn try_dequeue(&self) -> Option<Assignment> {
        self.items.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for AssignmentQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
