//! Experience buffer for rehearsal-style replay.
//!
//! Older feedback is kept in a fixed-capacity FIFO and periodically
//! re-applied at a reduced learning rate, so recent feedback does not wipe
//! out preferences learned earlier.

use crate::types::FeedbackSign;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One remembered feedback signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experience {
    pub response_id: String,
    pub sign: FeedbackSign,
}

/// Fixed-capacity FIFO; inserting into a full buffer evicts the oldest entry
#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    entries: VecDeque<Experience>,
    capacity: usize,
}

impl ExperienceBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record an experience, returning the evicted entry if the buffer was full
    pub fn push(&mut self, response_id: impl Into<String>, sign: FeedbackSign) -> Option<Experience> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(Experience {
            response_id: response_id.into(),
            sign,
        });
        evicted
    }

    /// Draw up to `amount` distinct entries uniformly, without replacement
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, amount: usize) -> Vec<Experience> {
        let amount = amount.min(self.entries.len());
        if amount == 0 {
            return Vec::new();
        }
        rand::seq::index::sample(rng, self.entries.len(), amount)
            .into_iter()
            .map(|i| self.entries[i].clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
