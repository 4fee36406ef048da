//! Persona checkpoints for rollback.
//!
//! Every `checkpoint_interval` feedback events the engine writes the live
//! persona and best validation score through a [`CheckpointStore`]. Stores
//! are pluggable; ordering is by write time, since the feedback count
//! restarts after a reset and in every new session.

use crate::error::Result;
use crate::types::PersonaVector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Durable snapshot of engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub persona: PersonaVector,
    pub feedback_count: u64,
    pub validation_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(persona: PersonaVector, feedback_count: u64, validation_score: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            persona,
            feedback_count,
            validation_score,
            timestamp: Utc::now(),
        }
    }

    /// Ordering used for "latest" lookup
    pub fn recency_cmp(&self, other: &Checkpoint) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.feedback_count.cmp(&other.feedback_count))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sort checkpoints oldest first
pub fn sort_by_recency(checkpoints: &mut [Checkpoint]) {
    checkpoints.sort_by(Checkpoint::recency_cmp);
}

/// Storage for checkpoints, addressable by recency
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Most recent checkpoint, if any
    async fn latest(&self) -> Result<Option<Checkpoint>>;

    /// All checkpoints, oldest first
    async fn list(&self) -> Result<Vec<Checkpoint>>;

    /// Keep only the `keep` most recent checkpoints; returns how many were removed
    async fn prune(&self, keep: usize) -> Result<usize>;
}

/// Tracks when the next checkpoint is due
#[derive(Debug, Clone, Default)]
pub struct CheckpointSchedule {
    last_feedback_count: Option<u64>,
    written: u64,
}

impl CheckpointSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_due(&self, feedback_count: u64, interval: u64) -> bool {
        interval > 0
            && feedback_count > 0
            && feedback_count % interval == 0
            && self.last_feedback_count != Some(feedback_count)
    }

    pub fn mark_written(&mut self, feedback_count: u64) {
        self.last_feedback_count = Some(feedback_count);
        self.written += 1;
    }

    pub fn last_feedback_count(&self) -> Option<u64> {
        self.last_feedback_count
    }

    /// Checkpoints written during this engine's lifetime
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn reset(&mut self) {
        self.last_feedback_count = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_schedule_fires_on_interval() {
        let mut schedule = CheckpointSchedule::new();
        assert!(!schedule.is_due(0, 10));
        assert!(!schedule.is_due(9, 10));
        assert!(schedule.is_due(10, 10));

        schedule.mark_written(10);
        assert!(!schedule.is_due(10, 10));
        assert!(schedule.is_due(20, 10));
        assert_eq!(schedule.written(), 1);
    }

    #[test]
    fn test_recency_ordering() {
        let older = Checkpoint::new(PersonaVector::neutral(), 10, Some(0.4));
        let mut newer = Checkpoint::new(PersonaVector::neutral(), 10, Some(0.5));
        newer.timestamp = older.timestamp + Duration::seconds(1);
        let mut same_time = Checkpoint::new(PersonaVector::neutral(), 20, None);
        same_time.timestamp = newer.timestamp;

        let mut all = vec![same_time.clone(), newer.clone(), older.clone()];
        sort_by_recency(&mut all);
        assert_eq!(all[0].id, older.id);
        assert_eq!(all[1].id, newer.id);
        assert_eq!(all[2].id, same_time.id);
    }

    #[test]
    fn test_recency_prefers_write_time_over_count() {
        // A count from before a reset is larger but older
        let mut before_reset = Checkpoint::new(PersonaVector::neutral(), 20, Some(0.9));
        let after_reset = Checkpoint::new(PersonaVector::neutral(), 10, Some(0.3));
        before_reset.timestamp = after_reset.timestamp - Duration::minutes(5);

        let mut all = vec![after_reset.clone(), before_reset.clone()];
        sort_by_recency(&mut all);
        assert_eq!(all[0].id, before_reset.id);
        assert_eq!(all[1].id, after_reset.id);
    }

    #[test]
    fn test_checkpoint_serializes() {
        let checkpoint = Checkpoint::new(PersonaVector::neutral(), 30, Some(0.75));
        let json = serde_json::to_string(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, checkpoint);
    }
}
