//! Streaming validation and early stopping.
//!
//! The validation set is the trailing `validation_split_ratio` slice of the
//! feedback history, re-sampled after every event. A score is the positive
//! ratio over that slice. When the score fails to beat the best seen by
//! `improvement_epsilon` for `patience` consecutive computations, learning
//! stalls and the engine restores the best snapshot.
//!
//! Phases:
//! - WarmingUp: fewer than `min_feedback_samples` events so far, no learning
//! - Learning: normal operation
//! - Stalled: early stopping triggered, persona pinned to the best snapshot

use crate::config::Hyperparameters;
use crate::types::{FeedbackEvent, PersonaVector};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Learning state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningPhase {
    WarmingUp,
    Learning,
    Stalled,
}

impl std::fmt::Display for LearningPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LearningPhase::WarmingUp => write!(f, "warming_up"),
            LearningPhase::Learning => write!(f, "learning"),
            LearningPhase::Stalled => write!(f, "stalled"),
        }
    }
}

/// Bounded, arrival-ordered feedback history
#[derive(Debug, Clone)]
pub struct FeedbackHistory {
    events: VecDeque<FeedbackEvent>,
    capacity: usize,
}

impl FeedbackHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, evicting the oldest when full
    pub fn push(&mut self, event: FeedbackEvent) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &FeedbackEvent> + ExactSizeIterator {
        self.events.iter()
    }

    /// The last `n` events, oldest first
    pub fn recent(&self, n: usize) -> Vec<&FeedbackEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Fraction of positive events, `None` for an empty slice
pub fn positive_ratio<'a, I>(events: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a FeedbackEvent>,
{
    let (positive, total) = events.into_iter().fold((0usize, 0usize), |(p, t), e| {
        (p + usize::from(e.sign.is_positive()), t + 1)
    });
    if total == 0 {
        None
    } else {
        Some(positive as f64 / total as f64)
    }
}

/// Best-so-far tracking for early stopping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingState {
    pub best_validation_score: Option<f64>,
    pub best_snapshot: Option<PersonaVector>,
    pub no_improvement_counter: usize,
}

/// Outcome of one validation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationVerdict {
    /// History too short to validate
    Skipped,
    Improved { score: f64 },
    NoImprovement { score: f64, counter: usize },
    /// Patience exhausted on this pass
    Stalled { score: f64 },
}

impl ValidationVerdict {
    pub fn score(&self) -> Option<f64> {
        match self {
            ValidationVerdict::Skipped => None,
            ValidationVerdict::Improved { score }
            | ValidationVerdict::NoImprovement { score, .. }
            | ValidationVerdict::Stalled { score } => Some(*score),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationController {
    phase: LearningPhase,
    state: EarlyStoppingState,
}

impl Default for ValidationController {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationController {
    pub fn new() -> Self {
        Self {
            phase: LearningPhase::WarmingUp,
            state: EarlyStoppingState::default(),
        }
    }

    pub fn phase(&self) -> LearningPhase {
        self.phase
    }

    pub fn state(&self) -> &EarlyStoppingState {
        &self.state
    }

    pub fn best_snapshot(&self) -> Option<&PersonaVector> {
        self.state.best_snapshot.as_ref()
    }

    /// Advance out of warm-up once enough events preceded the current one
    pub fn admit(&mut self, prior_events: u64, hyper: &Hyperparameters) -> LearningPhase {
        if self.phase == LearningPhase::WarmingUp
            && prior_events >= hyper.min_feedback_samples as u64
        {
            info!("Warm-up complete after {} events, learning enabled", prior_events);
            self.phase = LearningPhase::Learning;
        }
        self.phase
    }

    /// Positive ratio over the trailing validation window
    pub fn validation_score(history: &FeedbackHistory, hyper: &Hyperparameters) -> Option<f64> {
        if history.len() < hyper.min_validation_samples.max(1) {
            return None;
        }
        let window = ((history.len() as f64) * hyper.validation_split_ratio).ceil() as usize;
        positive_ratio(history.recent(window.clamp(1, history.len())))
    }

    /// Score the trailing window and update early-stopping state.
    ///
    /// `current` is the persona that produced the feedback being scored; it
    /// becomes the best snapshot on improvement.
    pub fn observe(
        &mut self,
        history: &FeedbackHistory,
        current: &PersonaVector,
        hyper: &Hyperparameters,
    ) -> ValidationVerdict {
        let score = match Self::validation_score(history, hyper) {
            Some(score) => score,
            None => return ValidationVerdict::Skipped,
        };

        let improved = match self.state.best_validation_score {
            None => true,
            Some(best) => score > best + hyper.improvement_epsilon,
        };

        if improved {
            debug!(
                "Validation improved: {:.3} (previous best {:?})",
                score, self.state.best_validation_score
            );
            self.state.best_validation_score = Some(score);
            self.state.best_snapshot = Some(current.clone());
            self.state.no_improvement_counter = 0;
            return ValidationVerdict::Improved { score };
        }

        self.state.no_improvement_counter += 1;
        let counter = self.state.no_improvement_counter;

        if counter >= hyper.patience && self.phase == LearningPhase::Learning {
            info!(
                "Early stopping: no improvement for {} validations (best {:.3}, current {:.3})",
                counter,
                self.state.best_validation_score.unwrap_or_default(),
                score
            );
            self.phase = LearningPhase::Stalled;
            return ValidationVerdict::Stalled { score };
        }

        ValidationVerdict::NoImprovement { score, counter }
    }

    /// Leave the stalled phase after an external reset (rate change, rollback).
    ///
    /// Returns whether the phase changed. The patience counter only restarts
    /// on an actual stall exit.
    pub fn resume(&mut self) -> bool {
        if self.phase != LearningPhase::Stalled {
            return false;
        }
        info!("Resuming learning after remediation");
        self.phase = LearningPhase::Learning;
        self.state.no_improvement_counter = 0;
        true
    }

    /// Overwrite the best snapshot, e.g. from a restored checkpoint
    pub fn restore_best(&mut self, snapshot: PersonaVector, score: Option<f64>) {
        self.state.best_snapshot = Some(snapshot);
        self.state.best_validation_score = score;
    }

    pub fn reset(&mut self) {
        self.phase = LearningPhase::WarmingUp;
        self.state = EarlyStoppingState::default();
    }
}
