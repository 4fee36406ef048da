//! Persona learning engine
//!
//! Owns the live persona and all learning state, and drives one feedback
//! event through the pipeline:
//!
//! 1. Look up the response text (missing responses fail before any mutation)
//! 2. Record the event in history, counters and the experience buffer
//! 3. Gate on the learning phase (warm-up, stalled)
//! 4. Validate; a stall restores the best snapshot and skips the update
//! 5. Extract features, compute stabilized deltas, govern against the epoch budget
//! 6. Apply, replay older experiences from the same budget, write through
//! 7. On the checkpoint cadence: checkpoint, diagnose, auto-remediate
//!
//! Persistence failures are logged and never interrupt learning; the
//! in-memory state stays authoritative.

use crate::config::{
    Hyperparameters, LearnerConfig, DEFAULT_GRADIENT_CLIP_MAX, MAX_L2_LAMBDA, MAX_MOMENTUM_BETA,
};
use crate::error::{LearnerError, Result};
use crate::learning::adjustment::{AdjustmentCalculator, MomentumState};
use crate::learning::checkpoint::{Checkpoint, CheckpointSchedule, CheckpointStore};
use crate::learning::diagnostics::{self, OverfittingReport, Remediation};
use crate::learning::features::{extract_features, FeatureVector};
use crate::learning::governor::{EpochBudget, StabilityGovernor};
use crate::learning::replay::ExperienceBuffer;
use crate::learning::stats::{daily_trend, FeedbackCounts, LearningStats, TrendPoint};
use crate::learning::validation::{
    EarlyStoppingState, FeedbackHistory, LearningPhase, ValidationController, ValidationVerdict,
};
use crate::storage::{LearningLog, LearningRecord, PersonaStore, ResponseLookup};
use crate::types::{total_applied_shift, AdjustmentRecord, FeedbackEvent, FeedbackSign, PersonaVector};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-event shifts kept for volatility diagnostics
const RECENT_SHIFT_WINDOW: usize = 100;

/// Engine handle for hosts that process feedback from several tasks
pub type SharedEngine = Arc<Mutex<PersonaLearningEngine>>;

/// What happened to one feedback event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedbackOutcome {
    /// Not enough prior events; recorded without learning
    WarmingUp { events_seen: u64, required: usize },
    /// Adjustments were computed and applied
    Applied { validation_score: Option<f64> },
    /// This event exhausted patience; the best snapshot was restored
    EarlyStopped { best_validation_score: Option<f64> },
    /// Learning was already suspended
    Stalled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub updated_persona: PersonaVector,
    pub adjustments: Vec<AdjustmentRecord>,
    pub outcome: FeedbackOutcome,
    /// Adjustments applied by experience replay in the same epoch
    pub replayed: Vec<AdjustmentRecord>,
    /// Present when diagnostics ran on this event
    pub diagnostics: Option<OverfittingReport>,
}

impl FeedbackResult {
    /// Drift spent by this event, replay included
    pub fn total_shift(&self) -> f64 {
        total_applied_shift(&self.adjustments) + total_applied_shift(&self.replayed)
    }

    /// Diagnostics asked for a rollback, which is left to the caller
    pub fn rollback_recommended(&self) -> bool {
        self.diagnostics.as_ref().map_or(false, |report| {
            report
                .recommendations
                .contains(&Remediation::RollbackToCheckpoint)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    Restored {
        checkpoint_id: String,
        feedback_count: u64,
    },
    /// No checkpoint exists; nothing changed
    Unavailable,
}

/// A remediation that was carried out, with a human-readable summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRemediation {
    pub remediation: Remediation,
    pub summary: String,
}

pub struct PersonaLearningEngine {
    hyper: Hyperparameters,
    auto_remediate: bool,
    persona: PersonaVector,
    momentum: MomentumState,
    history: FeedbackHistory,
    buffer: ExperienceBuffer,
    validation: ValidationController,
    schedule: CheckpointSchedule,
    counts: FeedbackCounts,
    recent_shifts: VecDeque<f64>,
    calculator: AdjustmentCalculator,
    governor: StabilityGovernor,
    rng: StdRng,
    persona_store: Arc<dyn PersonaStore>,
    responses: Arc<dyn ResponseLookup>,
    checkpoints: Arc<dyn CheckpointStore>,
    learning_log: Option<Arc<dyn LearningLog>>,
}

impl PersonaLearningEngine {
    /// Build an engine, loading the starting persona from `persona_store`
    pub async fn new(
        hyper: Hyperparameters,
        persona_store: Arc<dyn PersonaStore>,
        responses: Arc<dyn ResponseLookup>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        hyper.validate()?;
        let persona = persona_store.get_persona().await?;

        info!(
            "Persona learning engine ready (lr={}, beta={}, l2={}, patience={})",
            hyper.learning_rate, hyper.momentum_beta, hyper.l2_lambda, hyper.patience
        );

        Ok(Self {
            history: FeedbackHistory::new(hyper.max_history),
            buffer: ExperienceBuffer::new(hyper.buffer_size),
            hyper,
            auto_remediate: true,
            persona,
            momentum: MomentumState::new(),
            validation: ValidationController::new(),
            schedule: CheckpointSchedule::new(),
            counts: FeedbackCounts::default(),
            recent_shifts: VecDeque::with_capacity(RECENT_SHIFT_WINDOW),
            calculator: AdjustmentCalculator,
            governor: StabilityGovernor,
            rng: StdRng::from_entropy(),
            persona_store,
            responses,
            checkpoints,
            learning_log: None,
        })
    }

    /// Build an engine from loaded configuration
    pub async fn from_config(
        config: &LearnerConfig,
        persona_store: Arc<dyn PersonaStore>,
        responses: Arc<dyn ResponseLookup>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        let engine = Self::new(
            config.hyperparameters.clone(),
            persona_store,
            responses,
            checkpoints,
        )
        .await?;
        Ok(engine.with_auto_remediate(config.auto_remediate))
    }

    pub fn with_learning_log(mut self, log: Arc<dyn LearningLog>) -> Self {
        self.learning_log = Some(log);
        self
    }

    /// Deterministic replay sampling
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_auto_remediate(mut self, enabled: bool) -> Self {
        self.auto_remediate = enabled;
        self
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    pub fn persona(&self) -> &PersonaVector {
        &self.persona
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    pub fn phase(&self) -> LearningPhase {
        self.validation.phase()
    }

    pub fn early_stopping(&self) -> &EarlyStoppingState {
        self.validation.state()
    }

    pub fn momentum(&self) -> &MomentumState {
        &self.momentum
    }

    pub fn feedback_count(&self) -> u64 {
        self.counts.total
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Learn from one feedback event
    pub async fn process_feedback(
        &mut self,
        response_id: &str,
        sign: FeedbackSign,
    ) -> Result<FeedbackResult> {
        let text = self
            .responses
            .find_response(response_id)
            .await?
            .ok_or_else(|| LearnerError::ResponseNotFound(response_id.to_string()))?;

        let prior_events = self.counts.total;
        self.history.push(FeedbackEvent::new(response_id, sign));
        self.buffer.push(response_id, sign);
        self.counts.record(sign.is_positive());

        let (outcome, adjustments, replayed) =
            match self.validation.admit(prior_events, &self.hyper) {
                LearningPhase::WarmingUp => {
                    debug!(
                        "Warming up: {} of {} events before learning",
                        self.counts.total, self.hyper.min_feedback_samples
                    );
                    let outcome = FeedbackOutcome::WarmingUp {
                        events_seen: self.counts.total,
                        required: self.hyper.min_feedback_samples,
                    };
                    (outcome, Vec::new(), Vec::new())
                }
                LearningPhase::Stalled => {
                    debug!("Learning stalled, persona pinned to best snapshot");
                    (FeedbackOutcome::Stalled, Vec::new(), Vec::new())
                }
                LearningPhase::Learning => self.learn(response_id, sign, &text).await,
            };

        let diagnostics = self.on_cadence().await;

        Ok(FeedbackResult {
            updated_persona: self.persona.clone(),
            adjustments,
            outcome,
            replayed,
            diagnostics,
        })
    }

    async fn learn(
        &mut self,
        response_id: &str,
        sign: FeedbackSign,
        text: &str,
    ) -> (FeedbackOutcome, Vec<AdjustmentRecord>, Vec<AdjustmentRecord>) {
        let persona_before = self.persona.clone();

        let verdict = self
            .validation
            .observe(&self.history, &persona_before, &self.hyper);
        if let ValidationVerdict::Stalled { .. } = verdict {
            self.restore_best_snapshot().await;
            let outcome = FeedbackOutcome::EarlyStopped {
                best_validation_score: self.validation.state().best_validation_score,
            };
            return (outcome, Vec::new(), Vec::new());
        }

        let features = extract_features(text);
        let mut budget = EpochBudget::new(self.hyper.max_change_per_epoch);

        let adjustments = self.step(&features, sign, 1.0, &mut budget);
        self.persona.apply(&adjustments);

        let replayed = self.replay(&mut budget).await;

        self.record_shift(total_applied_shift(&adjustments) + total_applied_shift(&replayed));
        if !adjustments.is_empty() || !replayed.is_empty() {
            self.persist_persona().await;
        }
        self.log_step(response_id, sign, persona_before, &adjustments)
            .await;

        debug!(
            "Applied {} adjustments ({} replayed), epoch spent {:.3}/{:.3}",
            adjustments.len(),
            replayed.len(),
            budget.spent(),
            budget.limit()
        );

        let outcome = FeedbackOutcome::Applied {
            validation_score: verdict.score(),
        };
        (outcome, adjustments, replayed)
    }

    /// Compute and govern one signal against the live persona
    fn step(
        &mut self,
        features: &FeatureVector,
        sign: FeedbackSign,
        lr_scale: f64,
        budget: &mut EpochBudget,
    ) -> Vec<AdjustmentRecord> {
        let proposed = self.calculator.compute_adjustments(
            &self.persona,
            features,
            sign,
            &mut self.momentum,
            &self.hyper,
            lr_scale,
        );
        self.governor
            .govern(proposed, &self.persona, budget, self.hyper.dead_zone)
    }

    /// Re-apply sampled experiences at reduced strength, drawing from `budget`
    async fn replay(&mut self, budget: &mut EpochBudget) -> Vec<AdjustmentRecord> {
        let samples = self
            .buffer
            .sample(&mut self.rng, self.hyper.replay_samples_per_update);
        let lr_scale = self.hyper.replay_lr_scale;
        let mut replayed = Vec::new();

        for experience in samples {
            if budget.is_exhausted() {
                debug!("Epoch budget exhausted, ending replay");
                break;
            }

            let text = match self.responses.find_response(&experience.response_id).await {
                Ok(Some(text)) => text,
                Ok(None) => {
                    warn!(
                        "Skipping replay of {}: response no longer available",
                        experience.response_id
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Skipping replay of {}: {}", experience.response_id, e);
                    continue;
                }
            };

            let features = extract_features(&text);
            let adjustments = self.step(&features, experience.sign, lr_scale, budget);
            self.persona.apply(&adjustments);
            replayed.extend(adjustments);
        }

        replayed
    }

    /// Replay outside of feedback processing, with a fresh epoch budget.
    ///
    /// Does nothing unless the engine is learning.
    pub async fn perform_replay(&mut self) -> Vec<AdjustmentRecord> {
        if self.phase() != LearningPhase::Learning {
            debug!("Replay skipped in phase {}", self.phase());
            return Vec::new();
        }

        let mut budget = EpochBudget::new(self.hyper.max_change_per_epoch);
        let replayed = self.replay(&mut budget).await;
        if !replayed.is_empty() {
            self.record_shift(total_applied_shift(&replayed));
            self.persist_persona().await;
        }
        replayed
    }

    async fn restore_best_snapshot(&mut self) {
        let Some(best) = self.validation.best_snapshot().cloned() else {
            return;
        };
        info!(
            "Early stopping: restoring best snapshot (score {:?}), drift reverted {:.2}",
            self.validation.state().best_validation_score,
            self.persona.total_shift(&best)
        );
        self.persona = best;
        self.persist_persona().await;
    }

    fn record_shift(&mut self, shift: f64) {
        if self.recent_shifts.len() >= RECENT_SHIFT_WINDOW {
            self.recent_shifts.pop_front();
        }
        self.recent_shifts.push_back(shift);
    }

    /// Checkpoint and diagnose every `checkpoint_interval` events
    async fn on_cadence(&mut self) -> Option<OverfittingReport> {
        let interval = self.hyper.checkpoint_interval;
        if interval == 0 || self.counts.total % interval != 0 {
            return None;
        }

        self.maybe_checkpoint().await;

        if self.phase() == LearningPhase::WarmingUp {
            return None;
        }

        let report = self.detect_overfitting();
        if report.is_overfitting {
            warn!("Overfitting indicators: {}", report.indicators.join("; "));

            if self.auto_remediate {
                // Rollback would move the persona outside this event's epoch budget
                let actions: Vec<Remediation> = report
                    .recommendations
                    .iter()
                    .copied()
                    .filter(|r| r.is_hyperparameter_only())
                    .collect();
                if let Err(e) = self.apply_remediation(&actions).await {
                    warn!("Automatic remediation failed: {}", e);
                }
            }
        }
        Some(report)
    }

    /// Write a checkpoint if one is due at the current feedback count.
    ///
    /// Returns whether a checkpoint was written. Store failures are logged.
    pub async fn maybe_checkpoint(&mut self) -> bool {
        let count = self.counts.total;
        if !self
            .schedule
            .is_due(count, self.hyper.checkpoint_interval)
        {
            return false;
        }

        let checkpoint = Checkpoint::new(
            self.persona.clone(),
            count,
            self.validation.state().best_validation_score,
        );
        match self.checkpoints.put(&checkpoint).await {
            Ok(()) => {
                self.schedule.mark_written(count);
                info!("Checkpoint {} written at {} events", checkpoint.id, count);
                true
            }
            Err(e) => {
                warn!("Failed to write checkpoint at {} events: {}", count, e);
                false
            }
        }
    }

    /// Restore the persona and best snapshot from the latest checkpoint
    pub async fn rollback_to_latest_checkpoint(&mut self) -> Result<RollbackOutcome> {
        let Some(checkpoint) = self.checkpoints.latest().await? else {
            warn!("Rollback requested but no checkpoint is available");
            return Ok(RollbackOutcome::Unavailable);
        };

        info!(
            "Rolling back to checkpoint {} ({} events, score {:?})",
            checkpoint.id, checkpoint.feedback_count, checkpoint.validation_score
        );

        self.persona = checkpoint.persona.clone();
        self.validation
            .restore_best(checkpoint.persona, checkpoint.validation_score);
        self.validation.resume();
        self.persist_persona().await;

        Ok(RollbackOutcome::Restored {
            checkpoint_id: checkpoint.id,
            feedback_count: checkpoint.feedback_count,
        })
    }

    /// Run diagnostics over current history and recent shifts
    pub fn detect_overfitting(&self) -> OverfittingReport {
        let shifts: Vec<f64> = self.recent_shifts.iter().copied().collect();
        diagnostics::detect(&self.history, &shifts, &self.hyper)
    }

    /// Apply remediations in order. Each one resumes learning if stalled.
    pub async fn apply_remediation(
        &mut self,
        remediations: &[Remediation],
    ) -> Result<Vec<AppliedRemediation>> {
        let mut applied = Vec::with_capacity(remediations.len());

        for remediation in remediations {
            let summary = match *remediation {
                Remediation::ReduceLearningRate { factor } => {
                    let before = self.hyper.learning_rate;
                    let after = self.hyper.set_learning_rate(before * factor);
                    format!("learning_rate {:.4} -> {:.4}", before, after)
                }
                Remediation::IncreaseMomentum { beta } => {
                    let before = self.hyper.momentum_beta;
                    let after = before.max(beta).min(MAX_MOMENTUM_BETA);
                    self.hyper.set_momentum_beta(after)?;
                    format!("momentum_beta {:.3} -> {:.3}", before, after)
                }
                Remediation::IncreaseRegularization { factor } => {
                    let before = self.hyper.l2_lambda;
                    let base = if before > 0.0 {
                        before
                    } else {
                        Hyperparameters::default().l2_lambda
                    };
                    let after = (base * factor).min(MAX_L2_LAMBDA);
                    self.hyper.set_l2_lambda(after)?;
                    format!("l2_lambda {:.4} -> {:.4}", before, after)
                }
                Remediation::TightenClipping { max } => {
                    let before = self.hyper.gradient_clip_max;
                    let target = if max.is_finite() && max > 0.0 {
                        max
                    } else {
                        DEFAULT_GRADIENT_CLIP_MAX
                    };
                    let after = if self.hyper.clipping_enabled() {
                        before.min(target)
                    } else {
                        target
                    };
                    self.hyper.set_gradient_clip_max(after)?;
                    format!("gradient_clip_max {:.2} -> {:.2}", before, after)
                }
                Remediation::RollbackToCheckpoint => {
                    match self.rollback_to_latest_checkpoint().await? {
                        RollbackOutcome::Restored { feedback_count, .. } => {
                            format!("restored checkpoint from {} events", feedback_count)
                        }
                        RollbackOutcome::Unavailable => "no checkpoint available".to_string(),
                    }
                }
            };

            info!("Remediation applied: {} ({})", remediation, summary);
            self.validation.resume();
            applied.push(AppliedRemediation {
                remediation: *remediation,
                summary,
            });
        }

        Ok(applied)
    }

    /// Set the learning rate, clamped to the configured range; resumes a stalled engine
    pub fn set_learning_rate(&mut self, rate: f64) -> f64 {
        let before = self.hyper.learning_rate;
        let applied = self.hyper.set_learning_rate(rate);
        info!("Learning rate {} -> {}", before, applied);
        self.validation.resume();
        applied
    }

    /// Forget all learned state and return the persona to neutral.
    ///
    /// Hyperparameters, including remediated ones, are kept.
    pub async fn reset_learning_data(&mut self) {
        self.persona = PersonaVector::neutral();
        self.momentum.reset();
        self.history.clear();
        self.buffer.clear();
        self.validation.reset();
        self.schedule.reset();
        self.counts = FeedbackCounts::default();
        self.recent_shifts.clear();
        self.persist_persona().await;
        info!("Learning data reset");
    }

    pub fn stats(&self) -> LearningStats {
        let early = self.validation.state();
        LearningStats {
            total_feedback: self.counts.total,
            positive_feedback: self.counts.positive,
            negative_feedback: self.counts.negative,
            positive_ratio: self.counts.positive_ratio(),
            phase: self.phase(),
            learning_rate: self.hyper.learning_rate,
            momentum_beta: self.hyper.momentum_beta,
            l2_lambda: self.hyper.l2_lambda,
            best_validation_score: early.best_validation_score,
            no_improvement_counter: early.no_improvement_counter,
            buffer_size: self.buffer.len(),
            checkpoints_written: self.schedule.written(),
            last_checkpoint_feedback_count: self.schedule.last_feedback_count(),
            mean_momentum_magnitude: self.momentum.mean_magnitude(),
        }
    }

    /// Daily positive/negative counts over the retained history
    pub fn feedback_trend(&self, days: u32) -> Vec<TrendPoint> {
        daily_trend(self.history.iter(), days, Utc::now())
    }

    async fn persist_persona(&self) {
        if let Err(e) = self.persona_store.update_persona(&self.persona).await {
            warn!("Failed to persist persona: {}", e);
        }
    }

    async fn log_step(
        &self,
        response_id: &str,
        sign: FeedbackSign,
        persona_before: PersonaVector,
        adjustments: &[AdjustmentRecord],
    ) {
        let Some(log) = &self.learning_log else {
            return;
        };
        let record = LearningRecord::new(response_id, sign, persona_before, adjustments.to_vec());
        if let Err(e) = log.record(&record).await {
            warn!("Failed to record learning step for {}: {}", response_id, e);
        }
    }
}
