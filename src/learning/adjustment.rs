//! Adjustment calculation with regularization, clipping and momentum.
//!
//! Maps (persona, features, feedback sign) to per-parameter deltas:
//! 1. Raw signal: `direction * polarity * lr * 100 * weight`, summed per parameter
//! 2. L2 pull toward the neutral value: `delta -= l2 * (current - 50)`
//! 3. Gradient clipping to `±gradient_clip_max`
//! 4. Momentum EMA: `m = beta * m + (1 - beta) * delta`, candidate is `m`
//! 5. Per-update cap to `±max_change_per_update`
//! 6. Clamp to [0, 100] and drop changes inside the dead zone
//!
//! Only parameters touched by a feature are considered.

use crate::config::Hyperparameters;
use crate::learning::features::{FeatureVector, LengthBucket};
use crate::types::{AdjustmentRecord, FeedbackSign, PersonaParam, PersonaVector, PARAM_NEUTRAL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// How strongly a feature pulls on one parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coupling {
    pub param: PersonaParam,
    /// +1 moves with the feedback direction, -1 against it
    pub polarity: f64,
    pub weight: f64,
}

impl Coupling {
    fn new(param: PersonaParam, polarity: f64, weight: f64) -> Self {
        Self {
            param,
            polarity,
            weight,
        }
    }
}

/// Parameters touched by a feature vector, with polarity and weight
pub fn couplings(features: &FeatureVector, hyper: &Hyperparameters) -> Vec<Coupling> {
    let mut out = Vec::new();

    match features.length_bucket {
        LengthBucket::Short => {
            out.push(Coupling::new(PersonaParam::Verbosity, -1.0, 1.0));
            out.push(Coupling::new(PersonaParam::DetailLevel, -1.0, 1.0));
        }
        LengthBucket::Normal => {}
        LengthBucket::Verbose => {
            out.push(Coupling::new(PersonaParam::Verbosity, 1.0, 1.0));
            out.push(Coupling::new(PersonaParam::DetailLevel, 1.0, 1.0));
        }
        LengthBucket::VeryVerbose => {
            out.push(Coupling::new(PersonaParam::Verbosity, 1.0, hyper.very_verbose_weight));
            out.push(Coupling::new(PersonaParam::DetailLevel, 1.0, hyper.very_verbose_weight));
        }
    }

    if features.has_code {
        out.push(Coupling::new(PersonaParam::CodeUsage, 1.0, 1.0));
        out.push(Coupling::new(PersonaParam::TechnicalDepth, 1.0, 1.0));
    }
    if features.has_emoji {
        out.push(Coupling::new(PersonaParam::EmojiUsage, 1.0, 1.0));
    }
    if features.has_humor {
        out.push(Coupling::new(PersonaParam::Humor, 1.0, 1.0));
        out.push(Coupling::new(PersonaParam::Playfulness, 1.0, 1.0));
    }
    if features.has_humor || features.has_emoji {
        out.push(Coupling::new(PersonaParam::Formality, -1.0, hyper.cross_coupling_weight));
        out.push(Coupling::new(PersonaParam::Friendliness, 1.0, hyper.cross_coupling_weight));
    }
    if features.has_examples {
        out.push(Coupling::new(PersonaParam::ExampleUsage, 1.0, 1.0));
    }
    if features.is_structured {
        out.push(Coupling::new(PersonaParam::Structure, 1.0, 1.0));
    }

    out
}

/// Running per-parameter momentum
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentumState {
    values: BTreeMap<PersonaParam, f64>,
}

impl MomentumState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, param: PersonaParam) -> f64 {
        self.values.get(&param).copied().unwrap_or(0.0)
    }

    /// Fold a delta into the EMA and return the smoothed value
    pub fn update(&mut self, param: PersonaParam, delta: f64, beta: f64) -> f64 {
        let entry = self.values.entry(param).or_insert(0.0);
        let next = beta * *entry + (1.0 - beta) * delta;
        *entry = if next.is_finite() { next } else { 0.0 };
        *entry
    }

    /// Mean absolute momentum over parameters that have any
    pub fn mean_magnitude(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.values().map(|m| m.abs()).sum::<f64>() / self.values.len() as f64
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }
}

/// Stateless calculator over the engine's hyperparameters
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjustmentCalculator;

impl AdjustmentCalculator {
    /// Compute stabilized adjustments for one feedback signal.
    ///
    /// `lr_scale` scales the learning rate for this call only (replay uses 0.5).
    /// Momentum is updated for every touched parameter, including those whose
    /// final change falls inside the dead zone.
    pub fn compute_adjustments(
        &self,
        current: &PersonaVector,
        features: &FeatureVector,
        sign: FeedbackSign,
        momentum: &mut MomentumState,
        hyper: &Hyperparameters,
        lr_scale: f64,
    ) -> Vec<AdjustmentRecord> {
        let direction = sign.direction();
        let step = hyper.learning_rate * lr_scale * 100.0;

        let mut raw: BTreeMap<PersonaParam, f64> = BTreeMap::new();
        for coupling in couplings(features, hyper) {
            *raw.entry(coupling.param).or_insert(0.0) +=
                direction * coupling.polarity * step * coupling.weight;
        }

        let mut adjustments = Vec::with_capacity(raw.len());
        for (param, raw_delta) in raw {
            let old_value = current.get(param);
            let delta = self.stabilize(param, old_value, raw_delta, momentum, hyper);
            let record = AdjustmentRecord::from_delta(param, old_value, delta);

            debug!(
                "{}: raw={:.3} stabilized={:.3} {:.2} -> {:.2}",
                param, raw_delta, delta, record.old_value, record.new_value
            );

            if record.applied_shift() > hyper.dead_zone {
                adjustments.push(record);
            }
        }

        adjustments
    }

    /// Regularize, clip, smooth and cap one raw delta
    fn stabilize(
        &self,
        param: PersonaParam,
        current: f64,
        raw_delta: f64,
        momentum: &mut MomentumState,
        hyper: &Hyperparameters,
    ) -> f64 {
        let mut delta = finite_or_zero(raw_delta);

        delta -= hyper.l2_lambda * (current - PARAM_NEUTRAL);

        if hyper.clipping_enabled() {
            delta = delta.clamp(-hyper.gradient_clip_max, hyper.gradient_clip_max);
        }

        let smoothed = momentum.update(param, finite_or_zero(delta), hyper.momentum_beta);

        smoothed.clamp(-hyper.max_change_per_update, hyper.max_change_per_update)
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::features::extract_features;

    fn features(length_bucket: LengthBucket) -> FeatureVector {
        FeatureVector {
            length_bucket,
            has_code: false,
            has_emoji: false,
            has_humor: false,
            has_examples: false,
            is_structured: false,
        }
    }

    fn find(adjustments: &[AdjustmentRecord], param: PersonaParam) -> Option<&AdjustmentRecord> {
        adjustments.iter().find(|a| a.param == param)
    }

    #[test]
    fn test_positive_verbose_raises_verbosity() {
        let hyper = Hyperparameters::default();
        let mut momentum = MomentumState::new();
        let persona = PersonaVector::neutral();

        let adjustments = AdjustmentCalculator.compute_adjustments(
            &persona,
            &features(LengthBucket::VeryVerbose),
            FeedbackSign::Positive,
            &mut momentum,
            &hyper,
            1.0,
        );

        let verbosity = find(&adjustments, PersonaParam::Verbosity).unwrap();
        // raw = 0.1 * 100 * 1.5 = 15, clipped to 5, EMA with beta 0.9 -> 0.5
        assert!((verbosity.delta - 0.5).abs() < 1e-9);
        assert!(verbosity.new_value > verbosity.old_value);
    }

    #[test]
    fn test_negative_feedback_is_symmetric() {
        let hyper = Hyperparameters::default();
        let persona = PersonaVector::neutral();

        let mut up = MomentumState::new();
        let pos = AdjustmentCalculator.compute_adjustments(
            &persona,
            &features(LengthBucket::Verbose),
            FeedbackSign::Positive,
            &mut up,
            &hyper,
            1.0,
        );
        let mut down = MomentumState::new();
        let neg = AdjustmentCalculator.compute_adjustments(
            &persona,
            &features(LengthBucket::Verbose),
            FeedbackSign::Negative,
            &mut down,
            &hyper,
            1.0,
        );

        let p = find(&pos, PersonaParam::Verbosity).unwrap().delta;
        let n = find(&neg, PersonaParam::Verbosity).unwrap().delta;
        assert!(p > 0.0);
        assert!((p + n).abs() < 1e-9);
    }

    #[test]
    fn test_short_response_has_inverse_polarity() {
        let hyper = Hyperparameters::default();
        let mut momentum = MomentumState::new();

        let adjustments = AdjustmentCalculator.compute_adjustments(
            &PersonaVector::neutral(),
            &features(LengthBucket::Short),
            FeedbackSign::Positive,
            &mut momentum,
            &hyper,
            1.0,
        );

        assert!(find(&adjustments, PersonaParam::Verbosity).unwrap().delta < 0.0);
    }

    #[test]
    fn test_humor_lowers_formality_at_cross_weight() {
        let hyper = Hyperparameters {
            gradient_clip_max: 100.0,
            momentum_beta: 0.0,
            max_change_per_update: 100.0,
            max_change_per_epoch: 100.0,
            ..Default::default()
        };
        let mut momentum = MomentumState::new();
        let fv = FeatureVector {
            has_humor: true,
            ..features(LengthBucket::Normal)
        };

        let adjustments = AdjustmentCalculator.compute_adjustments(
            &PersonaVector::neutral(),
            &fv,
            FeedbackSign::Positive,
            &mut momentum,
            &hyper,
            1.0,
        );

        let humor = find(&adjustments, PersonaParam::Humor).unwrap();
        let formality = find(&adjustments, PersonaParam::Formality).unwrap();
        assert!((humor.delta - 10.0).abs() < 1e-9);
        assert!((formality.delta + 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_regularization_pulls_toward_center() {
        let hyper = Hyperparameters {
            momentum_beta: 0.0,
            l2_lambda: 0.1,
            ..Default::default()
        };
        let mut momentum = MomentumState::new();
        let persona = PersonaVector::neutral().with(PersonaParam::Verbosity, 90.0);

        // raw +10, l2 pulls -4 -> 6, clipped to 5
        let adjustments = AdjustmentCalculator.compute_adjustments(
            &persona,
            &features(LengthBucket::Verbose),
            FeedbackSign::Positive,
            &mut momentum,
            &Hyperparameters {
                learning_rate: 0.1,
                ..hyper.clone()
            },
            1.0,
        );
        assert!((find(&adjustments, PersonaParam::Verbosity).unwrap().delta - 5.0).abs() < 1e-9);

        // With a small step the pull dominates
        let adjustments = AdjustmentCalculator.compute_adjustments(
            &persona,
            &features(LengthBucket::Verbose),
            FeedbackSign::Positive,
            &mut momentum,
            &Hyperparameters {
                learning_rate: 0.01,
                ..hyper
            },
            1.0,
        );
        assert!(find(&adjustments, PersonaParam::Verbosity).unwrap().delta < 0.0);
    }

    #[test]
    fn test_per_update_cap() {
        let hyper = Hyperparameters {
            learning_rate: 0.5,
            gradient_clip_max: 0.0,
            momentum_beta: 0.0,
            max_change_per_update: 2.0,
            ..Default::default()
        };
        let mut momentum = MomentumState::new();

        let adjustments = AdjustmentCalculator.compute_adjustments(
            &PersonaVector::neutral(),
            &features(LengthBucket::VeryVerbose),
            FeedbackSign::Positive,
            &mut momentum,
            &hyper,
            1.0,
        );

        for adj in &adjustments {
            assert!(adj.delta.abs() <= 2.0 + 1e-12);
        }
    }

    #[test]
    fn test_new_value_clamped_at_bounds() {
        let hyper = Hyperparameters {
            momentum_beta: 0.0,
            l2_lambda: 0.0,
            ..Default::default()
        };
        let mut momentum = MomentumState::new();
        let persona = PersonaVector::neutral().with(PersonaParam::Verbosity, 99.0);

        let adjustments = AdjustmentCalculator.compute_adjustments(
            &persona,
            &features(LengthBucket::Verbose),
            FeedbackSign::Positive,
            &mut momentum,
            &hyper,
            1.0,
        );

        let verbosity = find(&adjustments, PersonaParam::Verbosity).unwrap();
        assert_eq!(verbosity.new_value, 100.0);
    }

    #[test]
    fn test_dead_zone_drops_tiny_changes() {
        let hyper = Hyperparameters {
            learning_rate: 0.001,
            min_learning_rate: 0.001,
            momentum_beta: 0.99,
            ..Default::default()
        };
        let mut momentum = MomentumState::new();

        // raw 0.1, EMA (1 - 0.99) * 0.1 = 0.001, below 0.01
        let adjustments = AdjustmentCalculator.compute_adjustments(
            &PersonaVector::neutral(),
            &features(LengthBucket::Verbose),
            FeedbackSign::Positive,
            &mut momentum,
            &hyper,
            1.0,
        );
        assert!(adjustments.is_empty());
        assert!(momentum.get(PersonaParam::Verbosity) > 0.0);
    }

    #[test]
    fn test_momentum_accumulates_across_events() {
        let hyper = Hyperparameters::default();
        let mut momentum = MomentumState::new();
        let persona = PersonaVector::neutral();
        let fv = features(LengthBucket::Verbose);

        let first = AdjustmentCalculator.compute_adjustments(
            &persona,
            &fv,
            FeedbackSign::Positive,
            &mut momentum,
            &hyper,
            1.0,
        );
        let second = AdjustmentCalculator.compute_adjustments(
            &persona,
            &fv,
            FeedbackSign::Positive,
            &mut momentum,
            &hyper,
            1.0,
        );

        let d1 = find(&first, PersonaParam::Verbosity).unwrap().delta;
        let d2 = find(&second, PersonaParam::Verbosity).unwrap().delta;
        assert!(d2 > d1);
    }

    #[test]
    fn test_lr_scale_halves_raw_signal() {
        let hyper = Hyperparameters {
            momentum_beta: 0.0,
            gradient_clip_max: 100.0,
            max_change_per_update: 15.0,
            ..Default::default()
        };
        let fv = features(LengthBucket::Verbose);

        let full = AdjustmentCalculator.compute_adjustments(
            &PersonaVector::neutral(),
            &fv,
            FeedbackSign::Positive,
            &mut MomentumState::new(),
            &hyper,
            1.0,
        );
        let half = AdjustmentCalculator.compute_adjustments(
            &PersonaVector::neutral(),
            &fv,
            FeedbackSign::Positive,
            &mut MomentumState::new(),
            &hyper,
            0.5,
        );

        let f = find(&full, PersonaParam::Verbosity).unwrap().delta;
        let h = find(&half, PersonaParam::Verbosity).unwrap().delta;
        assert!((f - 2.0 * h).abs() < 1e-9);
    }

    #[test]
    fn test_untouched_params_not_adjusted() {
        let hyper = Hyperparameters::default();
        let mut momentum = MomentumState::new();
        let fv = extract_features(&"plain ".repeat(100));

        let adjustments = AdjustmentCalculator.compute_adjustments(
            &PersonaVector::neutral(),
            &fv,
            FeedbackSign::Positive,
            &mut momentum,
            &hyper,
            1.0,
        );
        assert!(adjustments.is_empty());
        assert!(momentum.is_empty());
    }
}
