//! Stability governor: per-epoch drift ceiling.
//!
//! One `process_feedback` call is one epoch. Every adjustment applied during
//! the epoch, replayed ones included, draws from a shared budget of
//! `max_change_per_epoch`. When a batch would overrun what is left, all of
//! its deltas are scaled by the same factor.

use crate::types::{total_applied_shift, AdjustmentRecord, PersonaVector};
use tracing::debug;

/// Remaining drift allowance for the current epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochBudget {
    limit: f64,
    spent: f64,
}

impl EpochBudget {
    pub fn new(limit: f64) -> Self {
        Self {
            limit: limit.max(0.0),
            spent: 0.0,
        }
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }

    pub fn remaining(&self) -> f64 {
        (self.limit - self.spent).max(0.0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() <= f64::EPSILON
    }

    fn charge(&mut self, shift: f64) {
        self.spent += shift;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StabilityGovernor;

impl StabilityGovernor {
    /// Scale `adjustments` so their total shift against `current` stays within `limit`.
    ///
    /// New values are recomputed from the scaled deltas. Records
    /// whose scaled change falls inside `dead_zone` are dropped.
    pub fn enforce_epoch_budget(
        &self,
        adjustments: Vec<AdjustmentRecord>,
        current: &PersonaVector,
        limit: f64,
        dead_zone: f64,
    ) -> Vec<AdjustmentRecord> {
        let mut proposed = current.clone();
        proposed.apply(&adjustments);
        let total_shift = current.total_shift(&proposed);

        if total_shift <= limit {
            return adjustments;
        }

        let scale = if total_shift > 0.0 {
            (limit / total_shift).max(0.0)
        } else {
            0.0
        };
        debug!(
            "Epoch budget exceeded: shift {:.3} > {:.3}, scaling by {:.4}",
            total_shift, limit, scale
        );

        // Scale the change that actually lands, so clamped records cannot overshoot
        adjustments
            .into_iter()
            .map(|adj| {
                let landed = adj.new_value - adj.old_value;
                AdjustmentRecord::from_delta(adj.param, adj.old_value, landed * scale)
            })
            .filter(|adj| adj.applied_shift() > dead_zone)
            .collect()
    }

    /// Govern a batch against the remaining epoch budget and charge it
    pub fn govern(
        &self,
        adjustments: Vec<AdjustmentRecord>,
        current: &PersonaVector,
        budget: &mut EpochBudget,
        dead_zone: f64,
    ) -> Vec<AdjustmentRecord> {
        if budget.is_exhausted() {
            if !adjustments.is_empty() {
                debug!("Epoch budget exhausted, dropping {} adjustments", adjustments.len());
            }
            return Vec::new();
        }

        let governed =
            self.enforce_epoch_budget(adjustments, current, budget.remaining(), dead_zone);
        budget.charge(total_applied_shift(&governed));
        governed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PersonaParam;

    fn adj(param: PersonaParam, old: f64, delta: f64) -> AdjustmentRecord {
        AdjustmentRecord::from_delta(param, old, delta)
    }

    #[test]
    fn test_under_budget_is_untouched() {
        let current = PersonaVector::neutral();
        let adjustments = vec![
            adj(PersonaParam::Verbosity, 50.0, 3.0),
            adj(PersonaParam::Humor, 50.0, -2.0),
        ];

        let out = StabilityGovernor.enforce_epoch_budget(adjustments.clone(), &current, 10.0, 0.01);
        assert_eq!(out, adjustments);
    }

    #[test]
    fn test_over_budget_scales_proportionally() {
        let current = PersonaVector::neutral();
        let adjustments = vec![
            adj(PersonaParam::Verbosity, 50.0, 6.0),
            adj(PersonaParam::Humor, 50.0, -4.0),
            adj(PersonaParam::Structure, 50.0, 10.0),
        ];

        // total 20 -> limit 10 -> scale 0.5
        let out = StabilityGovernor.enforce_epoch_budget(adjustments, &current, 10.0, 0.01);

        assert_eq!(out.len(), 3);
        assert!((out[0].delta - 3.0).abs() < 1e-9);
        assert!((out[1].delta + 2.0).abs() < 1e-9);
        assert!((out[2].new_value - 55.0).abs() < 1e-9);
        assert!((total_applied_shift(&out) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_clamped_shift_counts_not_raw_delta() {
        let current = PersonaVector::neutral().with(PersonaParam::Verbosity, 98.0);
        // raw delta 10 only moves 2 because of the upper bound
        let adjustments = vec![adj(PersonaParam::Verbosity, 98.0, 10.0)];

        let out = StabilityGovernor.enforce_epoch_budget(adjustments.clone(), &current, 5.0, 0.01);
        assert_eq!(out, adjustments);
    }

    #[test]
    fn test_budget_is_shared_across_batches() {
        let current = PersonaVector::neutral();
        let mut budget = EpochBudget::new(10.0);

        let first = StabilityGovernor.govern(
            vec![adj(PersonaParam::Verbosity, 50.0, 8.0)],
            &current,
            &mut budget,
            0.01,
        );
        assert!((total_applied_shift(&first) - 8.0).abs() < 1e-9);

        let second = StabilityGovernor.govern(
            vec![
                adj(PersonaParam::Humor, 50.0, 4.0),
                adj(PersonaParam::Warmth, 50.0, 4.0),
            ],
            &current,
            &mut budget,
            0.01,
        );
        assert!((total_applied_shift(&second) - 2.0).abs() < 1e-9);
        assert!(budget.is_exhausted());

        let third = StabilityGovernor.govern(
            vec![adj(PersonaParam::Structure, 50.0, 1.0)],
            &current,
            &mut budget,
            0.01,
        );
        assert!(third.is_empty());
    }

    #[test]
    fn test_scaled_changes_below_dead_zone_dropped() {
        let current = PersonaVector::neutral();
        let adjustments = vec![
            adj(PersonaParam::Verbosity, 50.0, 1000.0),
            adj(PersonaParam::Humor, 50.0, 0.5),
        ];

        // Verbosity clamps to a 50 shift; total 50.5 scaled to 1.0
        let out = StabilityGovernor.enforce_epoch_budget(adjustments, &current, 1.0, 0.05);
        assert!(out.iter().all(|a| a.param != PersonaParam::Humor));
    }
}
