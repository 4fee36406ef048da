//! Overfitting diagnostics.
//!
//! Read-only inspection of recent feedback and adjustment magnitudes. Three
//! checks run:
//! - Train/validation gap over the last 50 events (trailing 10 validate)
//! - Parameter volatility: summed shift of the last 20 applied events
//! - Negative spike: 6 or more negatives among the last 10 events
//!
//! Diagnosis returns typed [`Remediation`]s; applying them is the engine's job.

use crate::config::{Hyperparameters, DEFAULT_GRADIENT_CLIP_MAX};
use crate::learning::validation::{positive_ratio, FeedbackHistory};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const GAP_WINDOW: usize = 50;
pub const GAP_VALIDATION_SLICE: usize = 10;
/// Fewer events than this and the gap check is skipped
pub const GAP_MIN_EVENTS: usize = 20;
pub const GAP_THRESHOLD: f64 = 0.2;

pub const VOLATILITY_WINDOW: usize = 20;
pub const VOLATILITY_THRESHOLD: f64 = 100.0;
pub const VOLATILITY_TARGET_BETA: f64 = 0.95;

pub const SPIKE_WINDOW: usize = 10;
pub const SPIKE_NEGATIVES: usize = 6;

pub const LEARNING_RATE_CUT: f64 = 0.5;
pub const REGULARIZATION_BOOST: f64 = 2.0;

/// Corrective action recommended by diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Remediation {
    /// Multiply the learning rate by `factor`
    ReduceLearningRate { factor: f64 },
    /// Raise momentum beta to at least `beta`
    IncreaseMomentum { beta: f64 },
    /// Multiply L2 strength by `factor`
    IncreaseRegularization { factor: f64 },
    /// Ensure clipping is active with bound at most `max`
    TightenClipping { max: f64 },
    /// Restore the most recent checkpoint
    RollbackToCheckpoint,
}

impl Remediation {
    /// Whether this action only touches hyperparameters
    pub fn is_hyperparameter_only(&self) -> bool {
        !matches!(self, Remediation::RollbackToCheckpoint)
    }
}

impl std::fmt::Display for Remediation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Remediation::ReduceLearningRate { factor } => {
                write!(f, "reduce learning rate by factor {}", factor)
            }
            Remediation::IncreaseMomentum { beta } => write!(f, "increase momentum beta to {}", beta),
            Remediation::IncreaseRegularization { factor } => {
                write!(f, "increase L2 regularization by factor {}", factor)
            }
            Remediation::TightenClipping { max } => write!(f, "clip gradients at {}", max),
            Remediation::RollbackToCheckpoint => write!(f, "roll back to last checkpoint"),
        }
    }
}

/// Result of one diagnostics pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverfittingReport {
    pub is_overfitting: bool,
    pub indicators: Vec<String>,
    pub recommendations: Vec<Remediation>,
}

impl OverfittingReport {
    fn flag(&mut self, indicator: String, recommendations: &[Remediation]) {
        self.indicators.push(indicator);
        for rec in recommendations {
            if !self.recommendations.contains(rec) {
                self.recommendations.push(*rec);
            }
        }
        self.is_overfitting = true;
    }
}

/// Inspect history and recent per-event shifts (oldest first)
pub fn detect(
    history: &FeedbackHistory,
    recent_shifts: &[f64],
    hyper: &Hyperparameters,
) -> OverfittingReport {
    let mut report = OverfittingReport::default();

    if let Some((train, validation)) = train_validation_gap(history) {
        let gap = train - validation;
        debug!("Train/validation ratios {:.3}/{:.3}, gap {:.3}", train, validation, gap);
        if gap > GAP_THRESHOLD {
            report.flag(
                format!(
                    "Train/validation gap {:.2} exceeds {:.2} (train {:.2}, validation {:.2})",
                    gap, GAP_THRESHOLD, train, validation
                ),
                &[
                    Remediation::ReduceLearningRate {
                        factor: LEARNING_RATE_CUT,
                    },
                    Remediation::IncreaseRegularization {
                        factor: REGULARIZATION_BOOST,
                    },
                ],
            );
        }
    }

    let skip = recent_shifts.len().saturating_sub(VOLATILITY_WINDOW);
    let volatility: f64 = recent_shifts[skip..].iter().sum();
    if volatility > VOLATILITY_THRESHOLD {
        let clip = if hyper.clipping_enabled() {
            hyper.gradient_clip_max
        } else {
            DEFAULT_GRADIENT_CLIP_MAX
        };
        report.flag(
            format!(
                "Parameter volatility {:.1} over last {} updates exceeds {:.1}",
                volatility,
                recent_shifts.len() - skip,
                VOLATILITY_THRESHOLD
            ),
            &[
                Remediation::IncreaseMomentum {
                    beta: VOLATILITY_TARGET_BETA,
                },
                Remediation::TightenClipping { max: clip },
            ],
        );
    }

    let recent = history.recent(SPIKE_WINDOW);
    let negatives = recent.iter().filter(|e| !e.sign.is_positive()).count();
    if recent.len() == SPIKE_WINDOW && negatives >= SPIKE_NEGATIVES {
        report.flag(
            format!(
                "Negative feedback spike: {} of last {} events negative",
                negatives, SPIKE_WINDOW
            ),
            &[
                Remediation::RollbackToCheckpoint,
                Remediation::ReduceLearningRate {
                    factor: LEARNING_RATE_CUT,
                },
            ],
        );
    }

    report
}

/// Positive ratios of the early "train" slice and trailing validation slice
fn train_validation_gap(history: &FeedbackHistory) -> Option<(f64, f64)> {
    let window = history.recent(GAP_WINDOW);
    if window.len() < GAP_MIN_EVENTS {
        return None;
    }
    let split = window.len() - GAP_VALIDATION_SLICE;
    let train = positive_ratio(window[..split].iter().copied())?;
    let validation = positive_ratio(window[split..].iter().copied())?;
    Some((train, validation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeedbackEvent, FeedbackSign};

    fn history_of(signs: impl IntoIterator<Item = FeedbackSign>) -> FeedbackHistory {
        let mut history = FeedbackHistory::new(1000);
        for (i, sign) in signs.into_iter().enumerate() {
            history.push(FeedbackEvent::new(format!("r{}", i), sign));
        }
        history
    }

    fn repeat(sign: FeedbackSign, n: usize) -> impl Iterator<Item = FeedbackSign> {
        std::iter::repeat(sign).take(n)
    }

    #[test]
    fn test_healthy_history_reports_nothing() {
        let signs = (0..40).map(|i| {
            if i % 2 == 0 {
                FeedbackSign::Positive
            } else {
                FeedbackSign::Negative
            }
        });
        let report = detect(&history_of(signs), &[2.0; 20], &Hyperparameters::default());

        assert!(!report.is_overfitting);
        assert!(report.indicators.is_empty());
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_gap_flags_overfitting() {
        // 40 positive "train" events, then 10 validation events with 5 negatives
        let signs = repeat(FeedbackSign::Positive, 40)
            .chain(repeat(FeedbackSign::Negative, 5))
            .chain(repeat(FeedbackSign::Positive, 5));
        let report = detect(&history_of(signs), &[], &Hyperparameters::default());

        assert!(report.is_overfitting);
        assert!(report.recommendations.contains(&Remediation::ReduceLearningRate {
            factor: LEARNING_RATE_CUT
        }));
        assert!(report.recommendations.contains(&Remediation::IncreaseRegularization {
            factor: REGULARIZATION_BOOST
        }));
        assert!(!report.recommendations.contains(&Remediation::RollbackToCheckpoint));
    }

    #[test]
    fn test_gap_needs_minimum_history() {
        let signs = repeat(FeedbackSign::Positive, 9).chain(repeat(FeedbackSign::Negative, 5));
        let report = detect(&history_of(signs), &[], &Hyperparameters::default());
        assert!(report.indicators.iter().all(|i| !i.starts_with("Train/validation")));
    }

    #[test]
    fn test_volatility_flags_instability() {
        let shifts = vec![6.0; 20];
        let report = detect(&history_of(repeat(FeedbackSign::Positive, 5)), &shifts, &Hyperparameters::default());

        assert!(report.is_overfitting);
        assert!(report.recommendations.contains(&Remediation::IncreaseMomentum {
            beta: VOLATILITY_TARGET_BETA
        }));
        assert!(report
            .recommendations
            .contains(&Remediation::TightenClipping { max: 5.0 }));
    }

    #[test]
    fn test_volatility_only_counts_last_window() {
        let mut shifts = vec![50.0; 10];
        shifts.extend(vec![1.0; 20]);
        let report = detect(&history_of(repeat(FeedbackSign::Positive, 5)), &shifts, &Hyperparameters::default());
        assert!(!report.is_overfitting);
    }

    #[test]
    fn test_negative_spike_recommends_rollback() {
        let signs = repeat(FeedbackSign::Positive, 4).chain(repeat(FeedbackSign::Negative, 6));
        let report = detect(&history_of(signs), &[], &Hyperparameters::default());

        assert!(report.is_overfitting);
        assert_eq!(
            report.recommendations,
            vec![
                Remediation::RollbackToCheckpoint,
                Remediation::ReduceLearningRate {
                    factor: LEARNING_RATE_CUT
                },
            ]
        );
    }

    #[test]
    fn test_recommendations_are_deduplicated() {
        // Gap and spike both recommend a learning-rate cut
        let signs = repeat(FeedbackSign::Positive, 40).chain(repeat(FeedbackSign::Negative, 10));
        let report = detect(&history_of(signs), &[], &Hyperparameters::default());

        let cuts = report
            .recommendations
            .iter()
            .filter(|r| matches!(r, Remediation::ReduceLearningRate { .. }))
            .count();
        assert_eq!(cuts, 1);
        assert_eq!(report.indicators.len(), 2);
    }

    #[test]
    fn test_remediation_serializes_tagged() {
        let json = serde_json::to_string(&Remediation::IncreaseMomentum { beta: 0.95 }).unwrap();
        assert_eq!(json, r#"{"action":"increase_momentum","beta":0.95}"#);
    }
}
