//! Learning statistics and daily feedback trends.

use crate::learning::validation::LearningPhase;
use crate::types::FeedbackEvent;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running feedback totals since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackCounts {
    pub total: u64,
    pub positive: u64,
    pub negative: u64,
}

impl FeedbackCounts {
    pub fn record(&mut self, positive: bool) {
        self.total += 1;
        if positive {
            self.positive += 1;
        } else {
            self.negative += 1;
        }
    }

    pub fn positive_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.positive as f64 / self.total as f64
        }
    }
}

/// Snapshot of engine state for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStats {
    pub total_feedback: u64,
    pub positive_feedback: u64,
    pub negative_feedback: u64,
    pub positive_ratio: f64,
    pub phase: LearningPhase,
    pub learning_rate: f64,
    pub momentum_beta: f64,
    pub l2_lambda: f64,
    pub best_validation_score: Option<f64>,
    pub no_improvement_counter: usize,
    pub buffer_size: usize,
    pub checkpoints_written: u64,
    pub last_checkpoint_feedback_count: Option<u64>,
    pub mean_momentum_magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub positive: u64,
    pub negative: u64,
    pub positive_ratio: f64,
}

/// Longest trend window, in days
pub const MAX_TREND_DAYS: u32 = 366;

/// Bucket events into one point per UTC day, oldest first.
///
/// Covers the `days` days ending at `now` (at most [`MAX_TREND_DAYS`]),
/// including empty days.
pub fn daily_trend<'a, I>(events: I, days: u32, now: DateTime<Utc>) -> Vec<TrendPoint>
where
    I: IntoIterator<Item = &'a FeedbackEvent>,
{
    let days = i64::from(days.min(MAX_TREND_DAYS));
    if days == 0 {
        return Vec::new();
    }

    let today = now.date_naive();
    let Some(first) = today.checked_sub_signed(Duration::days(days - 1)) else {
        return Vec::new();
    };

    let mut buckets: BTreeMap<NaiveDate, (u64, u64)> = (0..days)
        .filter_map(|offset| first.checked_add_signed(Duration::days(offset)))
        .map(|date| (date, (0, 0)))
        .collect();

    for event in events {
        if let Some(bucket) = buckets.get_mut(&event.timestamp.date_naive()) {
            if event.sign.is_positive() {
                bucket.0 += 1;
            } else {
                bucket.1 += 1;
            }
        }
    }

    buckets
        .into_iter()
        .map(|(date, (positive, negative))| {
            let total = positive + negative;
            TrendPoint {
                date,
                positive,
                negative,
                positive_ratio: if total == 0 {
                    0.0
                } else {
                    positive as f64 / total as f64
                },
            }
        })
        .collect()
}
