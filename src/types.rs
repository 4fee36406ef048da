//! Core data types for the persona learning engine
//!
//! This module defines the fundamental data structures:
//! - PersonaParam / PersonaVector: the bounded parameter vector being learned
//! - FeedbackSign / FeedbackEvent: user feedback on generated responses
//! - AdjustmentRecord: one parameter change produced by a feedback event

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lower bound for every persona parameter
pub const PARAM_MIN: f64 = 0.0;

/// Upper bound for every persona parameter
pub const PARAM_MAX: f64 = 100.0;

/// Neutral value that regularization pulls toward
pub const PARAM_NEUTRAL: f64 = 50.0;

/// A named personality trait governing response style
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaParam {
    Formality,
    Verbosity,
    Friendliness,
    Humor,
    EmojiUsage,
    Enthusiasm,
    Empathy,
    Directness,
    Patience,
    Assertiveness,
    TechnicalDepth,
    CodeUsage,
    ExampleUsage,
    Structure,
    DetailLevel,
    Creativity,
    Curiosity,
    Proactivity,
    AnalogyUsage,
    Optimism,
    Warmth,
    Playfulness,
    Confidence,
    Caution,
    Encouragement,
    QuestionAsking,
    Storytelling,
    Precision,
}

impl PersonaParam {
    /// Every parameter, in vector order
    pub const ALL: [PersonaParam; 28] = [
        PersonaParam::Formality,
        PersonaParam::Verbosity,
        PersonaParam::Friendliness,
        PersonaParam::Humor,
        PersonaParam::EmojiUsage,
        PersonaParam::Enthusiasm,
        PersonaParam::Empathy,
        PersonaParam::Directness,
        PersonaParam::Patience,
        PersonaParam::Assertiveness,
        PersonaParam::TechnicalDepth,
        PersonaParam::CodeUsage,
        PersonaParam::ExampleUsage,
        PersonaParam::Structure,
        PersonaParam::DetailLevel,
        PersonaParam::Creativity,
        PersonaParam::Curiosity,
        PersonaParam::Proactivity,
        PersonaParam::AnalogyUsage,
        PersonaParam::Optimism,
        PersonaParam::Warmth,
        PersonaParam::Playfulness,
        PersonaParam::Confidence,
        PersonaParam::Caution,
        PersonaParam::Encouragement,
        PersonaParam::QuestionAsking,
        PersonaParam::Storytelling,
        PersonaParam::Precision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaParam::Formality => "formality",
            PersonaParam::Verbosity => "verbosity",
            PersonaParam::Friendliness => "friendliness",
            PersonaParam::Humor => "humor",
            PersonaParam::EmojiUsage => "emoji_usage",
            PersonaParam::Enthusiasm => "enthusiasm",
            PersonaParam::Empathy => "empathy",
            PersonaParam::Directness => "directness",
            PersonaParam::Patience => "patience",
            PersonaParam::Assertiveness => "assertiveness",
            PersonaParam::TechnicalDepth => "technical_depth",
            PersonaParam::CodeUsage => "code_usage",
            PersonaParam::ExampleUsage => "example_usage",
            PersonaParam::Structure => "structure",
            PersonaParam::DetailLevel => "detail_level",
            PersonaParam::Creativity => "creativity",
            PersonaParam::Curiosity => "curiosity",
            PersonaParam::Proactivity => "proactivity",
            PersonaParam::AnalogyUsage => "analogy_usage",
            PersonaParam::Optimism => "optimism",
            PersonaParam::Warmth => "warmth",
            PersonaParam::Playfulness => "playfulness",
            PersonaParam::Confidence => "confidence",
            PersonaParam::Caution => "caution",
            PersonaParam::Encouragement => "encouragement",
            PersonaParam::QuestionAsking => "question_asking",
            PersonaParam::Storytelling => "storytelling",
            PersonaParam::Precision => "precision",
        }
    }
}

impl fmt::Display for PersonaParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonaParam {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PersonaParam::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown persona parameter: {}", s))
    }
}

/// Ordered mapping of every persona parameter to a value in [0, 100].
///
/// All writes clamp, so the bounds hold for every vector that exists.
/// Deserialization fills missing parameters with the neutral value and
/// clamps out-of-range ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<PersonaParam, f64>", into = "BTreeMap<PersonaParam, f64>")]
pub struct PersonaVector {
    values: BTreeMap<PersonaParam, f64>,
}

impl PersonaVector {
    /// Vector with every parameter at the neutral value
    pub fn neutral() -> Self {
        Self {
            values: PersonaParam::ALL
                .iter()
                .map(|p| (*p, PARAM_NEUTRAL))
                .collect(),
        }
    }

    /// Builder-style override of a single parameter
    pub fn with(mut self, param: PersonaParam, value: f64) -> Self {
        self.set(param, value);
        self
    }

    pub fn get(&self, param: PersonaParam) -> f64 {
        self.values.get(&param).copied().unwrap_or(PARAM_NEUTRAL)
    }

    /// Set a parameter, clamped to [0, 100]. Non-finite values are ignored.
    pub fn set(&mut self, param: PersonaParam, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.values.insert(param, clamp_param(value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (PersonaParam, f64)> + '_ {
        self.values.iter().map(|(p, v)| (*p, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum of absolute per-parameter differences against another vector
    pub fn total_shift(&self, other: &PersonaVector) -> f64 {
        PersonaParam::ALL
            .iter()
            .map(|p| (self.get(*p) - other.get(*p)).abs())
            .sum()
    }

    /// Apply a set of adjustments, writing each record's new value
    pub fn apply(&mut self, adjustments: &[AdjustmentRecord]) {
        for adj in adjustments {
            self.set(adj.param, adj.new_value);
        }
    }
}

impl Default for PersonaVector {
    fn default() -> Self {
        Self::neutral()
    }
}

impl From<BTreeMap<PersonaParam, f64>> for PersonaVector {
    fn from(map: BTreeMap<PersonaParam, f64>) -> Self {
        let mut vector = PersonaVector::neutral();
        for (param, value) in map {
            vector.set(param, value);
        }
        vector
    }
}

impl From<PersonaVector> for BTreeMap<PersonaParam, f64> {
    fn from(vector: PersonaVector) -> Self {
        vector.values
    }
}

/// Clamp a value into the persona parameter range
pub fn clamp_param(value: f64) -> f64 {
    value.clamp(PARAM_MIN, PARAM_MAX)
}

/// Polarity of a feedback event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSign {
    Positive,
    Negative,
}

impl FeedbackSign {
    /// +1 for positive feedback, -1 for negative
    pub fn direction(&self) -> f64 {
        match self {
            FeedbackSign::Positive => 1.0,
            FeedbackSign::Negative => -1.0,
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, FeedbackSign::Positive)
    }
}

impl fmt::Display for FeedbackSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedbackSign::Positive => write!(f, "positive"),
            FeedbackSign::Negative => write!(f, "negative"),
        }
    }
}

impl FromStr for FeedbackSign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positive" | "+" | "up" | "thumbs_up" => Ok(FeedbackSign::Positive),
            "negative" | "-" | "down" | "thumbs_down" => Ok(FeedbackSign::Negative),
            other => Err(format!("Invalid feedback sign: {}", other)),
        }
    }
}

/// A user's signal on one generated response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub response_id: String,
    pub sign: FeedbackSign,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackEvent {
    pub fn new(response_id: impl Into<String>, sign: FeedbackSign) -> Self {
        Self {
            response_id: response_id.into(),
            sign,
            timestamp: Utc::now(),
        }
    }

    pub fn at(response_id: impl Into<String>, sign: FeedbackSign, timestamp: DateTime<Utc>) -> Self {
        Self {
            response_id: response_id.into(),
            sign,
            timestamp,
        }
    }
}

/// One parameter change produced by a feedback event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub param: PersonaParam,
    pub old_value: f64,
    pub new_value: f64,
    pub delta: f64,
}

impl AdjustmentRecord {
    /// Build a record from an old value and a delta, clamping the new value
    pub fn from_delta(param: PersonaParam, old_value: f64, delta: f64) -> Self {
        Self {
            param,
            old_value,
            new_value: clamp_param(old_value + delta),
            delta,
        }
    }

    /// The change that actually lands after clamping
    pub fn applied_shift(&self) -> f64 {
        (self.new_value - self.old_value).abs()
    }
}

/// Sum of applied shifts over a set of adjustments
pub fn total_applied_shift(adjustments: &[AdjustmentRecord]) -> f64 {
    adjustments.iter().map(AdjustmentRecord::applied_shift).sum()
}
