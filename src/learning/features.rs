//! Feature extraction from response text.
//!
//! Derives a small set of discrete signals from a generated response. The
//! extractor is pure: identical text always yields identical features, and
//! the absence of a signal is a `false` or `Normal` value, never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Responses shorter than this many chars are `Short`
pub const SHORT_MAX_CHARS: usize = 300;
/// Responses longer than this many chars are `Verbose`
pub const VERBOSE_MIN_CHARS: usize = 1000;
/// Responses longer than this many chars are `VeryVerbose`
pub const VERY_VERBOSE_MIN_CHARS: usize = 2000;

/// Coarse response length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthBucket {
    Short,
    Normal,
    Verbose,
    VeryVerbose,
}

impl LengthBucket {
    pub fn from_char_count(chars: usize) -> Self {
        if chars > VERY_VERBOSE_MIN_CHARS {
            LengthBucket::VeryVerbose
        } else if chars > VERBOSE_MIN_CHARS {
            LengthBucket::Verbose
        } else if chars < SHORT_MAX_CHARS {
            LengthBucket::Short
        } else {
            LengthBucket::Normal
        }
    }
}

/// Signals derived from one response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub length_bucket: LengthBucket,
    pub has_code: bool,
    pub has_emoji: bool,
    pub has_humor: bool,
    pub has_examples: bool,
    pub is_structured: bool,
}

impl FeatureVector {
    /// True when no signal other than a normal length is present
    pub fn is_empty(&self) -> bool {
        self.length_bucket == LengthBucket::Normal
            && !self.has_code
            && !self.has_emoji
            && !self.has_humor
            && !self.has_examples
            && !self.is_structured
    }
}

fn code_fence() -> &'static Regex {
    static PATTERN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?m)^\s*```").expect("Valid code fence regex"));
    &PATTERN
}

fn inline_code() -> &'static Regex {
    static PATTERN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"`[^`\n]+`").expect("Valid inline code regex"));
    &PATTERN
}

fn humor_marker() -> &'static Regex {
    static PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(ha(ha)+|he(he)+|lol|lmao|rofl|just kidding|pun intended)\b|!!|[;:]-?[)D]|[😂🤣😄😆😅😜😉]")
            .expect("Valid humor regex")
    });
    &PATTERN
}

fn example_marker() -> &'static Regex {
    static PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)\b(for example|for instance|e\.g\.|such as|example:|consider the following)")
            .expect("Valid example regex")
    });
    &PATTERN
}

fn structure_marker() -> &'static Regex {
    static PATTERN: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?m)^ {0,3}(#{1,6}\s|[-*+]\s|\d+[.)]\s)").expect("Valid structure regex")
    });
    &PATTERN
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F300..=0x1FAFF // symbols, pictographs, emoticons, transport, supplemental
        | 0x2600..=0x27BF // misc symbols and dingbats
        | 0x1F000..=0x1F2FF // tiles, cards, enclosed
    )
}

/// Extract features from a response's text
pub fn extract_features(text: &str) -> FeatureVector {
    let chars = text.chars().count();

    FeatureVector {
        length_bucket: LengthBucket::from_char_count(chars),
        has_code: code_fence().is_match(text) || inline_code().is_match(text),
        has_emoji: text.chars().any(is_emoji),
        has_humor: humor_marker().is_match(text),
        has_examples: example_marker().is_match(text),
        is_structured: structure_marker().is_match(text),
    }
}
