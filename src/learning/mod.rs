//! Online persona learning
//!
//! Leaves first:
//! - **features**: response text to a small feature vector
//! - **adjustment**: feature couplings, L2, clipping, momentum
//! - **governor**: per-epoch drift budget
//! - **validation**: trailing-window score, early stopping, learning phases
//! - **checkpoint** / **replay**: rollback snapshots and experience buffer
//! - **diagnostics**: overfitting detection and typed remediations
//! - **stats**: counters and daily trends
//! - **engine**: the orchestrator owning all of the above

pub mod adjustment;
pub mod checkpoint;
pub mod diagnostics;
pub mod engine;
pub mod features;
pub mod governor;
pub mod replay;
pub mod stats;
pub mod validation;

pub use adjustment::{AdjustmentCalculator, MomentumState};
pub use checkpoint::{Checkpoint, CheckpointSchedule, CheckpointStore};
pub use diagnostics::{OverfittingReport, Remediation};
pub use engine::{
    AppliedRemediation, FeedbackOutcome, FeedbackResult, PersonaLearningEngine, RollbackOutcome,
    SharedEngine,
};
pub use features::{extract_features, FeatureVector, LengthBucket};
pub use governor::{EpochBudget, StabilityGovernor};
pub use replay::{Experience, ExperienceBuffer};
pub use stats::{LearningStats, TrendPoint};
pub use validation::{EarlyStoppingState, LearningPhase};
