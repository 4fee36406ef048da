//! Persona Learner - Adaptive Persona Parameter Learning Engine
//!
//! An online, feedback-driven controller that nudges 28 bounded personality
//! parameters toward what a user seems to prefer, while guarding against:
//! - Instability (momentum, clipping, per-update and per-epoch caps)
//! - Overfitting (L2 pull to neutral, validation-based early stopping)
//! - Catastrophic forgetting (experience replay, checkpoint rollback)
//!
//! # Architecture
//!
//! - **Types**: Persona parameters, vectors, feedback events, adjustments
//! - **Learning**: Feature extraction through the engine orchestrator
//! - **Storage**: Persona, response, audit and checkpoint collaborators
//! - **Config**: Validated hyperparameters with layered loading
//!
//! # Example
//!
//! ```ignore
//! use persona_learner::{
//!     storage::{InMemoryCheckpointStore, InMemoryPersonaStore, InMemoryResponses},
//!     FeedbackSign, Hyperparameters, PersonaLearningEngine,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let responses = Arc::new(InMemoryResponses::new());
//!     responses.insert("r1", "```rust\nfn main() {}\n```").await;
//!
//!     let mut engine = PersonaLearningEngine::new(
//!         Hyperparameters::default(),
//!         Arc::new(InMemoryPersonaStore::default()),
//!         responses,
//!         Arc::new(InMemoryCheckpointStore::new()),
//!     )
//!     .await?;
//!
//!     let result = engine.process_feedback("r1", FeedbackSign::Positive).await?;
//!     println!("{:?}", result.outcome);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod learning;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::{Hyperparameters, LearnerConfig};
pub use error::{LearnerError, Result};
pub use learning::{
    FeedbackOutcome, FeedbackResult, LearningPhase, LearningStats, OverfittingReport,
    PersonaLearningEngine, Remediation, RollbackOutcome, SharedEngine, TrendPoint,
};
pub use types::{AdjustmentRecord, FeedbackEvent, FeedbackSign, PersonaParam, PersonaVector};
