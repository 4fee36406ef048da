//! Storage layer for the persona learner
//!
//! Defines the collaborator traits the engine depends on and ships three
//! families of implementations: in-memory (tests, embedding hosts), JSON
//! files, and a libsql-backed audit log and checkpoint store.

pub mod file;
pub mod libsql;
pub mod memory;

pub use self::file::{FileCheckpointStore, JsonFilePersonaStore};
pub use self::libsql::LibsqlLearningStore;
pub use self::memory::{
    InMemoryCheckpointStore, InMemoryLearningLog, InMemoryPersonaStore, InMemoryResponses,
};
pub use crate::learning::checkpoint::CheckpointStore;

use crate::error::Result;
use crate::types::{AdjustmentRecord, FeedbackSign, PersonaVector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable home of the live persona vector
#[async_trait]
pub trait PersonaStore: Send + Sync {
    /// Load the persona; stores with nothing saved return the neutral vector
    async fn get_persona(&self) -> Result<PersonaVector>;

    /// Overwrite the saved persona
    async fn update_persona(&self, persona: &PersonaVector) -> Result<()>;
}

/// Lookup of generated response text by id
#[async_trait]
pub trait ResponseLookup: Send + Sync {
    async fn find_response(&self, response_id: &str) -> Result<Option<String>>;
}

/// Append-only audit trail of applied learning steps
#[async_trait]
pub trait LearningLog: Send + Sync {
    async fn record(&self, record: &LearningRecord) -> Result<()>;
}

/// One audit entry: what feedback arrived and what it changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub id: String,
    pub response_id: String,
    pub sign: FeedbackSign,
    pub persona_before: PersonaVector,
    pub timestamp: DateTime<Utc>,
    pub adjustments: Vec<AdjustmentRecord>,
}

impl LearningRecord {
    pub fn new(
        response_id: impl Into<String>,
        sign: FeedbackSign,
        persona_before: PersonaVector,
        adjustments: Vec<AdjustmentRecord>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            response_id: response_id.into(),
            sign,
            persona_before,
            timestamp: Utc::now(),
            adjustments,
        }
    }
}
