//! In-memory collaborators

use crate::error::Result;
use crate::learning::checkpoint::{sort_by_recency, Checkpoint, CheckpointStore};
use crate::storage::{LearningLog, LearningRecord, PersonaStore, ResponseLookup};
use crate::types::PersonaVector;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persona held in process memory
#[derive(Debug, Default)]
pub struct InMemoryPersonaStore {
    persona: RwLock<PersonaVector>,
}

impl InMemoryPersonaStore {
    pub fn new(persona: PersonaVector) -> Self {
        Self {
            persona: RwLock::new(persona),
        }
    }
}

#[async_trait]
impl PersonaStore for InMemoryPersonaStore {
    async fn get_persona(&self) -> Result<PersonaVector> {
        Ok(self.persona.read().await.clone())
    }

    async fn update_persona(&self, persona: &PersonaVector) -> Result<()> {
        *self.persona.write().await = persona.clone();
        Ok(())
    }
}

/// Response texts keyed by id
#[derive(Debug, Default)]
pub struct InMemoryResponses {
    responses: RwLock<HashMap<String, String>>,
}

impl InMemoryResponses {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, response_id: impl Into<String>, text: impl Into<String>) {
        self.responses
            .write()
            .await
            .insert(response_id.into(), text.into());
    }

    pub async fn remove(&self, response_id: &str) -> Option<String> {
        self.responses.write().await.remove(response_id)
    }

    pub async fn len(&self) -> usize {
        self.responses.read().await.len()
    }
}

#[async_trait]
impl ResponseLookup for InMemoryResponses {
    async fn find_response(&self, response_id: &str) -> Result<Option<String>> {
        Ok(self.responses.read().await.get(response_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLearningLog {
    records: RwLock<Vec<LearningRecord>>,
}

impl InMemoryLearningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<LearningRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl LearningLog for InMemoryLearningLog {
    async fn record(&self, record: &LearningRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<Vec<Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints.write().await.push(checkpoint.clone());
        Ok(())
    }

    async fn latest(&self) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .iter()
            .max_by(|a, b| a.recency_cmp(b))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut all = self.checkpoints.read().await.clone();
        sort_by_recency(&mut all);
        Ok(all)
    }

    async fn prune(&self, keep: usize) -> Result<usize> {
        let mut checkpoints = self.checkpoints.write().await;
        sort_by_recency(&mut checkpoints);
        let excess = checkpoints.len().saturating_sub(keep);
        checkpoints.drain(..excess);
        Ok(excess)
    }
}
