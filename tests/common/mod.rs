//! Common test utilities and helpers

#![allow(dead_code)]

use persona_learner::storage::{
    InMemoryCheckpointStore, InMemoryLearningLog, InMemoryPersonaStore, InMemoryResponses,
};
use persona_learner::{FeedbackResult, FeedbackSign, Hyperparameters, PersonaLearningEngine};
use std::sync::Arc;

pub const VERY_VERBOSE_ID: &str = "very-verbose";
pub const SHORT_ID: &str = "short";
pub const RICH_ID: &str = "rich";
pub const CODE_ID: &str = "code";

/// Over 2000 characters and nothing else
pub fn very_verbose_text() -> String {
    "word ".repeat(500)
}

/// Touches nearly every coupled parameter at once
pub fn rich_text() -> String {
    let mut text = String::from("# Overview\n\n- first point\n- second point\n\n");
    text.push_str("For example, consider this snippet 😀 haha:\n\n```rust\nfn main() {}\n```\n\n");
    text.push_str(&"detail ".repeat(320));
    text
}

/// Engine wired to in-memory collaborators, with handles kept for inspection
pub struct TestHarness {
    pub engine: PersonaLearningEngine,
    pub responses: Arc<InMemoryResponses>,
    pub persona_store: Arc<InMemoryPersonaStore>,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
    pub log: Arc<InMemoryLearningLog>,
}

impl TestHarness {
    pub async fn feed(&mut self, response_id: &str, sign: FeedbackSign) -> FeedbackResult {
        self.engine
            .process_feedback(response_id, sign)
            .await
            .expect("Failed to process feedback")
    }

    pub async fn feed_n(&mut self, response_id: &str, sign: FeedbackSign, n: usize) -> Vec<FeedbackResult> {
        let mut results = Vec::with_capacity(n);
        for _ in 0..n {
            results.push(self.feed(response_id, sign).await);
        }
        results
    }
}

pub async fn register_fixtures(responses: &InMemoryResponses) {
    responses.insert(VERY_VERBOSE_ID, very_verbose_text()).await;
    responses.insert(SHORT_ID, "Sure.").await;
    responses.insert(RICH_ID, rich_text()).await;
    responses
        .insert(CODE_ID, "Use this:\n```python\nprint('hi')\n```")
        .await;
}

/// Create an engine with in-memory collaborators and a fixed replay seed
pub async fn create_test_harness(hyper: Hyperparameters, auto_remediate: bool) -> TestHarness {
    let responses = Arc::new(InMemoryResponses::new());
    register_fixtures(&responses).await;

    let persona_store = Arc::new(InMemoryPersonaStore::default());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let log = Arc::new(InMemoryLearningLog::new());

    let engine = PersonaLearningEngine::new(
        hyper,
        persona_store.clone(),
        responses.clone(),
        checkpoints.clone(),
    )
    .await
    .expect("Failed to create test engine")
    .with_learning_log(log.clone())
    .with_seed(7)
    .with_auto_remediate(auto_remediate);

    TestHarness {
        engine,
        responses,
        persona_store,
        checkpoints,
        log,
    }
}
