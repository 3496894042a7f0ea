//! Shared test utilities

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use engram::{
    Classification, Config, ContextPayload, Engine, LlmClient, Store, TopicClassifier, TopicModel,
};

/// Topic model that replays a scripted sequence of classifications,
/// answering with the catch-all once the script runs out
pub struct ScriptedModel {
    script: Mutex<VecDeque<Classification>>,
}

impl ScriptedModel {
    pub fn new(script: impl IntoIterator<Item = (&'static str, f64)>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|(label, confidence)| Classification {
                        label: label.to_string(),
                        confidence,
                    })
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl TopicModel for ScriptedModel {
    async fn classify(
        &self,
        _text: &str,
        _labels: &[String],
    ) -> engram::Result<Classification> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Classification::general))
    }
}

/// Topic model that is permanently unavailable
pub struct UnavailableModel;

#[async_trait]
impl TopicModel for UnavailableModel {
    async fn classify(
        &self,
        _text: &str,
        _labels: &[String],
    ) -> engram::Result<Classification> {
        Err(engram::Error::Classifier("model not loaded".to_string()))
    }
}

/// LLM stub that answers with a fixed reply and records every payload
#[derive(Default)]
pub struct StubLlm {
    pub payloads: Mutex<Vec<ContextPayload>>,
}

#[async_trait]
impl LlmClient for StubLlm {
    async fn complete(&self, payload: &ContextPayload) -> engram::Result<String> {
        self.payloads.lock().unwrap().push(payload.clone());
        Ok("ok.".to_string())
    }
}

/// Engine over an in-memory store with the given topic model
pub fn engine_with_model(model: Arc<dyn TopicModel>) -> (Engine, Arc<StubLlm>) {
    let store = Store::in_memory().expect("failed to init test store");
    engine_over_store(store, model)
}

/// Engine over an existing store (for rehydration tests)
pub fn engine_over_store(store: Store, model: Arc<dyn TopicModel>) -> (Engine, Arc<StubLlm>) {
    let config = Config::default();
    let classifier = TopicClassifier::new(model, config.classifier.confidence_threshold);
    let llm = Arc::new(StubLlm::default());
    let engine = Engine::new(store, &config, classifier, llm.clone());
    (engine, llm)
}
