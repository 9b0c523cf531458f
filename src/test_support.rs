//! Deterministic model fakes for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::providers::{CompletionModel, EmbeddingModel};

/// Returns the prompt unchanged.
pub struct EchoModel;

#[async_trait]
impl CompletionModel for EchoModel {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(prompt.to_string())
    }
}

type Responder = dyn Fn(&str) -> anyhow::Result<String> + Send + Sync;

/// Answers with a closure over the prompt and counts calls.
pub struct FnModel {
    respond: Box<Responder>,
    calls: Arc<AtomicUsize>,
}

impl FnModel {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionModel for FnModel {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(prompt)
    }
}

/// Embeds every text to the same vector.
pub struct FixedEmbedder {
    name: String,
    vector: Vec<f32>,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self::named("fixed", vector)
    }

    pub fn named(name: &str, vector: Vec<f32>) -> Self {
        Self {
            name: name.to_string(),
            vector,
        }
    }
}

#[async_trait]
impl EmbeddingModel for FixedEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.vector.clone())
    }
}
