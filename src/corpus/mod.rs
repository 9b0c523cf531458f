//! Corpora: the record collections that ingestion pulls from and queries
//! are answered against.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              CorpusRegistry              │
//! │  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ CaseCorpus   │  │ KnowledgeBase    │  │
//! │  │ (salesforce) │  │ (knowledgebase)  │  │
//! │  └──────┬───────┘  └────────┬─────────┘  │
//! └─────────┼───────────────────┼────────────┘
//!           ▼                   ▼
//!      CaseSource          ArticleSource       (JsonFileSource, or any
//!                                               tracker client)
//! ```
//!
//! Each registry entry pairs a corpus with the embedder its vectors live
//! under. The registry preserves registration order, which is also the
//! order ingestion walks the corpora and the router's fallback order.

pub mod case;
pub mod file_source;
pub mod kb;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::TimedCache;
use crate::config::{Config, CorpusConfig};
use crate::error::{Error, Result};
use crate::model_registry::ModelRegistry;
use crate::models::{Content, Metadata, Record};
use crate::providers::EmbeddingModel;
use crate::synth::ContentSynthesizer;

pub use case::{Case, CaseComment, CaseCorpus, CaseSource};
pub use file_source::JsonFileSource;
pub use kb::{Article, ArticleSource, KnowledgeBaseCorpus};

pub const SALESFORCE: &str = "salesforce";
pub const KNOWLEDGEBASE: &str = "knowledgebase";

/// A record collection with its own synthesis rules.
///
/// # Lifecycle
///
/// 1. [`get_updates`](Corpus::get_updates) lists raw records changed in a
///    time window. It should be cheap; no model calls.
/// 2. [`distill`](Corpus::distill) turns one raw record into the text that
///    gets embedded. Called per record so one failure skips one record.
/// 3. At query time [`get_content`](Corpus::get_content) loads the full
///    detail behind a matched record's metadata and synthesizes a summary,
///    and [`render`](Corpus::render) formats it for the user.
#[async_trait]
pub trait Corpus: Send + Sync {
    /// A question this corpus answers, for the router's few-shot prompt.
    fn classification_example(&self) -> &str;

    /// Records modified in `[since, until)`. `since = None` means from the beginning.
    async fn get_updates(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Record>>;

    /// Produce the text stored in the vector index for `record`.
    async fn distill(&self, record: Record) -> Result<Record>;

    /// Full, synthesized content for a matched record.
    async fn get_content(&self, metadata: &Metadata) -> Result<Content>;

    /// A corpus-specific operation outside the ask flow.
    async fn custom_action(&self, action: &str, data: &Metadata) -> Result<Content> {
        let _ = data;
        Err(Error::unknown("action", action))
    }

    /// Format content for display.
    fn render(&self, content: &Content) -> String;
}

/// A registered corpus and the embedder its collection is keyed by.
#[derive(Clone)]
pub struct CorpusEntry {
    pub name: String,
    pub corpus: Arc<dyn Corpus>,
    pub embedder: Arc<dyn EmbeddingModel>,
}

#[derive(Clone, Default)]
pub struct CorpusRegistry {
    entries: Vec<CorpusEntry>,
}

impl CorpusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every `[[corpora]]` entry, resolving its models through `models`.
    pub async fn from_config(config: &Config, models: &ModelRegistry) -> Result<Self> {
        let mut registry = Self::new();
        for cfg in &config.corpora {
            let (llm, embeddings) = match (&cfg.models.llm, &cfg.models.embeddings) {
                (Some(llm), Some(embeddings)) => (llm, embeddings),
                _ => {
                    return Err(Error::config(format!(
                        "corpus '{}' must specify both llm and embeddings",
                        cfg.kind
                    )))
                }
            };
            let synth = Arc::new(ContentSynthesizer::new(
                models.completion(llm).await?,
                config.synthesis.parallelism,
            ));
            let embedder = models.embedding(embeddings).await?;
            let corpus = build_corpus(cfg, synth, config)?;
            registry.register(cfg.kind.clone(), corpus, embedder)?;
        }
        Ok(registry)
    }

    /// Register a corpus under `name`. Names must be unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        corpus: Arc<dyn Corpus>,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(Error::config(format!("duplicated corpus '{}'", name)));
        }
        self.entries.push(CorpusEntry {
            name,
            corpus,
            embedder,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&CorpusEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Like [`get`](Self::get), failing with [`Error::UnknownEntity`].
    pub fn require(&self, name: &str) -> Result<&CorpusEntry> {
        self.get(name).ok_or_else(|| Error::unknown("corpus", name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn build_corpus(
    cfg: &CorpusConfig,
    synth: Arc<ContentSynthesizer>,
    config: &Config,
) -> Result<Arc<dyn Corpus>> {
    let source = Arc::new(JsonFileSource::new(&cfg.path));
    let window = std::time::Duration::from_secs(config.synthesis.cache_window_secs);
    let capacity = config.synthesis.cache_capacity;

    match cfg.kind.as_str() {
        SALESFORCE => Ok(Arc::new(CaseCorpus::new(
            source,
            synth,
            TimedCache::new(window, capacity),
        ))),
        KNOWLEDGEBASE => Ok(Arc::new(KnowledgeBaseCorpus::new(
            source,
            synth,
            TimedCache::new(window, capacity),
        ))),
        other => Err(Error::config(format!("unknown corpus type '{}'", other))),
    }
}
