//! Query classification and retrieval.
//!
//! [`QueryRouter::route`] picks the corpus a query belongs to and returns
//! that corpus's closest indexed record. Classification is skipped when
//! the caller names a corpus or when only one corpus is registered.

use std::sync::Arc;

use crate::corpus::{CorpusEntry, CorpusRegistry};
use crate::error::{Error, Result};
use crate::models::SearchHit;
use crate::providers::CompletionModel;
use crate::synth::render_template;
use crate::vector_index::VectorIndex;

/// The corpus a query was routed to and its best match.
#[derive(Clone)]
pub struct Routed {
    pub corpus: CorpusEntry,
    pub hit: SearchHit,
}

pub struct QueryRouter {
    corpora: CorpusRegistry,
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn CompletionModel>,
    top_k: usize,
}

impl QueryRouter {
    pub fn new(
        corpora: CorpusRegistry,
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn CompletionModel>,
        top_k: usize,
    ) -> Self {
        Self {
            corpora,
            index,
            llm,
            top_k: top_k.max(1),
        }
    }

    pub fn corpora(&self) -> &CorpusRegistry {
        &self.corpora
    }

    /// Classify `query` (unless `explicit` names the corpus) and fetch the
    /// closest record from that corpus.
    pub async fn route(&self, query: &str, explicit: Option<&str>) -> Result<Routed> {
        let entry = match explicit {
            Some(name) => self.corpora.require(name)?,
            None => self.classify(query).await?,
        };

        let hits = self
            .index
            .search(&entry.name, entry.embedder.as_ref(), query, self.top_k)
            .await?;
        let hit = hits.into_iter().next().ok_or_else(|| Error::NoMatch {
            corpus: entry.name.clone(),
        })?;
        tracing::debug!(corpus = %entry.name, record = %hit.id, score = hit.score, "routed query");

        Ok(Routed {
            corpus: entry.clone(),
            hit,
        })
    }

    /// Pick a corpus for `query`. Never calls the model when only one corpus
    /// is registered; falls back to the first corpus when the model answers
    /// with anything but a registered name.
    pub async fn classify(&self, query: &str) -> Result<&CorpusEntry> {
        let entries = self.corpora.entries();
        let first = entries
            .first()
            .ok_or_else(|| Error::config("no corpus registered"))?;
        if entries.len() == 1 {
            return Ok(first);
        }

        let prompt = render_template(&classification_prompt(&self.corpora), &[("query", query)]);
        let answer = self.llm.complete(&prompt).await?;
        let answer = answer.trim();

        match self.corpora.get(answer) {
            Some(entry) => Ok(entry),
            None => {
                tracing::warn!(
                    answer,
                    fallback = %first.name,
                    "classifier answered with an unregistered corpus"
                );
                Ok(first)
            }
        }
    }
}

/// Few-shot prompt constrained to the registered corpus names, one example
/// per corpus. Leaves a `{query}` placeholder.
fn classification_prompt(corpora: &CorpusRegistry) -> String {
    let names = corpora.names();
    let or_list = match names.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} or {}", rest.join(", "), last),
        _ => names.join(""),
    };

    let mut prompt = format!("Classify the question into {}.\n\nExample:\n", or_list);
    for entry in corpora.entries() {
        prompt.push_str(&format!(
            "    Question: {}\n    Answer: {}\n",
            entry.corpus.classification_example(),
            entry.name
        ));
    }
    prompt.push_str(&format!(
        "\nDo not respond with the answer other than {}.\n\nQuestion: {{query}}\nAnswer:",
        names.join(", ")
    ));
    prompt
}
