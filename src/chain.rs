//! The query façade.
//!
//! ```text
//! ask(query) ─▶ QueryRouter ─▶ Corpus::get_content ─▶ SessionMemory? ─▶ render ─▶ stream
//! ```
//!
//! All work happens before the first chunk is yielded, so a failure is
//! reported as an error rather than a truncated stream.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::memory::SessionMemory;
use crate::models::Metadata;
use crate::router::QueryRouter;

pub struct AnswerChain {
    router: QueryRouter,
    memory: Option<Arc<SessionMemory>>,
}

impl AnswerChain {
    pub fn new(router: QueryRouter, memory: Option<Arc<SessionMemory>>) -> Self {
        Self { router, memory }
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    /// Answer `query` from the best matching record, grounded in the
    /// session's memory when both a session and memory are present.
    pub async fn ask(
        &self,
        query: &str,
        corpus: Option<&str>,
        session: Option<&str>,
    ) -> Result<BoxStream<'static, String>> {
        let routed = self.router.route(query, corpus).await?;
        let entry = &routed.corpus;

        let mut content = entry.corpus.get_content(&routed.hit.metadata).await?;
        if let (Some(session), Some(memory)) = (session, &self.memory) {
            content.summary = memory.integrate(session, query, &content.summary).await?;
        }

        tracing::info!(corpus = %entry.name, record = %routed.hit.id, "answered query");
        Ok(stream_text(entry.corpus.render(&content)))
    }

    /// Run a corpus-specific action and stream its rendered content.
    pub async fn custom_action(
        &self,
        corpus: &str,
        action: &str,
        data: &Metadata,
    ) -> Result<BoxStream<'static, String>> {
        let entry = self.router.corpora().require(corpus)?;
        let content = entry.corpus.custom_action(action, data).await?;
        Ok(stream_text(entry.corpus.render(&content)))
    }

    /// Forget a session. Does nothing when memory is not configured.
    pub async fn clear_history(&self, session: &str) -> Result<()> {
        match &self.memory {
            Some(memory) => memory.clear(session).await,
            None => Ok(()),
        }
    }
}

/// Split `text` after every space, tab, or newline. Each chunk keeps its
/// trailing delimiter, so concatenating the chunks restores `text`.
pub fn split_tokens(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, ' ' | '\t' | '\n') {
            chunks.push(text[start..i + 1].to_string());
            start = i + 1;
        }
    }
    if start < text.len() {
        chunks.push(text[start..].to_string());
    }
    chunks
}

fn stream_text(text: String) -> BoxStream<'static, String> {
    stream::iter(split_tokens(&text)).boxed()
}
