//! Multi-pass text synthesis over chunked input.
//!
//! Two primitives, both driven by prompt templates with `{name}`
//! placeholders:
//!
//! - **Refine** ([`ContentSynthesizer::refine`]): the first chunk goes
//!   through the `initial` template as `{context}`; every later chunk goes
//!   through the `refine` template together with the running result as
//!   `{prev_context}`. Strictly sequential.
//! - **Map-reduce** ([`ContentSynthesizer::map_reduce`]): each chunk goes
//!   through the `map` template independently on the [`ParallelExecutor`];
//!   the mapped outputs are joined with `\n` in chunk order and passed once
//!   through the `reduce` template.
//!
//! Both return `None` when there is nothing to synthesize, so callers pick
//! their own fallback text.

pub mod case;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::parallel::ParallelExecutor;
use crate::providers::CompletionModel;

/// Substitute `{key}` placeholders in one left-to-right pass.
///
/// Substituted values are never re-scanned, so a chunk that happens to
/// contain `{prev_context}` is passed through literally. Unknown
/// placeholders and unbalanced braces are left as-is.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (close, *value))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub struct ContentSynthesizer {
    llm: Arc<dyn CompletionModel>,
    executor: ParallelExecutor,
}

impl ContentSynthesizer {
    pub fn new(llm: Arc<dyn CompletionModel>, parallelism: usize) -> Self {
        Self {
            llm,
            executor: ParallelExecutor::new(parallelism),
        }
    }

    pub fn executor(&self) -> ParallelExecutor {
        self.executor
    }

    /// Render `template` with `vars` and run it through the completion model.
    pub async fn complete(&self, template: &str, vars: &[(&str, &str)]) -> Result<String> {
        let prompt = render_template(template, vars);
        Ok(self.llm.complete(&prompt).await?)
    }

    pub async fn refine<S: AsRef<str>>(
        &self,
        chunks: &[S],
        initial: &str,
        refine: &str,
    ) -> Result<Option<String>> {
        let mut chunks = chunks.iter().map(AsRef::as_ref);
        let Some(first) = chunks.next() else {
            return Ok(None);
        };

        let mut summary = self.complete(initial, &[("context", first)]).await?;
        for chunk in chunks {
            summary = self
                .complete(refine, &[("prev_context", &summary), ("context", chunk)])
                .await?;
        }
        Ok(Some(summary))
    }

    pub async fn map_reduce(
        &self,
        chunks: Vec<String>,
        map: &str,
        reduce: &str,
    ) -> Result<Option<String>> {
        if chunks.is_empty() {
            return Ok(None);
        }

        let map = Arc::new(map.to_string());
        let mapped = self
            .executor
            .map(&self.llm, chunks, move |llm, chunk: String| {
                let map = map.clone();
                async move {
                    let prompt = render_template(&map, &[("context", &chunk)]);
                    llm.complete(&prompt).await.map_err(Error::from)
                }
            })
            .await?;

        let joined = mapped.join("\n");
        Ok(Some(self.complete(reduce, &[("context", &joined)]).await?))
    }
}
