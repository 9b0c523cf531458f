//! Case summarization: symptom, process, and solution.
//!
//! ```text
//!              ┌─ symptom:  refine(description chunks)
//! description ─┤
//! comments ────┼─ process:  group by author ─▶ condense each group (parallel)
//!              │                            ─▶ join + normalize whitespace
//!              └─ solution: judge each comment (parallel) ─▶ refine(kept)
//! ```
//!
//! The three steps run concurrently and are joined with `\n` in that
//! order. A step with nothing to work from yields a fixed fallback
//! sentence; model failures propagate.

use std::sync::Arc;

use crate::chunk::{split_text, split_texts};
use crate::error::{Error, Result};
use crate::parallel::{task, ParallelExecutor, Task};

use super::ContentSynthesizer;

const SYMPTOM_INITIAL_PROMPT: &str = r#"Summarize symptom of the following content:
    "{context}"
    SUMMARY:"#;
const SYMPTOM_REFINE_PROMPT: &str = r#"Here's the previous summary:
    "{prev_context}"
    Summarize symptom again with the following content
    "{context}"
    SUMMARY:"#;
const CONDENSE_INITIAL_PROMPT: &str = r#"Summarize the following dialog in detail:
    "{context}"
    SUMMARY:"#;
const CONDENSE_REFINE_PROMPT: &str = r#"Here's the previous summary:
    "{prev_context}"
    Summarize again with the following dialog in detail:
    "{context}"
    SUMMARY:"#;
const SOL_JUDGEMENT_PROMPT: &str = r#"Judge if the following comment has described root cause, solution or workaround.
    The ANS is either "YES" or "NO".

    CONTEXT: "The issue is mainly caused by the bug."
    ANS: YES

    CONTEXT: "The issue can be solved by the following approach."
    ANS: YES

    CONTEXT: "We can provide a workaround to bypass this issue."
    ANS: YES

    CONTEXT: "We are still working on this issue."
    ANS: NO

    CONTEXT: "{context}"
    ANS: "#;
const SOL_INITIAL_PROMPT: &str = r#"Extract the root cause, workaround or solution from the following content in detail:
    "{context}"
    SOLUTION:"#;
const SOL_REFINE_PROMPT: &str = r#"Here's the previous extracted content:
    "{prev_context}"
    Combine it with the following content in detail:
    "{context}"
    SOLUTION:"#;

pub const NO_SYMPTOM: &str = "A symptom cannot be summarized from the case description.";
pub const NO_PROCESS: &str = "A process cannot be summarized from the case comments.";
pub const NO_SOLUTION: &str = "A solution cannot be summarized from the case comments.";

pub const SYMPTOM_CHUNK_SIZE: usize = 1024;
pub const CONDENSE_CHUNK_SIZE: usize = 2048;
pub const CHUNK_OVERLAP: usize = 128;

/// One published case comment and the first name of its author.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dialog {
    pub user: String,
    pub comment: String,
}

impl Dialog {
    pub fn new(user: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            comment: comment.into(),
        }
    }
}

/// Split comments into runs of consecutive comments by the same author.
pub fn group_by_author(dialogs: &[Dialog]) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut current_user: Option<&str> = None;

    for dialog in dialogs {
        match groups.last_mut() {
            Some(group) if current_user == Some(dialog.user.as_str()) => {
                group.push(dialog.comment.clone());
            }
            _ => {
                groups.push(vec![dialog.comment.clone()]);
                current_user = Some(dialog.user.as_str());
            }
        }
    }
    groups
}

/// Collapse every whitespace run (newlines included) to one space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Clone)]
pub struct CasePipeline {
    synth: Arc<ContentSynthesizer>,
}

impl CasePipeline {
    pub fn new(synth: Arc<ContentSynthesizer>) -> Self {
        Self { synth }
    }

    pub async fn symptom(&self, description: &str) -> Result<String> {
        let chunks = split_text(description, SYMPTOM_CHUNK_SIZE, CHUNK_OVERLAP);
        let symptom = self
            .synth
            .refine(&chunks, SYMPTOM_INITIAL_PROMPT, SYMPTOM_REFINE_PROMPT)
            .await?;
        Ok(symptom.unwrap_or_else(|| NO_SYMPTOM.to_string()))
    }

    pub async fn process(&self, dialogs: &[Dialog]) -> Result<String> {
        let groups = group_by_author(dialogs);
        if groups.is_empty() {
            return Ok(NO_PROCESS.to_string());
        }

        let condensed = self
            .synth
            .executor()
            .map(&self.synth, groups, |synth, group: Vec<String>| async move {
                let chunks = split_texts(&group, CONDENSE_CHUNK_SIZE, CHUNK_OVERLAP);
                synth
                    .refine(&chunks, CONDENSE_INITIAL_PROMPT, CONDENSE_REFINE_PROMPT)
                    .await
            })
            .await?;

        let process = normalize_whitespace(&condensed.into_iter().flatten().collect::<Vec<_>>().join(" "));
        if process.is_empty() {
            return Ok(NO_PROCESS.to_string());
        }
        Ok(process)
    }

    pub async fn solution(&self, dialogs: &[Dialog]) -> Result<String> {
        let comments: Vec<String> = dialogs.iter().map(|d| d.comment.clone()).collect();

        let verdicts = self
            .synth
            .executor()
            .map(&self.synth, comments, |synth, comment: String| async move {
                let answer = synth
                    .complete(SOL_JUDGEMENT_PROMPT, &[("context", &comment)])
                    .await?;
                Ok::<_, Error>(is_relevant(&answer).then_some(comment))
            })
            .await?;

        let kept: Vec<String> = verdicts.into_iter().flatten().collect();
        tracing::debug!(kept = kept.len(), total = dialogs.len(), "judged case comments");

        let solution = self
            .synth
            .refine(&kept, SOL_INITIAL_PROMPT, SOL_REFINE_PROMPT)
            .await?;
        Ok(solution.unwrap_or_else(|| NO_SOLUTION.to_string()))
    }

    /// Symptom, process, and solution, computed concurrently and joined by newline.
    pub async fn summarize(&self, description: &str, dialogs: &[Dialog]) -> Result<String> {
        let dialogs: Arc<[Dialog]> = dialogs.into();
        let description = description.to_string();

        let steps: Vec<Task<String>> = vec![
            {
                let this = self.clone();
                task(move || async move { this.symptom(&description).await })
            },
            {
                let this = self.clone();
                let dialogs = dialogs.clone();
                task(move || async move { this.process(&dialogs).await })
            },
            {
                let this = self.clone();
                task(move || async move { this.solution(&dialogs).await })
            },
        ];

        let parts = ParallelExecutor::new(3).run_all(steps).await?;
        Ok(parts.join("\n"))
    }
}

/// A judge answer keeps the comment unless its first word is NO.
fn is_relevant(answer: &str) -> bool {
    let first = answer
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()));
    !first.is_some_and(|w| w.eq_ignore_ascii_case("no"))
}
