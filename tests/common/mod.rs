#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use support_harness::cache::TimedCache;
use support_harness::corpus::{Case, CaseComment, CaseCorpus, CaseSource, Corpus, CorpusRegistry};
use support_harness::models::{Content, Metadata, Record};
use support_harness::providers::{CompletionModel, EmbeddingModel, HashingEmbedder};
use support_harness::synth::ContentSynthesizer;
use support_harness::watermark::WatermarkStore;

/// Answers relevance judgements with "YES" and otherwise echoes the first
/// quoted span of the prompt, so synthesized text tracks its input.
pub struct QuoteModel {
    calls: AtomicUsize,
}

impl QuoteModel {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionModel for QuoteModel {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.starts_with("Judge") {
            return Ok("YES".to_string());
        }
        let quoted = prompt
            .split_once('"')
            .and_then(|(_, rest)| rest.split_once('"'))
            .map(|(inner, _)| inner.to_string());
        Ok(quoted.unwrap_or_else(|| "grounded answer".to_string()))
    }
}

/// An in-memory case tracker. Cases can be added between ingestion passes;
/// every window queried is recorded.
#[derive(Default)]
pub struct MockCaseSource {
    cases: Mutex<Vec<Case>>,
    windows: Mutex<Vec<(Option<DateTime<Utc>>, DateTime<Utc>)>>,
    fail_updates: Mutex<bool>,
}

impl MockCaseSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, case_number: &str, description: &str, comments: &[(&str, &str)]) {
        self.cases.lock().unwrap().push(Case {
            case_number: case_number.to_string(),
            subject: format!("subject of {}", case_number),
            description: Some(description.to_string()),
            status: Some("Closed".to_string()),
            severity: Some("L2".to_string()),
            bug_url: None,
            last_modified: Utc::now(),
            comments: comments
                .iter()
                .map(|(author, body)| CaseComment {
                    author: author.to_string(),
                    body: body.to_string(),
                    published: true,
                })
                .collect(),
        });
    }

    pub fn windows(&self) -> Vec<(Option<DateTime<Utc>>, DateTime<Utc>)> {
        self.windows.lock().unwrap().clone()
    }

    pub fn fail_updates(&self, fail: bool) {
        *self.fail_updates.lock().unwrap() = fail;
    }
}

#[async_trait]
impl CaseSource for MockCaseSource {
    async fn modified_cases(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Case>> {
        self.windows.lock().unwrap().push((since, until));
        if *self.fail_updates.lock().unwrap() {
            anyhow::bail!("case tracker unavailable");
        }
        Ok(self
            .cases
            .lock()
            .unwrap()
            .iter()
            .filter(|c| since.map_or(true, |s| c.last_modified >= s) && c.last_modified < until)
            .cloned()
            .collect())
    }

    async fn case(&self, case_number: &str) -> anyhow::Result<Option<Case>> {
        Ok(self
            .cases
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.case_number == case_number)
            .cloned())
    }

    async fn published_comments(&self, case_number: &str) -> anyhow::Result<Vec<CaseComment>> {
        Ok(self
            .case(case_number)
            .await?
            .map(|c| c.comments)
            .unwrap_or_default())
    }
}

/// Watermark held in memory, with a write counter.
#[derive(Default)]
pub struct MemoryWatermark {
    value: Mutex<Option<DateTime<Utc>>>,
    writes: AtomicUsize,
}

impl MemoryWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        *self.value.lock().unwrap()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermark {
    async fn read(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.get())
    }

    async fn write(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.value.lock().unwrap() = Some(at);
        Ok(())
    }
}

/// Yields `count` records, all modified when the corpus was built, and fails
/// to distill the ones whose id is listed in `poisoned`. Distilling waits
/// `delay` so tests can cancel mid-pass.
pub struct ScriptedCorpus {
    count: usize,
    modified: DateTime<Utc>,
    poisoned: Vec<String>,
    delay: Duration,
    distilled: AtomicUsize,
}

impl ScriptedCorpus {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            modified: Utc::now(),
            poisoned: Vec::new(),
            delay: Duration::ZERO,
            distilled: AtomicUsize::new(0),
        }
    }

    pub fn poison(mut self, id: &str) -> Self {
        self.poisoned.push(id.to_string());
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn distilled(&self) -> usize {
        self.distilled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Corpus for ScriptedCorpus {
    fn classification_example(&self) -> &str {
        "Anything scripted?"
    }

    async fn get_updates(
        &self,
        since: Option<DateTime<Utc>>,
        _until: DateTime<Utc>,
    ) -> support_harness::Result<Vec<Record>> {
        if since.is_some_and(|s| self.modified < s) {
            return Ok(Vec::new());
        }
        Ok((0..self.count)
            .map(|i| Record::new(format!("R-{}", i), format!("record number {}", i), Metadata::new()))
            .collect())
    }

    async fn distill(&self, record: Record) -> support_harness::Result<Record> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.poisoned.contains(&record.id) {
            return Err(anyhow::anyhow!("cannot distill {}", record.id).into());
        }
        self.distilled.fetch_add(1, Ordering::SeqCst);
        Ok(record)
    }

    async fn get_content(&self, metadata: &Metadata) -> support_harness::Result<Content> {
        Ok(Content {
            metadata: metadata.clone(),
            summary: "scripted".to_string(),
        })
    }

    fn render(&self, content: &Content) -> String {
        content.summary.clone()
    }
}

pub fn embedder() -> Arc<dyn EmbeddingModel> {
    Arc::new(HashingEmbedder::new(128))
}

pub fn case_corpus(source: Arc<MockCaseSource>, llm: Arc<dyn CompletionModel>) -> Arc<dyn Corpus> {
    Arc::new(CaseCorpus::new(
        source,
        Arc::new(ContentSynthesizer::new(llm, 3)),
        TimedCache::new(Duration::from_secs(3600), 32),
    ))
}

pub fn single(name: &str, corpus: Arc<dyn Corpus>) -> CorpusRegistry {
    let mut registry = CorpusRegistry::new();
    registry.register(name, corpus, embedder()).unwrap();
    registry
}
