//! Support-case corpus.
//!
//! Indexes each case by the symptom distilled from its description. At
//! query time the full case (status, severity, bug link, published
//! comments) is loaded and run through the [`CasePipeline`]; the summary is
//! memoized on the description plus the exact comment thread.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::TimedCache;
use crate::error::{Error, Result};
use crate::models::{metadata, Content, Metadata, Record};
use crate::synth::case::{CasePipeline, Dialog};
use crate::synth::ContentSynthesizer;

use super::Corpus;

pub const CASE_NUMBER: &str = "case_number";
pub const SUMMARIZE_CASE: &str = "summarize_case";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub case_number: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub bug_url: Option<String>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<CaseComment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseComment {
    /// First name of the commenter.
    pub author: String,
    pub body: String,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

/// Access to a case tracker.
#[async_trait]
pub trait CaseSource: Send + Sync {
    /// Cases last modified in `[since, until)`.
    async fn modified_cases(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Case>>;

    async fn case(&self, case_number: &str) -> anyhow::Result<Option<Case>>;

    /// Published comments of a case, oldest first.
    async fn published_comments(&self, case_number: &str) -> anyhow::Result<Vec<CaseComment>>;
}

type SummaryKey = (String, Vec<Dialog>);

pub struct CaseCorpus {
    source: Arc<dyn CaseSource>,
    pipeline: CasePipeline,
    summaries: TimedCache<SummaryKey, String>,
}

impl CaseCorpus {
    pub fn new(
        source: Arc<dyn CaseSource>,
        synth: Arc<ContentSynthesizer>,
        summaries: TimedCache<SummaryKey, String>,
    ) -> Self {
        Self {
            source,
            pipeline: CasePipeline::new(synth),
            summaries,
        }
    }

    async fn content_for(&self, case_number: &str) -> Result<Content> {
        let case = self
            .source
            .case(case_number)
            .await?
            .ok_or_else(|| Error::unknown("case", case_number))?;
        let dialogs: Vec<Dialog> = self
            .source
            .published_comments(case_number)
            .await?
            .into_iter()
            .map(|c| Dialog::new(c.author, c.body))
            .collect();
        let description = case.description.clone().unwrap_or_default();

        let summary = self
            .summaries
            .get_or_try_insert_with((description.clone(), dialogs.clone()), || async {
                tracing::debug!(case = case_number, comments = dialogs.len(), "summarizing case");
                self.pipeline.summarize(&description, &dialogs).await
            })
            .await?;

        Ok(Content {
            metadata: metadata([
                (CASE_NUMBER, case.case_number),
                ("status", case.status.unwrap_or_default()),
                ("sev_lv", case.severity.unwrap_or_default()),
                ("bug_url", case.bug_url.unwrap_or_default()),
            ]),
            summary,
        })
    }
}

fn required<'a>(data: &'a Metadata, field: &'static str) -> Result<&'a str> {
    data.get(field)
        .map(String::as_str)
        .ok_or_else(|| Error::unknown("field", field))
}

#[async_trait]
impl Corpus for CaseCorpus {
    fn classification_example(&self) -> &str {
        "Some issues happened, is there similar discussions?"
    }

    async fn get_updates(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Record>> {
        let cases = self.source.modified_cases(since, until).await?;
        Ok(cases
            .into_iter()
            .filter_map(|case| {
                let description = case.description.filter(|d| !d.trim().is_empty())?;
                Some(Record::new(
                    case.case_number.clone(),
                    description,
                    metadata([(CASE_NUMBER, case.case_number), ("subject", case.subject)]),
                ))
            })
            .collect())
    }

    async fn distill(&self, mut record: Record) -> Result<Record> {
        record.text = self.pipeline.symptom(&record.text).await?;
        Ok(record)
    }

    async fn get_content(&self, metadata: &Metadata) -> Result<Content> {
        self.content_for(required(metadata, CASE_NUMBER)?).await
    }

    async fn custom_action(&self, action: &str, data: &Metadata) -> Result<Content> {
        match action {
            SUMMARIZE_CASE => self.content_for(required(data, CASE_NUMBER)?).await,
            other => Err(Error::unknown("action", other)),
        }
    }

    fn render(&self, content: &Content) -> String {
        let field = |key: &str| content.metadata.get(key).map(String::as_str).unwrap_or("");
        format!(
            "Case:\t\t{}\nStatus:\t\t{}\nSeverity Level:\t{}\nBug URL:\t{}\nSummary:\n{}\n",
            field(CASE_NUMBER),
            field("status"),
            field("sev_lv"),
            field("bug_url"),
            content.summary
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FnModel;
    use std::sync::Mutex;
    use std::time::Duration;

    struct StaticCases {
        cases: Vec<Case>,
        queried: Mutex<Vec<(Option<DateTime<Utc>>, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl CaseSource for StaticCases {
        async fn modified_cases(
            &self,
            since: Option<DateTime<Utc>>,
            until: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Case>> {
            self.queried.lock().unwrap().push((since, until));
            Ok(self.cases.clone())
        }

        async fn case(&self, case_number: &str) -> anyhow::Result<Option<Case>> {
            Ok(self.cases.iter().find(|c| c.case_number == case_number).cloned())
        }

        async fn published_comments(&self, case_number: &str) -> anyhow::Result<Vec<CaseComment>> {
            Ok(self
                .cases
                .iter()
                .find(|c| c.case_number == case_number)
                .map(|c| c.comments.iter().filter(|c| c.published).cloned().collect())
                .unwrap_or_default())
        }
    }

    fn case(number: &str, description: Option<&str>) -> Case {
        Case {
            case_number: number.to_string(),
            subject: format!("subject {}", number),
            description: description.map(str::to_string),
            status: Some("Open".to_string()),
            severity: Some("L2".to_string()),
            bug_url: None,
            last_modified: Utc::now(),
            comments: vec![CaseComment {
                author: "ann".to_string(),
                body: "restart fixed it".to_string(),
                published: true,
            }],
        }
    }

    fn corpus(model: Arc<FnModel>) -> CaseCorpus {
        let source = Arc::new(StaticCases {
            cases: vec![case("C-1", Some("disk full")), case("C-2", None)],
            queried: Mutex::new(Vec::new()),
        });
        let synth = Arc::new(ContentSynthesizer::new(model, 2));
        CaseCorpus::new(source, synth, TimedCache::new(Duration::from_secs(60), 8))
    }

    #[tokio::test]
    async fn test_updates_skip_cases_without_description() {
        let corpus = corpus(Arc::new(FnModel::new(|_| Ok("x".to_string()))));
        let records = corpus.get_updates(None, Utc::now()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "C-1");
        assert_eq!(records[0].text, "disk full");
        assert_eq!(records[0].metadata.get("subject").unwrap(), "subject C-1");
    }

    #[tokio::test]
    async fn test_distill_extracts_symptom() {
        let corpus = corpus(Arc::new(FnModel::new(|_| Ok("symptom".to_string()))));
        let record = Record::new("C-1", "disk full", Metadata::new());
        assert_eq!(corpus.distill(record).await.unwrap().text, "symptom");
    }

    #[tokio::test]
    async fn test_content_is_cached() {
        let model = Arc::new(FnModel::new(|_| Ok("YES".to_string())));
        let corpus = corpus(model.clone());
        let meta = metadata([(CASE_NUMBER, "C-1")]);

        let first = corpus.get_content(&meta).await.unwrap();
        let calls = model.calls();
        let second = corpus.get_content(&meta).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(model.calls(), calls);
        assert_eq!(first.metadata.get("sev_lv").unwrap(), "L2");
        assert_eq!(first.metadata.get("bug_url").unwrap(), "");
    }

    #[tokio::test]
    async fn test_unknown_case_action_and_field() {
        let corpus = corpus(Arc::new(FnModel::new(|_| Ok("x".to_string()))));
        let missing = corpus
            .get_content(&metadata([(CASE_NUMBER, "C-404")]))
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::UnknownEntity { kind: "case", .. }));

        let no_field = corpus.custom_action(SUMMARIZE_CASE, &Metadata::new()).await.unwrap_err();
        assert!(matches!(no_field, Error::UnknownEntity { kind: "field", .. }));

        let bad_action = corpus
            .custom_action("close_case", &metadata([(CASE_NUMBER, "C-1")]))
            .await
            .unwrap_err();
        assert!(matches!(bad_action, Error::UnknownEntity { kind: "action", .. }));
    }

    #[tokio::test]
    async fn test_render_layout() {
        let corpus = corpus(Arc::new(FnModel::new(|_| Ok("x".to_string()))));
        let content = Content {
            metadata: metadata([
                (CASE_NUMBER, "C-1"),
                ("status", "Closed"),
                ("sev_lv", "L1"),
                ("bug_url", "https://bugs/1"),
            ]),
            summary: "all good".to_string(),
        };
        assert_eq!(
            corpus.render(&content),
            "Case:\t\tC-1\nStatus:\t\tClosed\nSeverity Level:\tL1\nBug URL:\thttps://bugs/1\nSummary:\nall good\n"
        );
    }
}
