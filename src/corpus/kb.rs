//! Knowledge-base article corpus.
//!
//! Only approved, online articles are indexed. Each is stored as five
//! questions generated from its summary, so user questions land near the
//! article that answers them. Content is a concise summary of the article's
//! solution body with HTML removed.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::TimedCache;
use crate::error::{Error, Result};
use crate::models::{metadata, Content, Metadata, Record};
use crate::synth::ContentSynthesizer;

use super::Corpus;

const QUESTIONS_PROMPT: &str = r#"Generate five questions that can be answered by the article with the summary:
    "{summary}"
    QUESTIONS:"#;
const SUMMARY_PROMPT: &str = r#"Write a concise summary of the following:
    "{solution}"
    CONCISE SUMMARY:"#;

pub const ARTICLE_ID: &str = "article_id";
pub const APPROVAL_COMPLETE: &str = "Approval Complete";
pub const ONLINE: &str = "Online";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Version id; one article can have several versions.
    pub id: String,
    pub article_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    /// Solution body, as HTML.
    #[serde(default)]
    pub solution: String,
    #[serde(default)]
    pub approval_status: String,
    #[serde(default)]
    pub publish_status: String,
    pub last_modified: DateTime<Utc>,
}

impl Article {
    pub fn is_published(&self) -> bool {
        self.approval_status == APPROVAL_COMPLETE && self.publish_status == ONLINE
    }
}

/// Access to a knowledge base.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Article versions last modified in `[since, until)`, any status.
    async fn modified_articles(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Article>>;

    async fn article(&self, article_id: &str) -> anyhow::Result<Option<Article>>;
}

static TAG_REGEX: OnceLock<Regex> = OnceLock::new();

fn tag_regex() -> &'static Regex {
    TAG_REGEX.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("TAG_REGEX is valid"))
}

/// Remove HTML tags and decode the common character references.
pub fn strip_tags(html: &str) -> String {
    tag_regex()
        .replace_all(html, "")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub struct KnowledgeBaseCorpus {
    source: Arc<dyn ArticleSource>,
    synth: Arc<ContentSynthesizer>,
    summaries: TimedCache<String, String>,
}

impl KnowledgeBaseCorpus {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        synth: Arc<ContentSynthesizer>,
        summaries: TimedCache<String, String>,
    ) -> Self {
        Self {
            source,
            synth,
            summaries,
        }
    }
}

#[async_trait]
impl Corpus for KnowledgeBaseCorpus {
    fn classification_example(&self) -> &str {
        "Give me operational steps to resolve certain issue"
    }

    async fn get_updates(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Record>> {
        let articles = self.source.modified_articles(since, until).await?;
        Ok(articles
            .into_iter()
            .filter(Article::is_published)
            .map(|a| {
                Record::new(
                    a.id,
                    a.summary,
                    metadata([(ARTICLE_ID, a.article_id), ("title", a.title)]),
                )
            })
            .collect())
    }

    async fn distill(&self, mut record: Record) -> Result<Record> {
        record.text = self
            .synth
            .complete(QUESTIONS_PROMPT, &[("summary", &record.text)])
            .await?;
        Ok(record)
    }

    async fn get_content(&self, metadata: &Metadata) -> Result<Content> {
        let article_id = metadata
            .get(ARTICLE_ID)
            .ok_or_else(|| Error::unknown("field", ARTICLE_ID))?;
        let article = self
            .source
            .article(article_id)
            .await?
            .ok_or_else(|| Error::unknown("article", article_id.as_str()))?;

        let solution = strip_tags(&article.solution);
        let summary = self
            .summaries
            .get_or_try_insert_with(solution.clone(), || async {
                self.synth
                    .complete(SUMMARY_PROMPT, &[("solution", &solution)])
                    .await
            })
            .await?;

        Ok(Content {
            metadata: crate::models::metadata([
                (ARTICLE_ID, article.article_id),
                ("title", article.title),
            ]),
            summary,
        })
    }

    fn render(&self, content: &Content) -> String {
        content.summary.clone()
    }
}
