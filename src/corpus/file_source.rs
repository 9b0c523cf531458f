//! File-backed case and article source.
//!
//! Reads a JSON export of the form
//!
//! ```json
//! {
//!   "cases":    [{ "case_number": "C-1", "description": "...", "last_modified": "2024-05-01T00:00:00Z",
//!                  "comments": [{ "author": "Ann", "body": "...", "published": true }] }],
//!   "articles": [{ "id": "ka01", "article_id": "A-1", "summary": "...", "solution": "<p>...</p>",
//!                  "approval_status": "Approval Complete", "publish_status": "Online",
//!                  "last_modified": "2024-05-01T00:00:00Z" }]
//! }
//! ```
//!
//! The file is re-read on every call, so edits are picked up by the next
//! ingestion pass. A missing file reads as empty.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::case::{Case, CaseComment, CaseSource};
use super::kb::{Article, ArticleSource};

#[derive(Debug, Default, Deserialize)]
struct Export {
    #[serde(default)]
    cases: Vec<Case>,
    #[serde(default)]
    articles: Vec<Article>,
}

pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn load(&self) -> Result<Export> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "source file not found, treating as empty");
                return Ok(Export::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }
}

fn in_window(ts: DateTime<Utc>, since: Option<DateTime<Utc>>, until: DateTime<Utc>) -> bool {
    since.map_or(true, |s| ts >= s) && ts < until
}

#[async_trait]
impl CaseSource for JsonFileSource {
    async fn modified_cases(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Case>> {
        let mut cases: Vec<Case> = self
            .load()
            .await?
            .cases
            .into_iter()
            .filter(|c| in_window(c.last_modified, since, until))
            .collect();
        cases.sort_by(|a, b| a.last_modified.cmp(&b.last_modified));
        Ok(cases)
    }

    async fn case(&self, case_number: &str) -> Result<Option<Case>> {
        Ok(self
            .load()
            .await?
            .cases
            .into_iter()
            .find(|c| c.case_number == case_number))
    }

    async fn published_comments(&self, case_number: &str) -> Result<Vec<CaseComment>> {
        Ok(self
            .case(case_number)
            .await?
            .map(|c| c.comments.into_iter().filter(|c| c.published).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ArticleSource for JsonFileSource {
    async fn modified_articles(
        &self,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let mut articles: Vec<Article> = self
            .load()
            .await?
            .articles
            .into_iter()
            .filter(|a| in_window(a.last_modified, since, until))
            .collect();
        articles.sort_by(|a, b| a.last_modified.cmp(&b.last_modified));
        Ok(articles)
    }

    async fn article(&self, article_id: &str) -> Result<Option<Article>> {
        Ok(self
            .load()
            .await?
            .articles
            .into_iter()
            .rev()
            .find(|a| a.article_id == article_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const EXPORT: &str = r#"{
        "cases": [
            {"case_number": "C-2", "subject": "late", "description": "kernel panic",
             "last_modified": "2024-05-03T00:00:00Z"},
            {"case_number": "C-1", "subject": "early", "description": "disk full",
             "last_modified": "2024-05-01T00:00:00Z",
             "comments": [
                {"author": "Ann", "body": "looking"},
                {"author": "Bob", "body": "internal note", "published": false},
                {"author": "Ann", "body": "fixed"}
             ]}
        ],
        "articles": [
            {"id": "ka01", "article_id": "A-1", "solution": "old",
             "last_modified": "2024-05-01T00:00:00Z"},
            {"id": "ka02", "article_id": "A-1", "solution": "new",
             "last_modified": "2024-05-02T00:00:00Z"}
        ]
    }"#;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap()
    }

    fn source() -> (TempDir, JsonFileSource) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("export.json");
        std::fs::write(&path, EXPORT).unwrap();
        (tmp, JsonFileSource::new(path))
    }

    #[tokio::test]
    async fn test_window_is_half_open_and_sorted() {
        let (_tmp, source) = source();
        let all = source.modified_cases(None, day(10)).await.unwrap();
        assert_eq!(
            all.iter().map(|c| c.case_number.as_str()).collect::<Vec<_>>(),
            vec!["C-1", "C-2"]
        );

        let window = source.modified_cases(Some(day(1)), day(3)).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].case_number, "C-1");
    }

    #[tokio::test]
    async fn test_published_comments_in_order() {
        let (_tmp, source) = source();
        let comments = source.published_comments("C-1").await.unwrap();
        let bodies: Vec<_> = comments.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(bodies, vec!["looking", "fixed"]);
        assert!(source.published_comments("C-9").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_article_lookup_prefers_latest_version() {
        let (_tmp, source) = source();
        let article = source.article("A-1").await.unwrap().unwrap();
        assert_eq!(article.solution, "new");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let source = JsonFileSource::new("/nonexistent/export.json");
        assert!(source.modified_cases(None, Utc::now()).await.unwrap().is_empty());
        assert!(source.case("C-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let source = JsonFileSource::new(path);
        assert!(source.modified_articles(None, Utc::now()).await.is_err());
    }
}
