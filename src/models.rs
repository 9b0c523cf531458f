//! Core data models used throughout the harness.
//!
//! These types represent the records, synthesized content, and search hits
//! that flow through the ingestion and answer pipelines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// String metadata attached to records and content. Ordered so that
/// serialized rows and rendered output are deterministic.
pub type Metadata = BTreeMap<String, String>;

/// A unit produced by a corpus during ingestion and written to the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub text: String,
    pub metadata: Metadata,
    pub id: String,
}

impl Record {
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
            id: id.into(),
        }
    }
}

/// The user-facing distillation of a matched record, built at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Content {
    pub metadata: Metadata,
    pub summary: String,
}

/// A nearest-neighbor match returned from the vector index.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// One question/answer pair in a session's persisted history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

/// Build a [`Metadata`] map from string pairs.
pub fn metadata<I, K, V>(pairs: I) -> Metadata
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
