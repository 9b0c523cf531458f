//! Error taxonomy shared by the library.
//!
//! Collaborators (models, corpora, history stores) report failures as
//! [`anyhow::Error`]; those are folded into [`Error::Upstream`] at the seam
//! so callers can tell a bad request apart from a broken dependency.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing, duplicated, or unknown configuration. Fatal at construction.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller named a corpus, session, action, or record that does not exist.
    #[error("unknown {kind}: '{name}'")]
    UnknownEntity { kind: &'static str, name: String },

    /// The corpus exists but holds no indexed record to match against.
    #[error("no indexed record in corpus '{corpus}'")]
    NoMatch { corpus: String },

    /// A corpus source or model capability failed.
    #[error("upstream failure: {0:#}")]
    Upstream(#[from] anyhow::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownEntity {
            kind,
            name: name.into(),
        }
    }

    /// Whether the failure was caused by the request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::UnknownEntity { .. } | Self::NoMatch { .. })
    }
}
