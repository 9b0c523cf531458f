//! TOML configuration parsing and validation.
//!
//! Every validation failure is reported as [`Error::Config`]; nothing here
//! is retried.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    pub models: Vec<ModelConfig>,
    pub basic_model: ModelRef,
    #[serde(default)]
    pub memory: Option<MemoryConfig>,
    pub corpora: Vec<CorpusConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub watermark: WatermarkKind,
    #[serde(default = "default_watermark_path")]
    pub watermark_path: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            watermark: WatermarkKind::default(),
            watermark_path: default_watermark_path(),
        }
    }
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}
fn default_watermark_path() -> PathBuf {
    PathBuf::from("./metadata/update_time")
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkKind {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_cache_window_secs")]
    pub cache_window_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            cache_window_secs: default_cache_window_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_parallelism() -> usize {
    4
}
fn default_cache_window_secs() -> u64 {
    60 * 60
}
fn default_cache_capacity() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

/// Which capability a consumer wants from a named model.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Completion,
    Embedding,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Completion => "completion",
            Role::Embedding => "embedding",
        }
    }
}

/// A named model definition. `kind` selects the provider factory; the
/// remaining fields are provider parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_roles")]
    pub roles: Vec<Role>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ModelConfig {
    /// A config with provider defaults; handy for programmatic setups.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            model: None,
            url: None,
            api_key: None,
            token: None,
            hostname: None,
            dims: None,
            roles: default_roles(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

fn default_roles() -> Vec<Role> {
    vec![Role::Completion, Role::Embedding]
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    120
}

/// Reference from a consumer (router, memory, corpus) to named models.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelRef {
    #[serde(default)]
    pub llm: Option<String>,
    #[serde(default)]
    pub embeddings: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_max_buffer_chars")]
    pub max_buffer_chars: usize,
}

fn default_max_buffer_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub models: ModelRef,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Corpus type tokens with a built-in constructor.
pub const KNOWN_CORPUS_TYPES: &[&str] = &["salesforce", "knowledgebase"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| Error::config(format!("failed to parse config file: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.models.is_empty() {
        return Err(Error::config("at least one [[models]] entry is required"));
    }

    let mut names = HashSet::new();
    for model in &config.models {
        if !names.insert(model.name.as_str()) {
            return Err(Error::config(format!(
                "duplicated model name '{}'",
                model.name
            )));
        }
    }

    let check_ref = |owner: &str, r: &ModelRef| -> Result<()> {
        for name in [&r.llm, &r.embeddings].into_iter().flatten() {
            if !names.contains(name.as_str()) {
                return Err(Error::config(format!(
                    "{} references unknown model '{}'",
                    owner, name
                )));
            }
        }
        Ok(())
    };

    check_ref("basic_model", &config.basic_model)?;
    if config.basic_model.llm.is_none() {
        return Err(Error::config("basic_model.llm must be specified"));
    }

    if config.corpora.is_empty() {
        return Err(Error::config("at least one [[corpora]] entry is required"));
    }
    let mut kinds = HashSet::new();
    for corpus in &config.corpora {
        if !KNOWN_CORPUS_TYPES.contains(&corpus.kind.as_str()) {
            return Err(Error::config(format!(
                "unknown corpus type '{}'. Must be one of: {}",
                corpus.kind,
                KNOWN_CORPUS_TYPES.join(", ")
            )));
        }
        if !kinds.insert(corpus.kind.as_str()) {
            return Err(Error::config(format!(
                "duplicated corpus type '{}'",
                corpus.kind
            )));
        }
        let owner = format!("corpus '{}'", corpus.kind);
        check_ref(&owner, &corpus.models)?;
        if corpus.models.llm.is_none() || corpus.models.embeddings.is_none() {
            return Err(Error::config(format!(
                "{} must specify both llm and embeddings",
                owner
            )));
        }
    }

    if config.synthesis.parallelism == 0 {
        return Err(Error::config("synthesis.parallelism must be >= 1"));
    }
    if config.synthesis.cache_capacity == 0 {
        return Err(Error::config("synthesis.cache_capacity must be >= 1"));
    }
    if config.scheduler.interval_secs == 0 {
        return Err(Error::config("scheduler.interval_secs must be >= 1"));
    }
    if config.retrieval.top_k == 0 {
        return Err(Error::config("retrieval.top_k must be >= 1"));
    }

    Ok(())
}
