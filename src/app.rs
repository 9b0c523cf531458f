//! Wiring: one [`App`] per process, built from a [`Config`].
//!
//! Every component is constructed here exactly once and shared by
//! reference; nothing in the library reaches for global state.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::chain::AnswerChain;
use crate::config::{Config, WatermarkKind};
use crate::corpus::CorpusRegistry;
use crate::error::{Error, Result};
use crate::memory::{SessionMemory, SqliteChatHistory};
use crate::model_registry::ModelRegistry;
use crate::router::QueryRouter;
use crate::scheduler::IngestionScheduler;
use crate::vector_index::SqliteVectorIndex;
use crate::watermark::{FileWatermark, SqliteWatermark, WatermarkStore};

pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub models: Arc<ModelRegistry>,
    pub index: Arc<SqliteVectorIndex>,
    pub chain: Arc<AnswerChain>,
    pub scheduler: Arc<IngestionScheduler>,
}

impl App {
    /// Open the database, run migrations, and build every component. The
    /// scheduler is constructed but not started.
    pub async fn build(config: Config) -> Result<Self> {
        let pool = crate::db::connect(&config).await?;
        crate::migrate::run_migrations(&pool).await?;

        let models = Arc::new(ModelRegistry::new(config.models.clone())?);
        let corpora = CorpusRegistry::from_config(&config, &models).await?;
        let index = Arc::new(SqliteVectorIndex::new(pool.clone()));

        let basic_llm = config
            .basic_model
            .llm
            .as_deref()
            .ok_or_else(|| Error::config("basic_model.llm must be specified"))?;
        let llm = models.handle(basic_llm).await?.require_completion()?;

        let memory = config.memory.as_ref().map(|memory| {
            Arc::new(SessionMemory::new(
                llm.clone(),
                Arc::new(SqliteChatHistory::new(pool.clone())),
                memory.max_buffer_chars,
            ))
        });

        let router = QueryRouter::new(corpora.clone(), index.clone(), llm, config.retrieval.top_k);
        let chain = Arc::new(AnswerChain::new(router, memory));

        let watermark: Arc<dyn WatermarkStore> = match config.scheduler.watermark {
            WatermarkKind::File => Arc::new(FileWatermark::new(&config.scheduler.watermark_path)),
            WatermarkKind::Sqlite => Arc::new(SqliteWatermark::new(pool.clone())),
        };
        let scheduler = Arc::new(IngestionScheduler::new(
            corpora,
            index.clone(),
            watermark,
            Duration::from_secs(config.scheduler.interval_secs),
        ));

        tracing::info!(
            models = models.names().count(),
            corpora = ?chain.router().corpora().names(),
            memory = config.memory.is_some(),
            "support harness ready"
        );

        Ok(Self {
            config,
            pool,
            models,
            index,
            chain,
            scheduler,
        })
    }
}
