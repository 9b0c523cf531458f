//! Per-session conversational memory.
//!
//! Each session keeps a summary buffer: the persisted exchanges that still
//! fit in `max_buffer_chars` are replayed verbatim into the prompt, and
//! older ones are folded into a running summary by the completion model.
//!
//! Locking:
//! - the session map (create on first use, remove on clear) is guarded by
//!   one mutex, held only for the map operation itself;
//! - each session buffer has its own async mutex, held for the whole of
//!   [`SessionMemory::integrate`], so calls on the same session run one at
//!   a time while different sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::Exchange;
use crate::providers::CompletionModel;
use crate::synth::render_template;

const SYSTEM_PROMPT: &str = "You are a helpful chatbot";
const HUMAN_PROMPT: &str = "Based on the context: {context}, {query}";
const SUMMARIZE_PROMPT: &str = "Progressively summarize the lines of conversation provided, adding onto the previous summary returning a new summary.

Current summary:
{summary}

New lines of conversation:
{new_lines}

New summary:";

/// Durable per-session chat history.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    async fn append(&self, session: &str, input: &str, output: &str) -> anyhow::Result<()>;

    /// Every exchange of `session`, oldest first.
    async fn load(&self, session: &str) -> anyhow::Result<Vec<Exchange>>;

    async fn clear(&self, session: &str) -> anyhow::Result<()>;
}

pub struct SqliteChatHistory {
    pool: SqlitePool,
}

impl SqliteChatHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatHistory for SqliteChatHistory {
    async fn append(&self, session: &str, input: &str, output: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO chat_history (session, input, output, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session)
        .bind(input)
        .bind(output)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, session: &str) -> anyhow::Result<Vec<Exchange>> {
        let rows = sqlx::query("SELECT input, output FROM chat_history WHERE session = ? ORDER BY id")
            .bind(session)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| Exchange {
                input: row.get("input"),
                output: row.get("output"),
            })
            .collect())
    }

    async fn clear(&self, session: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM chat_history WHERE session = ?")
            .bind(session)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryChatHistory {
    sessions: std::sync::Mutex<HashMap<String, Vec<Exchange>>>,
}

impl InMemoryChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Exchange>>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl ChatHistory for InMemoryChatHistory {
    async fn append(&self, session: &str, input: &str, output: &str) -> anyhow::Result<()> {
        self.lock().entry(session.to_string()).or_default().push(Exchange {
            input: input.to_string(),
            output: output.to_string(),
        });
        Ok(())
    }

    async fn load(&self, session: &str) -> anyhow::Result<Vec<Exchange>> {
        Ok(self.lock().get(session).cloned().unwrap_or_default())
    }

    async fn clear(&self, session: &str) -> anyhow::Result<()> {
        self.lock().remove(session);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct BufferState {
    /// Running summary of exchanges no longer replayed verbatim.
    summary: String,
    /// How many of the oldest persisted exchanges `summary` covers.
    summarized: usize,
}

#[derive(Default)]
struct SessionBuffer {
    state: Mutex<BufferState>,
}

pub struct SessionMemory {
    llm: Arc<dyn CompletionModel>,
    history: Arc<dyn ChatHistory>,
    max_buffer_chars: usize,
    sessions: Mutex<HashMap<String, Arc<SessionBuffer>>>,
}

impl SessionMemory {
    pub fn new(
        llm: Arc<dyn CompletionModel>,
        history: Arc<dyn ChatHistory>,
        max_buffer_chars: usize,
    ) -> Self {
        Self {
            llm,
            history,
            max_buffer_chars,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Answer `query` grounded in `context` and the session's history, then
    /// record the exchange.
    pub async fn integrate(&self, session: &str, query: &str, context: &str) -> Result<String> {
        let buffer = self.buffer(session).await;
        let mut state = buffer.state.lock().await;

        let history = self.history.load(session).await?;
        // History shrank underneath us (cleared elsewhere); start over.
        if state.summarized > history.len() {
            *state = BufferState::default();
        }
        let recent = &history[state.summarized..];

        let prompt = self.compose(&state.summary, recent, query, context);
        let output = self.llm.complete(&prompt).await?;
        self.history.append(session, query, &output).await?;

        let mut history = history;
        history.push(Exchange {
            input: query.to_string(),
            output: output.clone(),
        });
        if let Err(e) = self.prune(&mut state, &history).await {
            tracing::warn!(session, error = %e, "failed to summarize session history");
        }

        Ok(output)
    }

    /// Wipe the persisted history of `session` and drop its buffer.
    pub async fn clear(&self, session: &str) -> Result<()> {
        // The map stays locked until the wipe is done, so no new buffer for
        // this session can start from the old history.
        let mut sessions = self.sessions.lock().await;
        let buffer = sessions.get(session).cloned();
        // Let an in-flight integrate on this session finish first.
        let _state = match &buffer {
            Some(buffer) => Some(buffer.state.lock().await),
            None => None,
        };
        self.history.clear(session).await?;
        sessions.remove(session);
        tracing::info!(session, "cleared session history");
        Ok(())
    }

    /// Whether `session` currently has an in-memory buffer.
    pub async fn has_session(&self, session: &str) -> bool {
        self.sessions.lock().await.contains_key(session)
    }

    async fn buffer(&self, session: &str) -> Arc<SessionBuffer> {
        self.sessions
            .lock()
            .await
            .entry(session.to_string())
            .or_default()
            .clone()
    }

    fn compose(&self, summary: &str, recent: &[Exchange], query: &str, context: &str) -> String {
        let mut prompt = format!("System: {}\n", SYSTEM_PROMPT);
        if !summary.is_empty() {
            prompt.push_str(&format!("System: {}\n", summary));
        }
        for exchange in recent {
            prompt.push_str(&format!("Human: {}\nAI: {}\n", exchange.input, exchange.output));
        }
        let human = render_template(HUMAN_PROMPT, &[("context", context), ("query", query)]);
        prompt.push_str(&format!("Human: {}", human));
        prompt
    }

    /// Fold the oldest verbatim exchanges into the summary until the rest
    /// fits in the buffer. The newest exchange is always kept verbatim.
    async fn prune(&self, state: &mut BufferState, history: &[Exchange]) -> Result<()> {
        let size = |e: &Exchange| e.input.len() + e.output.len();
        let mut buffered: usize = history[state.summarized..].iter().map(size).sum();

        let mut cut = state.summarized;
        while buffered > self.max_buffer_chars && cut + 1 < history.len() {
            buffered -= size(&history[cut]);
            cut += 1;
        }
        if cut == state.summarized {
            return Ok(());
        }

        let new_lines = history[state.summarized..cut]
            .iter()
            .map(|e| format!("Human: {}\nAI: {}", e.input, e.output))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = render_template(
            SUMMARIZE_PROMPT,
            &[("summary", &state.summary), ("new_lines", &new_lines)],
        );
        state.summary = self.llm.complete(&prompt).await?;
        state.summarized = cut;
        tracing::debug!(summarized = cut, "folded session history into summary");
        Ok(())
    }
}
