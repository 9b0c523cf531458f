//! # Support Harness CLI (`support-harness`)
//!
//! ## Usage
//!
//! ```bash
//! support-harness --config ./config/support.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Create the SQLite database and run schema migrations |
//! | `sync` | Run one ingestion pass and print its report |
//! | `ask "<query>"` | Answer a query from the indexed corpora |
//! | `chat` | Answer questions read from stdin within one session |
//! | `clear-history <session>` | Forget a session's conversation |
//! | `serve` | Run the ingestion scheduler and the HTTP server |

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use support_harness::app::App;
use support_harness::chain::AnswerChain;
use support_harness::{config, db, logging, migrate, server};

/// Support Harness: a retrieval-backed support assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/support.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "support-harness", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/support.toml")]
    config: PathBuf,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (vectors, chat_history, checkpoints). Idempotent.
    Init,

    /// Run one ingestion pass over every configured corpus.
    ///
    /// Pulls records modified since the stored watermark, distills and
    /// embeds them, and advances the watermark when nothing failed.
    Sync,

    /// Answer a query.
    Ask {
        /// The question.
        query: String,

        /// Corpus to search; skips classification.
        #[arg(long)]
        corpus: Option<String>,

        /// Session id for conversational memory.
        #[arg(long)]
        session: Option<String>,
    },

    /// Answer questions from stdin until EOF or `exit`/`quit`/`q`/`e`/`x`.
    ///
    /// Every question goes through the same session, so with memory
    /// configured follow-ups are grounded in the earlier turns. A failed
    /// question is reported and the loop goes on.
    Chat {
        /// Corpus to search; skips classification.
        #[arg(long)]
        corpus: Option<String>,

        /// Session id to continue; a fresh one is generated by default.
        #[arg(long)]
        session: Option<String>,
    },

    /// Forget the conversation of a session.
    ClearHistory {
        session: String,
    },

    /// Run the ingestion scheduler and serve the HTTP API until Ctrl-C.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Sync => {
            let app = App::build(cfg).await?;
            let report = app.scheduler.run_pass().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Ask {
            query,
            corpus,
            session,
        } => {
            let app = App::build(cfg).await?;
            let mut chunks = app
                .chain
                .ask(&query, corpus.as_deref(), session.as_deref())
                .await?;
            let mut stdout = std::io::stdout().lock();
            while let Some(chunk) = chunks.next().await {
                stdout.write_all(chunk.as_bytes())?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
        Commands::Chat { corpus, session } => {
            let app = App::build(cfg).await?;
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            chat(&app.chain, corpus.as_deref(), &session).await?;
        }
        Commands::ClearHistory { session } => {
            let app = App::build(cfg).await?;
            app.chain.clear_history(&session).await?;
            println!("Cleared history for session '{}'.", session);
        }
        Commands::Serve => {
            let app = App::build(cfg).await?;
            app.scheduler.start();

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for Ctrl-C");
                }
                tracing::info!("shutting down");
            };
            let served = server::run_server(&app, shutdown)
                .await
                .context("HTTP server failed");

            app.scheduler.cancel().await;
            served?;
        }
    }

    Ok(())
}

const EXIT_WORDS: &[&str] = &["exit", "quit", "q", "e", "x"];

async fn chat(chain: &AnswerChain, corpus: Option<&str>, session: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    writeln!(stdout, "Session: {}", session)?;

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&query.to_lowercase().as_str()) {
            break;
        }

        match chain.ask(query, corpus, Some(session)).await {
            Ok(mut chunks) => {
                while let Some(chunk) = chunks.next().await {
                    stdout.write_all(chunk.as_bytes())?;
                    stdout.flush()?;
                }
                writeln!(stdout)?;
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    writeln!(stdout)?;
    Ok(())
}
