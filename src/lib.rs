//! # Support Harness
//!
//! A retrieval-backed support assistant. Records from case trackers and
//! knowledge bases are pulled incrementally, distilled by an LLM, embedded,
//! and indexed; questions are routed to a corpus, matched by similarity,
//! and answered from a synthesized summary of the matched record, optionally
//! grounded in a per-session conversational memory.
//!
//! ## Architecture
//!
//! ```text
//!                 write path                               read path
//!  ┌─────────────────────┐                      ┌──────────────┐
//!  │ IngestionScheduler  │                      │ AnswerChain  │◀── CLI / HTTP
//!  └──────────┬──────────┘                      └──────┬───────┘
//!             ▼                                        ▼
//!  ┌─────────────────────┐   ┌─────────────┐   ┌──────────────┐
//!  │ Corpus::distill     │──▶│ VectorIndex │◀──│ QueryRouter  │
//!  │ (ContentSynthesizer)│   │  (SQLite)   │   └──────┬───────┘
//!  └─────────────────────┘   └─────────────┘          ▼
//!                                           Corpus::get_content ─▶ SessionMemory
//!
//!        ModelRegistry, TimedCache, ParallelExecutor: shared by both paths
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Library error type |
//! | [`models`] | Records, content, search hits |
//! | [`providers`] | Completion/embedding capabilities and the built-in factory |
//! | [`model_registry`] | Named, lazily created, shared models |
//! | [`vector_index`] | Per-corpus nearest-neighbor store |
//! | [`cache`] | Whole-window memoization |
//! | [`parallel`] | Bounded, order-preserving fan-out |
//! | [`chunk`] | Character chunking with overlap |
//! | [`synth`] | Map-reduce and refine synthesis, case pipeline |
//! | [`corpus`] | Case and knowledge-base corpora |
//! | [`memory`] | Per-session conversational memory |
//! | [`watermark`] | Durable ingestion watermark |
//! | [`scheduler`] | Background incremental ingestion |
//! | [`router`] | Query classification and retrieval |
//! | [`chain`] | The ask / action / clear-history façade |
//! | [`app`] | Wiring from configuration |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | `tracing` subscriber setup |

pub mod app;
pub mod cache;
pub mod chain;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod db;
pub mod error;
pub mod logging;
pub mod memory;
pub mod migrate;
pub mod model_registry;
pub mod models;
pub mod parallel;
pub mod providers;
pub mod router;
pub mod scheduler;
pub mod server;
pub mod synth;
pub mod vector_index;
pub mod watermark;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
