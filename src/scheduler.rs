//! Background incremental ingestion.
//!
//! [`IngestionScheduler`] owns one worker task. The worker runs a pass as
//! soon as it starts, then waits for whichever comes first:
//!
//! ```text
//!            ┌──────── interval tick ────────┐
//!   Idle ────┼──────── trigger() ────────────┼──▶ Running ──▶ Idle
//!            └──────── cancel() ─────────────┴──▶ Cancelled
//! ```
//!
//! A pass reads the watermark, pulls every corpus's updates in
//! `[watermark, now + 1 day)`, distills and indexes each record, and on
//! clean completion stores the pass start time as the new watermark.
//!
//! Failure policy: a failing record or corpus is logged and counted, and
//! the pass moves on. The watermark only advances when the pass finished
//! with no failures and was not cancelled, so a failed window is pulled
//! again next time. While a window is being retried, records already
//! indexed from it are skipped, and a record that fails
//! [`MAX_RECORD_ATTEMPTS`] passes in a row is abandoned so it no longer
//! holds the watermark back. This ledger lives as long as the scheduler.
//! Cancellation is checked between records.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::corpus::{CorpusEntry, CorpusRegistry};
use crate::error::Result;
use crate::models::Record;
use crate::vector_index::VectorIndex;
use crate::watermark::WatermarkStore;

/// How far past "now" each pass looks, so records stamped slightly ahead
/// of the local clock are not missed.
const LOOKAHEAD_DAYS: i64 = 1;

/// Passes a record may fail before it is abandoned.
pub const MAX_RECORD_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub indexed: usize,
    pub failed: usize,
    /// Records already indexed by an earlier attempt at the same window.
    pub skipped: usize,
    /// Records given up on after [`MAX_RECORD_ATTEMPTS`] failed passes.
    pub abandoned: usize,
    pub cancelled: bool,
    /// The watermark written by this pass, if it advanced.
    pub watermark: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub passes: u64,
    pub last_report: Option<PassReport>,
}

struct Inner {
    corpora: CorpusRegistry,
    index: Arc<dyn VectorIndex>,
    watermark: Arc<dyn WatermarkStore>,
    interval: Duration,
    cancel: watch::Sender<bool>,
    wake: Notify,
    status: watch::Sender<SchedulerStatus>,
    /// Serializes passes between the worker and direct `run_pass` callers,
    /// and guards the retry ledger they share.
    pass_lock: Mutex<RetryLedger>,
}

type RecordKey = (String, String);

/// What earlier attempts at the current window achieved.
#[derive(Default)]
struct RetryLedger {
    window: Option<DateTime<Utc>>,
    indexed: HashSet<RecordKey>,
    attempts: HashMap<RecordKey, u32>,
}

impl RetryLedger {
    /// Forget everything unless `since` is the window already on record.
    fn enter(&mut self, since: Option<DateTime<Utc>>) {
        if self.window != since {
            *self = RetryLedger {
                window: since,
                ..RetryLedger::default()
            };
        }
    }
}

pub struct IngestionScheduler {
    inner: Arc<Inner>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl IngestionScheduler {
    pub fn new(
        corpora: CorpusRegistry,
        index: Arc<dyn VectorIndex>,
        watermark: Arc<dyn WatermarkStore>,
        interval: Duration,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        let (status, _) = watch::channel(SchedulerStatus {
            state: SchedulerState::Idle,
            passes: 0,
            last_report: None,
        });
        Self {
            inner: Arc::new(Inner {
                corpora,
                index,
                watermark,
                interval,
                cancel,
                wake: Notify::new(),
                status,
                pass_lock: Mutex::new(RetryLedger::default()),
            }),
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Spawn the worker. Calling it again, or after [`cancel`](Self::cancel), does nothing.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker.is_some() || self.inner.is_cancelled() {
            return;
        }
        tracing::info!(interval_secs = self.inner.interval.as_secs(), "starting ingestion scheduler");
        *worker = Some(tokio::spawn(run(self.inner.clone())));
    }

    /// Wake the worker for an immediate pass. A trigger that arrives while
    /// a pass is running schedules one more pass after it.
    pub fn trigger(&self) {
        self.inner.wake.notify_one();
    }

    /// Stop the worker and wait for it to exit. Idempotent; safe before `start`.
    pub async fn cancel(&self) {
        self.inner.cancel.send_replace(true);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "ingestion worker panicked");
            }
        }
        self.inner
            .status
            .send_modify(|s| s.state = SchedulerState::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Run one pass on the caller's task.
    pub async fn run_pass(&self) -> Result<PassReport> {
        self.inner.pass().await
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.inner.status.subscribe()
    }
}

impl Drop for IngestionScheduler {
    fn drop(&mut self) {
        self.inner.cancel.send_replace(true);
    }
}

async fn run(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + inner.interval, inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cancel = inner.cancel.subscribe();

    loop {
        if let Err(e) = inner.pass().await {
            tracing::error!(error = %e, "ingestion pass failed");
        }

        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            _ = inner.wake.notified() => tracing::debug!("ingestion triggered"),
            _ = ticker.tick() => tracing::debug!("ingestion timer fired"),
        }
    }

    tracing::info!("ingestion scheduler stopped");
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        let set = *cancel.borrow_and_update();
        if set || cancel.changed().await.is_err() {
            return;
        }
    }
}

impl Inner {
    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    async fn pass(&self) -> Result<PassReport> {
        let mut ledger = self.pass_lock.lock().await;
        if self.is_cancelled() {
            return Ok(PassReport {
                cancelled: true,
                ..PassReport::default()
            });
        }

        self.status.send_modify(|s| s.state = SchedulerState::Running);
        let result = self.ingest(&mut ledger).await;
        self.status.send_modify(|s| {
            if s.state == SchedulerState::Running {
                s.state = SchedulerState::Idle;
            }
            s.passes += 1;
            if let Ok(report) = &result {
                s.last_report = Some(report.clone());
            }
        });
        result
    }

    async fn ingest(&self, ledger: &mut RetryLedger) -> Result<PassReport> {
        let started = Utc::now();
        let since = self.watermark.read().await?;
        ledger.enter(since);
        let until = started + TimeDelta::days(LOOKAHEAD_DAYS);
        let mut report = PassReport {
            since,
            until: Some(until),
            ..PassReport::default()
        };
        tracing::info!(?since, %until, corpora = self.corpora.len(), "ingestion pass started");

        'corpora: for entry in self.corpora.entries() {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let records = match entry.corpus.get_updates(since, until).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(corpus = %entry.name, error = %e, "failed to pull updates");
                    report.failed += 1;
                    continue;
                }
            };
            tracing::info!(corpus = %entry.name, records = records.len(), "pulled updates");

            for record in records {
                if self.is_cancelled() {
                    report.cancelled = true;
                    break 'corpora;
                }
                let key = (entry.name.clone(), record.id.clone());
                if ledger.indexed.contains(&key) {
                    report.skipped += 1;
                    continue;
                }
                match self.ingest_record(entry, record).await {
                    Ok(()) => {
                        report.indexed += 1;
                        ledger.attempts.remove(&key);
                        ledger.indexed.insert(key);
                    }
                    Err(e) => {
                        let attempts = ledger.attempts.entry(key.clone()).or_insert(0);
                        *attempts += 1;
                        if *attempts >= MAX_RECORD_ATTEMPTS {
                            tracing::warn!(
                                corpus = %entry.name,
                                record = %key.1,
                                attempts = *attempts,
                                error = %e,
                                "abandoning record"
                            );
                            report.abandoned += 1;
                        } else {
                            tracing::warn!(corpus = %entry.name, record = %key.1, error = %e, "failed to ingest record");
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        if report.cancelled {
            tracing::info!(indexed = report.indexed, "ingestion pass cancelled");
        } else if report.failed > 0 {
            tracing::warn!(
                indexed = report.indexed,
                failed = report.failed,
                "ingestion pass finished with failures; watermark not advanced"
            );
        } else {
            self.watermark.write(started).await?;
            report.watermark = Some(started);
            tracing::info!(
                indexed = report.indexed,
                skipped = report.skipped,
                abandoned = report.abandoned,
                watermark = %started,
                "ingestion pass finished"
            );
        }

        Ok(report)
    }

    async fn ingest_record(&self, entry: &CorpusEntry, record: Record) -> Result<()> {
        let distilled = entry.corpus.distill(record).await?;
        self.index
            .put(&entry.name, entry.embedder.as_ref(), &distilled)
            .await
    }
}
