mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use support_harness::corpus::CorpusRegistry;
use support_harness::scheduler::{IngestionScheduler, SchedulerState, MAX_RECORD_ATTEMPTS};
use support_harness::vector_index::InMemoryVectorIndex;

use common::{case_corpus, embedder, single, MemoryWatermark, MockCaseSource, QuoteModel, ScriptedCorpus};

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn test_watermark_advances_to_pass_start() {
    let source = Arc::new(MockCaseSource::new());
    source.add("C-1", "disk full", &[]);
    let watermark = Arc::new(MemoryWatermark::new());
    let scheduler = IngestionScheduler::new(
        single("sf", case_corpus(source.clone(), Arc::new(QuoteModel::new()))),
        Arc::new(InMemoryVectorIndex::new()),
        watermark.clone(),
        HOUR,
    );

    let before = Utc::now();
    let first = scheduler.run_pass().await.unwrap();
    let after = Utc::now();

    let stored = watermark.get().unwrap();
    assert_eq!(first.watermark, Some(stored));
    assert!(stored >= before && stored <= after);
    assert_eq!(first.indexed, 1);

    let second = scheduler.run_pass().await.unwrap();
    assert_eq!(second.since, Some(stored));
    assert_eq!(second.indexed, 0, "already-ingested case pulled again");

    let windows = source.windows();
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0].0, None);
    assert_eq!(windows[1].0, Some(stored));
    let lookahead = windows[1].1 - stored;
    assert!(lookahead >= chrono::TimeDelta::days(1));
    assert!(lookahead < chrono::TimeDelta::days(1) + chrono::TimeDelta::minutes(1));
    assert!(watermark.get().unwrap() >= stored);
}

#[tokio::test]
async fn test_record_failure_is_isolated_and_holds_watermark() {
    let corpus = Arc::new(ScriptedCorpus::new(3).poison("R-1"));
    let index = Arc::new(InMemoryVectorIndex::new());
    let watermark = Arc::new(MemoryWatermark::new());
    let scheduler = IngestionScheduler::new(
        single("scripted", corpus.clone()),
        index.clone(),
        watermark.clone(),
        HOUR,
    );

    let report = scheduler.run_pass().await.unwrap();
    assert_eq!(report.indexed, 2);
    assert_eq!(report.failed, 1);
    assert!(!report.cancelled);
    assert!(report.watermark.is_none());
    assert_eq!(watermark.writes(), 0);
    assert_eq!(index.len("scripted"), 2);

    // The same window is pulled again, but only the failed record is retried.
    let retry = scheduler.run_pass().await.unwrap();
    assert_eq!(retry.since, None);
    assert_eq!(retry.skipped, 2);
    assert_eq!(retry.indexed, 0);
    assert_eq!(retry.failed, 1);
    assert_eq!(index.len("scripted"), 2);
}

#[tokio::test]
async fn test_persistently_failing_record_is_abandoned() {
    let corpus = Arc::new(ScriptedCorpus::new(3).poison("R-1"));
    let index = Arc::new(InMemoryVectorIndex::new());
    let watermark = Arc::new(MemoryWatermark::new());
    let scheduler = IngestionScheduler::new(
        single("scripted", corpus.clone()),
        index.clone(),
        watermark.clone(),
        HOUR,
    );

    let mut reports = Vec::new();
    for _ in 0..5 {
        reports.push(scheduler.run_pass().await.unwrap());
    }

    let last_attempt = &reports[MAX_RECORD_ATTEMPTS as usize - 1];
    assert_eq!(last_attempt.abandoned, 1);
    assert_eq!(last_attempt.failed, 0);
    assert!(last_attempt.watermark.is_some());
    assert!(reports[..MAX_RECORD_ATTEMPTS as usize - 1]
        .iter()
        .all(|r| r.watermark.is_none()));

    assert_eq!(index.len("scripted"), 2, "index grew across retried windows");
    assert_eq!(corpus.distilled(), 2);
    assert!(watermark.get().is_some());
}

#[tokio::test]
async fn test_corpus_failure_does_not_stop_other_corpora() {
    let failing = Arc::new(MockCaseSource::new());
    failing.fail_updates(true);
    let healthy = Arc::new(ScriptedCorpus::new(2));

    let mut corpora = CorpusRegistry::new();
    corpora
        .register("sf", case_corpus(failing, Arc::new(QuoteModel::new())), embedder())
        .unwrap();
    corpora.register("scripted", healthy.clone(), embedder()).unwrap();

    let watermark = Arc::new(MemoryWatermark::new());
    let scheduler = IngestionScheduler::new(
        corpora,
        Arc::new(InMemoryVectorIndex::new()),
        watermark.clone(),
        HOUR,
    );
    let report = scheduler.run_pass().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.indexed, 2);
    assert_eq!(healthy.distilled(), 2);
    assert!(watermark.get().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_worker_runs_immediately_then_on_every_tick() {
    let scheduler = IngestionScheduler::new(
        single("scripted", Arc::new(ScriptedCorpus::new(1))),
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(MemoryWatermark::new()),
        Duration::from_secs(60),
    );
    let started = tokio::time::Instant::now();
    let mut status = scheduler.subscribe();
    scheduler.start();
    scheduler.start();

    status.wait_for(|s| s.passes >= 1).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(60));

    status.wait_for(|s| s.passes >= 3).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(120));
    assert_eq!(scheduler.status().passes, 3);

    scheduler.cancel().await;
    assert_eq!(scheduler.status().state, SchedulerState::Cancelled);
}

#[tokio::test]
async fn test_trigger_wakes_the_worker() {
    let corpus = Arc::new(ScriptedCorpus::new(1));
    let scheduler = IngestionScheduler::new(
        single("scripted", corpus.clone()),
        Arc::new(InMemoryVectorIndex::new()),
        Arc::new(MemoryWatermark::new()),
        HOUR,
    );
    let mut status = scheduler.subscribe();
    scheduler.start();
    status.wait_for(|s| s.passes >= 1).await.unwrap();

    scheduler.trigger();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.passes >= 2))
        .await
        .expect("trigger did not wake the worker")
        .unwrap();
    // The second pass starts from the watermark the first one wrote.
    assert_eq!(corpus.distilled(), 1);

    scheduler.cancel().await;
    scheduler.cancel().await;
}

#[tokio::test]
async fn test_cancel_stops_between_records_without_advancing_watermark() {
    let corpus = Arc::new(ScriptedCorpus::new(1000).slow(Duration::from_millis(5)));
    let watermark = Arc::new(MemoryWatermark::new());
    let scheduler = IngestionScheduler::new(
        single("scripted", corpus.clone()),
        Arc::new(InMemoryVectorIndex::new()),
        watermark.clone(),
        HOUR,
    );
    let mut status = scheduler.subscribe();
    scheduler.start();
    status
        .wait_for(|s| s.state == SchedulerState::Running)
        .await
        .unwrap();
    while corpus.distilled() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    tokio::time::timeout(Duration::from_secs(5), scheduler.cancel())
        .await
        .expect("cancel did not join the worker");

    let distilled = corpus.distilled();
    assert!(distilled > 0 && distilled < 1000);
    assert_eq!(watermark.writes(), 0);

    let status = scheduler.status();
    assert_eq!(status.state, SchedulerState::Cancelled);
    let last = status.last_report.unwrap();
    assert!(last.cancelled);
    assert!(last.watermark.is_none());

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(corpus.distilled(), distilled, "restarted after cancel");
}
