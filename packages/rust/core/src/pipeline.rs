//! End-to-end harvest pipeline: detect → fetch/segment/persist → bundle.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use docharvest_bundler::{AggregateReport, aggregate, aggregate_into};
use docharvest_crawler::{DOCUMENTS_PREFIX, Fetcher};
use docharvest_discovery::detect_changes;
use docharvest_shared::{ChangeRecord, FetchResult, HarvestError, Result, RunReport};
use docharvest_storage::{BlobStore, BundleEntry, FsBlobStore, Storage};

use crate::backend::Backend;
use crate::context::RunContext;

/// Store prefix bundles are written under.
pub const BUNDLES_PREFIX: &str = "bundles";

/// Progress callback for the pipeline.
pub trait ProgressReporter: Send + Sync {
    /// Called when a new phase starts.
    fn phase(&self, name: &str);
    /// Called once the work list for the run is known.
    fn changes_detected(&self, count: usize);
    /// Called from a worker each time an item finishes.
    fn item_finished(&self, result: &FetchResult);
    /// Called once when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn changes_detected(&self, _count: usize) {}
    fn item_finished(&self, _result: &FetchResult) {}
    fn done(&self, _report: &RunReport) {}
}

/// Run the full pipeline against `backend`, bundling into `store`.
///
/// Only a failed change query (or invalid configuration) is an error; item
/// failures and unreadable bundle members end up in the report.
#[instrument(skip_all, fields(run_id = %ctx.run_id, source = %backend.source.kind()))]
pub async fn run_pipeline(
    ctx: &mut RunContext,
    backend: &Backend,
    store: &dyn BlobStore,
    ledger: &Storage,
    progress: Arc<dyn ProgressReporter>,
) -> Result<RunReport> {
    ctx.config.validate()?;
    let started = Instant::now();
    ledger
        .insert_run(&ctx.run_id, backend.source.kind(), ctx.started_at)
        .await?;

    // --- Phase 1: Change detection ---
    progress.phase("Detecting changes");
    let changes = match detect_changes(
        backend.source.as_ref(),
        ctx.config.window_days,
        ctx.config.limit,
    )
    .await
    {
        Ok(changes) => changes,
        Err(e) => {
            ctx.warn(format!("change detection failed: {e}"));
            let report = ctx.empty_report();
            close_run(ledger, &report, progress.as_ref()).await;
            return Err(e);
        }
    };
    progress.changes_detected(changes.len());

    if changes.is_empty() {
        info!("no changes in window, nothing to do");
        let report = ctx.empty_report();
        close_run(ledger, &report, progress.as_ref()).await;
        return Ok(report);
    }

    // --- Phase 2 & 3: Fetch and bundle ---
    let report = harvest(ctx, backend, changes, store, ledger, &progress).await?;
    close_run(ledger, &report, progress.as_ref()).await;

    info!(
        items_detected = report.items_detected,
        items_fetched = report.items_fetched,
        items_failed = report.items_failed,
        sections_produced = report.sections_produced,
        bundles_written = report.bundles_written,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "pipeline complete"
    );
    Ok(report)
}

/// Re-run the items that failed in `previous_run` as a new run.
///
/// The change query is not repeated; the work list is read from the ledger.
#[instrument(skip_all, fields(run_id = %ctx.run_id, previous_run = %previous_run))]
pub async fn retry_failed(
    ctx: &mut RunContext,
    previous_run: &str,
    backend: &Backend,
    store: &dyn BlobStore,
    ledger: &Storage,
    progress: Arc<dyn ProgressReporter>,
) -> Result<RunReport> {
    ctx.config.validate()?;

    let kind = ledger
        .run_source(previous_run)
        .await?
        .ok_or_else(|| HarvestError::validation(format!("unknown run: {previous_run}")))?;
    if kind != backend.source.kind() {
        return Err(HarvestError::validation(format!(
            "run {previous_run} used source {kind}, backend is {}",
            backend.source.kind()
        )));
    }

    progress.phase("Loading failed items");
    let items = ledger.failed_items(previous_run).await?;
    ledger.insert_run(&ctx.run_id, kind, ctx.started_at).await?;
    progress.changes_detected(items.len());

    if items.is_empty() {
        info!("previous run has no failed items");
        let report = ctx.empty_report();
        close_run(ledger, &report, progress.as_ref()).await;
        return Ok(report);
    }

    info!(items = items.len(), "retrying failed items");
    let report = harvest(ctx, backend, items, store, ledger, &progress).await?;
    close_run(ledger, &report, progress.as_ref()).await;
    Ok(report)
}

/// Bundle every document record in `dir`.
///
/// Bundles go to the root of `out` when given, else to `<dir>/bundles`, so a
/// second run over the same `dir` reads the same members as the first.
pub async fn group_directory(
    dir: &Path,
    out: Option<&Path>,
    separator: char,
) -> Result<AggregateReport> {
    if !dir.is_dir() {
        return Err(HarvestError::validation(format!(
            "not a directory: {}",
            dir.display()
        )));
    }
    let source = FsBlobStore::new(dir);
    let (dest, dest_prefix) = match out {
        Some(out) => (FsBlobStore::new(out), ""),
        None => (FsBlobStore::new(dir), BUNDLES_PREFIX),
    };
    aggregate_into(&source, "", &dest, dest_prefix, separator, Utc::now()).await
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Fetch `items`, record each outcome, then bundle.
async fn harvest(
    ctx: &mut RunContext,
    backend: &Backend,
    items: Vec<ChangeRecord>,
    store: &dyn BlobStore,
    ledger: &Storage,
    progress: &Arc<dyn ProgressReporter>,
) -> Result<RunReport> {
    let mut report = RunReport {
        items_detected: items.len(),
        ..ctx.empty_report()
    };

    // --- Phase 2: Concurrent fetch ---
    progress.phase("Fetching");
    let observer = progress.clone();
    let fetcher = Fetcher::new(ctx.config.concurrency, ctx.config.item_timeout)?
        .with_cancel(ctx.cancel.clone())
        .with_observer(Arc::new(move |result: &FetchResult| {
            observer.item_finished(result)
        }));

    let by_id: HashMap<String, ChangeRecord> = items
        .iter()
        .map(|item| (item.id.clone(), item.clone()))
        .collect();
    let fetched = fetcher.fetch_all(items, backend.processor.clone()).await;

    report.items_fetched = fetched.succeeded();
    report.items_failed = fetched.failed();
    report.sections_produced = fetched.sections();
    info!(
        items_fetched = report.items_fetched,
        items_failed = report.items_failed,
        "fetch stage complete"
    );

    for result in &fetched.results {
        let Some(item) = by_id.get(&result.id) else {
            continue;
        };
        if let Err(e) = ledger.record_item(&ctx.run_id, item, result).await {
            ctx.warn(format!("could not record {}: {e}", result.id));
        }
    }
    if ctx.cancel.is_cancelled() {
        ctx.warn("run cancelled before all items started");
    }

    // --- Phase 3: Aggregation ---
    if ctx.config.skip_bundling {
        debug!("bundling disabled");
    } else if report.items_fetched == 0 {
        info!("no documents fetched, bundling skipped");
    } else {
        progress.phase("Bundling");
        let now = Utc::now();
        match aggregate(store, DOCUMENTS_PREFIX, BUNDLES_PREFIX, ctx.config.separator, now).await {
            Ok(aggregated) => {
                report.bundles_written = aggregated.written.len();
                report.members_skipped = aggregated.members_skipped;
                for warning in &aggregated.warnings {
                    ctx.warn(warning.clone());
                }
                record_bundles(ctx, ledger, &aggregated, now).await;
            }
            Err(e) => ctx.warn(format!("bundling failed: {e}")),
        }
    }

    report.finished_at = Some(Utc::now());
    report.warnings = ctx.warnings().to_vec();
    Ok(report)
}

// ---------------------------------------------------------------------------
// Ledger helpers
// ---------------------------------------------------------------------------

async fn record_bundles(
    ctx: &mut RunContext,
    ledger: &Storage,
    aggregated: &AggregateReport,
    created_at: DateTime<Utc>,
) {
    let run_id = ctx.run_id.to_string();
    let mut failures = Vec::new();
    for written in &aggregated.written {
        let entry = BundleEntry {
            run_id: Some(&run_id),
            key: &written.key,
            path: &written.path,
            member_count: written.member_count,
            members_digest: &written.members_digest,
            created_at,
        };
        if let Err(e) = ledger.record_bundle(&entry).await {
            failures.push(format!("could not record bundle {}: {e}", written.key));
        }
    }
    for failure in failures {
        ctx.warn(failure);
    }
}

async fn close_run(ledger: &Storage, report: &RunReport, progress: &dyn ProgressReporter) {
    if let Err(e) = ledger.finish_run(report).await {
        warn!(run_id = %report.run_id, error = %e, "failed to finalize run in ledger");
    }
    progress.done(report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeDelta;
    use docharvest_crawler::{
        CancelToken, DocumentWriter, ItemProcessor, ProcessedItem, build_record,
    };
    use docharvest_discovery::ChangeSource;
    use docharvest_shared::{AppConfig, Bundle, RunConfig, Section, SourceKind};
    use docharvest_storage::MemoryBlobStore;

    // -- fakes --------------------------------------------------------------

    struct FakeSource {
        records: Vec<ChangeRecord>,
        fail: bool,
    }

    #[async_trait]
    impl ChangeSource for FakeSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Confluence
        }

        async fn query(&self, _window_days: u32, _limit: usize) -> Result<Vec<ChangeRecord>> {
            if self.fail {
                return Err(HarvestError::Network("HTTP 503".into()));
            }
            Ok(self.records.clone())
        }
    }

    /// Writes one record per item; fails items whose id is in `failing`.
    struct FakeProcessor {
        writer: DocumentWriter,
        failing: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl FakeProcessor {
        fn new(store: Arc<MemoryBlobStore>, failing: &[&str]) -> Self {
            Self {
                writer: DocumentWriter::new(store),
                failing: Mutex::new(failing.iter().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl ItemProcessor for FakeProcessor {
        async fn process(&self, item: &ChangeRecord) -> Result<ProcessedItem> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().unwrap().contains(&item.id) {
                return Err(HarvestError::Network(format!("{}: HTTP 500", item.id)));
            }
            let sections = vec![Section {
                index: 0,
                heading: "Intro".into(),
                level: 1,
                text: format!("Body of {}", item.title),
            }];
            let record = build_record(item, &item.title, sections, Utc::now());
            let outputs = self.writer.write(&record, None).await?;
            Ok(ProcessedItem {
                sections: 1,
                outputs,
            })
        }
    }

    #[derive(Default)]
    struct CountingProgress {
        finished: AtomicUsize,
        done: AtomicUsize,
    }

    impl ProgressReporter for CountingProgress {
        fn phase(&self, _name: &str) {}
        fn changes_detected(&self, _count: usize) {}
        fn item_finished(&self, _result: &FetchResult) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
        fn done(&self, _report: &RunReport) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    // -- helpers ------------------------------------------------------------

    fn record(id: &str, title: &str, hours_ago: i64) -> ChangeRecord {
        ChangeRecord {
            id: id.into(),
            title: title.into(),
            url: format!("https://wiki.example.com/pages/{id}"),
            last_modified: Utc::now() - TimeDelta::hours(hours_ago),
            source: SourceKind::Confluence,
        }
    }

    fn run_config() -> RunConfig {
        let mut config = RunConfig::from(&AppConfig::default());
        config.concurrency = 2;
        config
    }

    async fn ledger(dir: &tempfile::TempDir) -> Storage {
        Storage::open(&Storage::ledger_path(dir.path())).await.unwrap()
    }

    fn backend(source: FakeSource, processor: Arc<FakeProcessor>) -> Backend {
        Backend::new(Arc::new(source), processor)
    }

    // -- tests --------------------------------------------------------------

    #[tokio::test]
    async fn empty_changes_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let store = Arc::new(MemoryBlobStore::new());
        let processor = Arc::new(FakeProcessor::new(store.clone(), &[]));
        let backend = backend(
            FakeSource {
                records: vec![],
                fail: false,
            },
            processor.clone(),
        );
        let progress = Arc::new(CountingProgress::default());

        let mut ctx = RunContext::new(run_config());
        let report = run_pipeline(&mut ctx, &backend, store.as_ref(), &ledger, progress.clone())
            .await
            .unwrap();

        assert_eq!(report.items_detected, 0);
        assert_eq!(report.items_fetched, 0);
        assert_eq!(report.bundles_written, 0);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);

        let runs = ledger.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn full_run_fetches_records_and_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let store = Arc::new(MemoryBlobStore::new());
        let processor = Arc::new(FakeProcessor::new(store.clone(), &["3"]));
        let backend = backend(
            FakeSource {
                records: vec![
                    record("1", "SDK page1", 1),
                    record("2", "SDK page2", 2),
                    record("3", "Release notes", 3),
                ],
                fail: false,
            },
            processor,
        );
        let progress = Arc::new(CountingProgress::default());

        let mut ctx = RunContext::new(run_config());
        let report = run_pipeline(&mut ctx, &backend, store.as_ref(), &ledger, progress.clone())
            .await
            .unwrap();

        assert_eq!(report.items_detected, 3);
        assert_eq!(report.items_fetched, 2);
        assert_eq!(report.items_failed, 1);
        assert_eq!(report.sections_produced, 2);
        assert_eq!(report.bundles_written, 1);
        assert_eq!(progress.finished.load(Ordering::SeqCst), 3);

        let bundles = store.list(BUNDLES_PREFIX).await.unwrap();
        assert_eq!(bundles.len(), 1);
        let bundle: Bundle = serde_json::from_slice(&store.get(&bundles[0]).await.unwrap()).unwrap();
        assert_eq!(bundle.metadata.key, "SDK");
        assert_eq!(bundle.metadata.member_count, 2);
        assert_eq!(ledger.bundle_count("SDK").await.unwrap(), 1);

        let failed = ledger.failed_items(&ctx.run_id.to_string()).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "3");
    }

    #[tokio::test]
    async fn source_failure_is_fatal_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let store = Arc::new(MemoryBlobStore::new());
        let processor = Arc::new(FakeProcessor::new(store.clone(), &[]));
        let backend = backend(
            FakeSource {
                records: vec![],
                fail: true,
            },
            processor.clone(),
        );

        let mut ctx = RunContext::new(run_config());
        let err = run_pipeline(&mut ctx, &backend, store.as_ref(), &ledger, Arc::new(SilentProgress))
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::SourceUnavailable(_)));
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
        let runs = ledger.list_runs(10).await.unwrap();
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn skip_bundling_writes_only_documents() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let store = Arc::new(MemoryBlobStore::new());
        let processor = Arc::new(FakeProcessor::new(store.clone(), &[]));
        let backend = backend(
            FakeSource {
                records: vec![record("1", "SDK page1", 1)],
                fail: false,
            },
            processor,
        );

        let mut config = run_config();
        config.skip_bundling = true;
        let mut ctx = RunContext::new(config);
        let report = run_pipeline(&mut ctx, &backend, store.as_ref(), &ledger, Arc::new(SilentProgress))
            .await
            .unwrap();

        assert_eq!(report.items_fetched, 1);
        assert_eq!(report.bundles_written, 0);
        assert!(store.list(BUNDLES_PREFIX).await.unwrap().is_empty());
        assert_eq!(store.list(DOCUMENTS_PREFIX).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let store = Arc::new(MemoryBlobStore::new());
        let processor = Arc::new(FakeProcessor::new(store.clone(), &[]));
        let backend = backend(
            FakeSource {
                records: vec![record("1", "A", 1), record("2", "B", 2)],
                fail: false,
            },
            processor.clone(),
        );

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut ctx = RunContext::new(run_config()).with_cancel(cancel);
        let report = run_pipeline(&mut ctx, &backend, store.as_ref(), &ledger, Arc::new(SilentProgress))
            .await
            .unwrap();

        assert_eq!(report.items_failed, 2);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
        assert!(report.warnings.iter().any(|w| w.contains("cancelled")));
    }

    #[tokio::test]
    async fn retry_reprocesses_failed_items() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let store = Arc::new(MemoryBlobStore::new());
        let processor = Arc::new(FakeProcessor::new(store.clone(), &["2"]));
        let backend = backend(
            FakeSource {
                records: vec![record("1", "SDK page1", 1), record("2", "SDK page2", 2)],
                fail: false,
            },
            processor.clone(),
        );

        let mut first = RunContext::new(run_config());
        let report = run_pipeline(&mut first, &backend, store.as_ref(), &ledger, Arc::new(SilentProgress))
            .await
            .unwrap();
        assert_eq!(report.items_failed, 1);

        processor.heal();
        let mut second = RunContext::new(run_config());
        let previous = first.run_id.to_string();
        let retried = retry_failed(
            &mut second,
            &previous,
            &backend,
            store.as_ref(),
            &ledger,
            Arc::new(SilentProgress),
        )
        .await
        .unwrap();

        assert_eq!(retried.items_detected, 1);
        assert_eq!(retried.items_fetched, 1);
        assert_eq!(retried.items_failed, 0);
        assert!(
            ledger
                .failed_items(&second.run_id.to_string())
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(ledger.list_runs(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn retry_unknown_run_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let store = Arc::new(MemoryBlobStore::new());
        let processor = Arc::new(FakeProcessor::new(store.clone(), &[]));
        let backend = backend(
            FakeSource {
                records: vec![],
                fail: false,
            },
            processor,
        );

        let mut ctx = RunContext::new(run_config());
        let err = retry_failed(
            &mut ctx,
            "no-such-run",
            &backend,
            store.as_ref(),
            &ledger,
            Arc::new(SilentProgress),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HarvestError::Validation { .. }));
    }

    #[tokio::test]
    async fn group_directory_bundles_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SDK_page1.json"), r#"{"a":1}"#).unwrap();
        std::fs::write(dir.path().join("SDK_page2.json"), r#"{"a":2}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let report = group_directory(dir.path(), Some(out.path()), '_').await.unwrap();

        assert_eq!(report.written.len(), 1);
        assert_eq!(report.written[0].member_count, 2);
        assert!(out.path().join(&report.written[0].path).exists());
    }

    #[tokio::test]
    async fn group_directory_in_place_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SDK_page1_1.json"), r#"{"a":1}"#).unwrap();
        std::fs::write(dir.path().join("SDK_page2_2.json"), r#"{"a":2}"#).unwrap();

        let first = group_directory(dir.path(), None, '_').await.unwrap();
        let second = group_directory(dir.path(), None, '_').await.unwrap();

        assert_eq!(first.written.len(), 1);
        assert_eq!(second.written.len(), 1);
        assert_eq!(second.members_read, 2);
        assert_eq!(second.written[0].member_count, 2);
        assert_eq!(
            first.written[0].members_digest,
            second.written[0].members_digest
        );
        assert!(second.written[0].path.starts_with("bundles/"));
        assert!(dir.path().join(&second.written[0].path).exists());

        let top_level_json = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .count();
        assert_eq!(top_level_json, 2);
    }

    #[tokio::test]
    async fn group_directory_rejects_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = group_directory(&missing, None, '_').await.unwrap_err();
        assert!(matches!(err, HarvestError::Validation { .. }));
    }
}
