//! Bounded worker pool that fetches, converts and persists changed items.
//!
//! Every item is one independent unit run on its own task under a
//! per-item timeout. Whatever happens inside a unit (HTTP error, bad
//! payload, timeout, panic) becomes a [`FetchResult`] failure for that item
//! alone. The pool always returns exactly one result per submitted item.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use docharvest_shared::{ChangeRecord, FetchResult, HarvestError, Result};

/// The error for an item still queued when the run was cancelled.
pub fn not_started() -> HarvestError {
    HarvestError::Cancelled("not started".into())
}

// ---------------------------------------------------------------------------
// ItemProcessor
// ---------------------------------------------------------------------------

/// What a successful unit produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedItem {
    /// Number of sections persisted.
    pub sections: usize,
    /// Store keys written for this item.
    pub outputs: Vec<String>,
}

/// Fetch, convert and persist one item.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &ChangeRecord) -> Result<ProcessedItem>;
}

/// Called once per finished item, from the worker that ran it.
pub type ResultObserver = Arc<dyn Fn(&FetchResult) + Send + Sync>;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative, run-wide cancellation flag.
///
/// Cancelling stops workers from starting queued items; units already
/// running finish or time out.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// FetchReport
// ---------------------------------------------------------------------------

/// Outcome of one [`Fetcher::fetch_all`] call.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// One result per submitted item, in completion order.
    pub results: Vec<FetchResult>,
    /// Store keys written by successful units.
    pub outputs: Vec<String>,
    pub duration: Duration,
}

impl FetchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn sections(&self) -> usize {
        self.results.iter().map(|r| r.sections).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Worker pool configuration and entry point.
#[derive(Clone)]
pub struct Fetcher {
    concurrency: usize,
    item_timeout: Duration,
    cancel: CancelToken,
    observer: Option<ResultObserver>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("concurrency", &self.concurrency)
            .field("item_timeout", &self.item_timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// A pool of at most `concurrency` workers, each unit bounded by `item_timeout`.
    pub fn new(concurrency: usize, item_timeout: Duration) -> Result<Self> {
        if concurrency == 0 {
            return Err(HarvestError::validation("concurrency must be at least 1"));
        }
        if item_timeout.is_zero() {
            return Err(HarvestError::validation("item timeout must be non-zero"));
        }
        Ok(Self {
            concurrency,
            item_timeout,
            cancel: CancelToken::new(),
            observer: None,
        })
    }

    /// Share an existing cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: ResultObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every item through `processor`.
    ///
    /// Spawns `min(concurrency, items.len())` workers pulling from a shared
    /// queue. Never fails: per-item errors land in the report.
    #[instrument(skip_all, fields(items = items.len(), concurrency = self.concurrency))]
    pub async fn fetch_all(
        &self,
        items: Vec<ChangeRecord>,
        processor: Arc<dyn ItemProcessor>,
    ) -> FetchReport {
        let started = Instant::now();
        let total = items.len();
        if total == 0 {
            debug!("nothing to fetch");
            return FetchReport::default();
        }

        let submitted: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<_>>()));
        let results = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let workers = self.concurrency.min(total);

        info!(
            workers,
            timeout_ms = self.item_timeout.as_millis() as u64,
            "starting fetch"
        );

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = queue.clone();
            let results = results.clone();
            let outputs = outputs.clone();
            let processor = processor.clone();
            let cancel = self.cancel.clone();
            let observer = self.observer.clone();
            let timeout = self.item_timeout;

            handles.push(tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some(item) = next else { break };

                    let result = if cancel.is_cancelled() {
                        FetchResult::failure(item.id, not_started().to_string(), 0)
                    } else {
                        let (result, written) = run_unit(item, processor.clone(), timeout).await;
                        outputs.lock().await.extend(written);
                        result
                    };

                    match &observer {
                        Some(observer) => {
                            results.lock().await.push(result.clone());
                            notify(observer, &result);
                        }
                        None => results.lock().await.push(result),
                    }
                }
                debug!(worker, "worker finished");
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "fetch worker terminated abnormally");
            }
        }

        let mut results = std::mem::take(&mut *results.lock().await);
        backfill_missing(&submitted, &mut results);
        let outputs = std::mem::take(&mut *outputs.lock().await);
        let report = FetchReport {
            results,
            outputs,
            duration: started.elapsed(),
        };

        info!(
            items_fetched = report.succeeded(),
            items_failed = report.failed(),
            sections = report.sections(),
            duration_ms = report.duration.as_millis() as u64,
            "fetch stage complete"
        );
        report
    }
}

/// Call the observer without letting its panic take the worker down.
fn notify(observer: &ResultObserver, result: &FetchResult) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(result))) {
        warn!(
            id = %result.id,
            error = %panic_message(payload),
            "result observer panicked"
        );
    }
}

/// Add a failure for every submitted item a dead worker never reported.
fn backfill_missing(submitted: &[String], results: &mut Vec<FetchResult>) {
    let mut reported: HashMap<&str, usize> = HashMap::new();
    for result in results.iter() {
        *reported.entry(result.id.as_str()).or_default() += 1;
    }

    let mut missing = Vec::new();
    for id in submitted {
        match reported.get_mut(id.as_str()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => missing.push(id.clone()),
        }
    }

    for id in missing {
        warn!(%id, "no result reported, recording failure");
        results.push(FetchResult::failure(
            id,
            HarvestError::Cancelled("worker terminated".into()).to_string(),
            0,
        ));
    }
}

/// Run one unit on its own task so a panic or a hang stays contained.
async fn run_unit(
    item: ChangeRecord,
    processor: Arc<dyn ItemProcessor>,
    timeout: Duration,
) -> (FetchResult, Vec<String>) {
    let started = Instant::now();
    let id = item.id.clone();
    let mut task = tokio::spawn(async move { processor.process(&item).await });

    let outcome = tokio::time::timeout(timeout, &mut task).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(Ok(processed))) => {
            debug!(%id, sections = processed.sections, elapsed_ms, "item fetched");
            (
                FetchResult::success(id, processed.sections, elapsed_ms),
                processed.outputs,
            )
        }
        Ok(Ok(Err(e))) => {
            warn!(%id, error = %e, "item failed");
            (FetchResult::failure(id, e.to_string(), elapsed_ms), Vec::new())
        }
        Ok(Err(join_err)) => {
            let message = if join_err.is_panic() {
                format!("panicked: {}", panic_message(join_err.into_panic()))
            } else {
                format!("task aborted: {join_err}")
            };
            warn!(%id, error = %message, "item failed");
            (FetchResult::failure(id, message, elapsed_ms), Vec::new())
        }
        Err(_) => {
            task.abort();
            let error = HarvestError::Timeout {
                secs: timeout.as_secs(),
            };
            warn!(%id, timeout_ms = timeout.as_millis() as u64, "item timed out");
            (FetchResult::failure(id, error.to_string(), elapsed_ms), Vec::new())
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
