//! Change detection against a structured-document source.
//!
//! A [`ChangeSource`] answers one question: which items were modified in the
//! last N days? [`detect_changes`] asks it, then normalizes the answer
//! (window re-check, de-duplication, ordering, limit) so every source
//! behaves the same for the fetch stage.
//!
//! Two sources ship with the crate: [`ConfluenceClient`] (CQL content
//! search) and [`DriveClient`] (Google Docs files in Drive).

mod confluence;
mod gdrive;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use docharvest_shared::{ChangeRecord, HarvestError, Result, SourceKind};
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

pub use confluence::{ConfluenceClient, ConfluenceCredentials, ExportView, extract_page_id};
pub use gdrive::DriveClient;

/// Maximum number of redirects to follow on source requests.
const MAX_REDIRECTS: usize = 3;

/// User-Agent string for all source requests.
const USER_AGENT: &str = concat!("docharvest/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// ChangeSource
// ---------------------------------------------------------------------------

/// A source that can list recently-modified items.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Which kind of items this source yields.
    fn kind(&self) -> SourceKind;

    /// Items modified within the last `window_days` days, at most `limit`.
    ///
    /// Sources should return newest first, but callers go through
    /// [`detect_changes`], which does not rely on it.
    async fn query(&self, window_days: u32, limit: usize) -> Result<Vec<ChangeRecord>>;
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Query `source` for items modified in the trailing window.
///
/// Returns at most `limit` records, newest first. Any failure of the
/// underlying query surfaces as [`HarvestError::SourceUnavailable`]; no
/// partial list is returned.
pub async fn detect_changes(
    source: &dyn ChangeSource,
    window_days: u32,
    limit: usize,
) -> Result<Vec<ChangeRecord>> {
    detect_changes_at(source, window_days, limit, Utc::now()).await
}

/// [`detect_changes`] with an explicit reference instant.
#[instrument(skip(source), fields(source = %source.kind()))]
pub async fn detect_changes_at(
    source: &dyn ChangeSource,
    window_days: u32,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<ChangeRecord>> {
    if window_days == 0 {
        return Err(HarvestError::validation("window_days must be at least 1"));
    }
    if limit == 0 {
        return Err(HarvestError::validation("limit must be at least 1"));
    }
    let cutoff = window_cutoff(now, window_days)?;

    let raw = source.query(window_days, limit).await.map_err(|e| match e {
        HarvestError::SourceUnavailable(_) => e,
        other => HarvestError::SourceUnavailable(other.to_string()),
    })?;
    let returned = raw.len();
    let records = normalize(raw, cutoff, limit);

    if records.len() < returned {
        debug!(
            returned,
            kept = records.len(),
            "dropped stale, duplicate or over-limit records"
        );
    }
    info!(changes = records.len(), window_days, limit, "change detection complete");

    Ok(records)
}

/// Window filter, de-duplication by id (newest wins), newest-first ordering
/// with id as tie-breaker, then truncation.
fn normalize(raw: Vec<ChangeRecord>, cutoff: DateTime<Utc>, limit: usize) -> Vec<ChangeRecord> {
    let mut by_id: HashMap<String, ChangeRecord> = HashMap::with_capacity(raw.len());
    for record in raw {
        if record.last_modified <= cutoff {
            continue;
        }
        match by_id.get(&record.id) {
            Some(existing) if existing.last_modified >= record.last_modified => {}
            _ => {
                by_id.insert(record.id.clone(), record);
            }
        }
    }

    let mut records: Vec<ChangeRecord> = by_id.into_values().collect();
    records.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| a.id.cmp(&b.id))
    });
    records.truncate(limit);
    records
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Start of the trailing window: `now - window_days`.
///
/// A window reaching past the representable date range is a validation
/// error rather than an overflow.
pub fn window_cutoff(now: DateTime<Utc>, window_days: u32) -> Result<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(window_days))
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            HarvestError::validation(format!("window_days {window_days} is out of range"))
        })
}

/// Build the shared HTTP client used by sources and processors.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(timeout)
        .build()
        .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))
}

/// Turn a non-success response into a [`HarvestError::Network`].
pub(crate) async fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    warn!(%url, %status, "request failed");
    Err(HarvestError::Network(format!("{url}: HTTP {status} {snippet}").trim_end().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedSource {
        records: Vec<ChangeRecord>,
    }

    #[async_trait]
    impl ChangeSource for FixedSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Confluence
        }

        async fn query(&self, _window_days: u32, _limit: usize) -> Result<Vec<ChangeRecord>> {
            Ok(self.records.clone())
        }
    }

    struct FailingSource(fn() -> HarvestError);

    #[async_trait]
    impl ChangeSource for FailingSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Gdocs
        }

        async fn query(&self, _window_days: u32, _limit: usize) -> Result<Vec<ChangeRecord>> {
            Err((self.0)())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    fn rec(id: &str, days_ago: i64) -> ChangeRecord {
        ChangeRecord {
            id: id.into(),
            title: format!("Page {id}"),
            url: format!("https://wiki.example.com/pages/{id}"),
            last_modified: now() - TimeDelta::days(days_ago),
            source: SourceKind::Confluence,
        }
    }

    #[tokio::test]
    async fn sorts_newest_first() {
        let source = FixedSource {
            records: vec![rec("a", 5), rec("b", 1), rec("c", 3)],
        };
        let out = detect_changes_at(&source, 10, 100, now()).await.unwrap();
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn ties_break_on_id() {
        let source = FixedSource {
            records: vec![rec("z", 2), rec("m", 2), rec("a", 2)],
        };
        let out = detect_changes_at(&source, 10, 100, now()).await.unwrap();
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[tokio::test]
    async fn drops_items_outside_window() {
        let source = FixedSource {
            records: vec![rec("fresh", 2), rec("stale", 12), rec("edge", 10)],
        };
        let out = detect_changes_at(&source, 10, 100, now()).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "fresh");
    }

    #[tokio::test]
    async fn deduplicates_keeping_newest() {
        let mut newer = rec("dup", 1);
        newer.title = "Newer title".into();
        let source = FixedSource {
            records: vec![rec("dup", 4), newer.clone(), rec("other", 2)],
        };
        let out = detect_changes_at(&source, 10, 100, now()).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], newer);
    }

    #[tokio::test]
    async fn applies_limit_after_sorting() {
        let source = FixedSource {
            records: vec![rec("old", 8), rec("new", 1), rec("mid", 4)],
        };
        let out = detect_changes_at(&source, 10, 2, now()).await.unwrap();
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }

    #[tokio::test]
    async fn empty_result_is_normal() {
        let source = FixedSource { records: vec![] };
        assert!(detect_changes_at(&source, 10, 5, now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_errors_become_source_unavailable() {
        let source = FailingSource(|| HarvestError::Network("HTTP 401".into()));
        let err = detect_changes_at(&source, 10, 5, now()).await.unwrap_err();
        assert!(matches!(err, HarvestError::SourceUnavailable(_)));
        assert!(err.to_string().contains("HTTP 401"));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn zero_window_or_limit_is_rejected() {
        let source = FixedSource { records: vec![] };
        assert!(matches!(
            detect_changes_at(&source, 0, 5, now()).await,
            Err(HarvestError::Validation { .. })
        ));
        assert!(matches!(
            detect_changes_at(&source, 5, 0, now()).await,
            Err(HarvestError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn oversized_window_is_rejected_before_querying() {
        struct CountingSource(std::sync::atomic::AtomicUsize);

        #[async_trait]
        impl ChangeSource for CountingSource {
            fn kind(&self) -> SourceKind {
                SourceKind::Gdocs
            }

            async fn query(&self, _window_days: u32, _limit: usize) -> Result<Vec<ChangeRecord>> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![])
            }
        }

        let source = CountingSource(Default::default());
        let err = detect_changes_at(&source, u32::MAX, 5, now()).await.unwrap_err();
        assert!(matches!(err, HarvestError::Validation { .. }));
        assert!(err.to_string().contains("out of range"));
        assert_eq!(source.0.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn cutoff_is_window_days_back() {
        let cutoff = window_cutoff(now(), 10).unwrap();
        assert_eq!(cutoff, now() - TimeDelta::days(10));
        assert!(window_cutoff(now(), u32::MAX).is_err());
    }

    #[test]
    fn client_builds() {
        assert!(build_client(Duration::from_secs(5)).is_ok());
    }
}
