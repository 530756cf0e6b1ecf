//! Persistence for docharvest.
//!
//! Two concerns live here:
//! - [`BlobStore`]: key-value storage for per-document JSON and bundles,
//!   with a filesystem ([`FsBlobStore`]) and an in-memory
//!   ([`MemoryBlobStore`]) implementation.
//! - [`Storage`]: the libSQL run ledger: one row per run, one row per
//!   fetched item, one row per bundle written. The failed subset of a run is
//!   read back from here by `retry`.
//!
//! **Access rules:**
//! - `run`, `retry` and `group`: read-write via [`Storage::open`]
//! - `runs`: read-only via [`Storage::open_readonly`]

mod blob;
mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use docharvest_shared::{
    ChangeRecord, FetchResult, HarvestError, Result, RunId, RunReport, SourceKind,
};
use libsql::{Connection, Database, params};

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};

/// File name of the ledger inside an output directory.
pub const LEDGER_FILE: &str = "docharvest.db";

/// One row of the `runs` table.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub source: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub items_detected: u64,
    pub items_fetched: u64,
    pub items_failed: u64,
    pub sections_produced: u64,
    pub bundles_written: u64,
    pub members_skipped: u64,
}

/// A bundle as recorded in the ledger.
#[derive(Debug, Clone)]
pub struct BundleEntry<'a> {
    pub run_id: Option<&'a str>,
    pub key: &'a str,
    pub path: &'a str,
    pub member_count: usize,
    pub members_digest: &'a str,
    pub created_at: DateTime<Utc>,
}

/// Run ledger handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a ledger at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing ledger at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarvestError::Storage(format!(
                "no run ledger at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Ledger path for an output directory.
    pub fn ledger_path(output_dir: &Path) -> std::path::PathBuf {
        output_dir.join(LEDGER_FILE)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        HarvestError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(HarvestError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Record the start of a run.
    pub async fn insert_run(
        &self,
        run_id: &RunId,
        source: SourceKind,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO runs (id, source, started_at) VALUES (?1, ?2, ?3)",
                params![run_id.to_string(), source.as_str(), started_at.to_rfc3339()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Store the final counts of a run.
    pub async fn finish_run(&self, report: &RunReport) -> Result<()> {
        self.check_writable()?;
        let finished_at = report.finished_at.unwrap_or_else(Utc::now).to_rfc3339();
        let warnings_json = if report.warnings.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&report.warnings).map_err(storage_err)?)
        };

        let updated = self
            .conn
            .execute(
                "UPDATE runs SET
                   finished_at = ?1,
                   items_detected = ?2,
                   items_fetched = ?3,
                   items_failed = ?4,
                   sections_produced = ?5,
                   bundles_written = ?6,
                   members_skipped = ?7,
                   warnings_json = ?8
                 WHERE id = ?9",
                params![
                    finished_at,
                    report.items_detected as i64,
                    report.items_fetched as i64,
                    report.items_failed as i64,
                    report.sections_produced as i64,
                    report.bundles_written as i64,
                    report.members_skipped as i64,
                    warnings_json,
                    report.run_id.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        if updated == 0 {
            return Err(HarvestError::Storage(format!(
                "unknown run: {}",
                report.run_id
            )));
        }
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source, started_at, finished_at, items_detected, items_fetched,
                        items_failed, sections_produced, bundles_written, members_skipped
                 FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(RunSummary {
                run_id: row.get::<String>(0).map_err(storage_err)?,
                source: row.get::<String>(1).map_err(storage_err)?,
                started_at: row.get::<String>(2).map_err(storage_err)?,
                finished_at: row.get::<String>(3).ok(),
                items_detected: row.get::<i64>(4).unwrap_or(0) as u64,
                items_fetched: row.get::<i64>(5).unwrap_or(0) as u64,
                items_failed: row.get::<i64>(6).unwrap_or(0) as u64,
                sections_produced: row.get::<i64>(7).unwrap_or(0) as u64,
                bundles_written: row.get::<i64>(8).unwrap_or(0) as u64,
                members_skipped: row.get::<i64>(9).unwrap_or(0) as u64,
            });
        }
        Ok(results)
    }

    /// Source kind a run was started with.
    pub async fn run_source(&self, run_id: &str) -> Result<Option<SourceKind>> {
        let mut rows = self
            .conn
            .query("SELECT source FROM runs WHERE id = ?1", params![run_id])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let source: String = row.get(0).map_err(storage_err)?;
                Ok(Some(source.parse().map_err(HarvestError::Storage)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Record the outcome of one fetch unit. Re-recording an item replaces it.
    pub async fn record_item(
        &self,
        run_id: &RunId,
        item: &ChangeRecord,
        result: &FetchResult,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO run_items
                   (run_id, item_id, title, url, last_modified, source, status, error, sections, elapsed_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(run_id, item_id) DO UPDATE SET
                   status = excluded.status,
                   error = excluded.error,
                   sections = excluded.sections,
                   elapsed_ms = excluded.elapsed_ms",
                params![
                    run_id.to_string(),
                    item.id.as_str(),
                    item.title.as_str(),
                    item.url.as_str(),
                    item.last_modified.to_rfc3339(),
                    item.source.as_str(),
                    result.status.as_str(),
                    result.error.as_deref(),
                    result.sections as i64,
                    result.elapsed_ms as i64,
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Items of a run whose last recorded status is a failure.
    pub async fn failed_items(&self, run_id: &str) -> Result<Vec<ChangeRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT item_id, title, url, last_modified, source
                 FROM run_items WHERE run_id = ?1 AND status = 'failure'
                 ORDER BY last_modified DESC, item_id",
                params![run_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_change_record(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Bundles
    // -----------------------------------------------------------------------

    pub async fn record_bundle(&self, entry: &BundleEntry<'_>) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO bundles (run_id, key, path, member_count, members_digest, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.run_id,
                    entry.key,
                    entry.path,
                    entry.member_count as i64,
                    entry.members_digest,
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Number of bundles recorded for a key.
    pub async fn bundle_count(&self, key: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM bundles WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }
}

fn row_to_change_record(row: &libsql::Row) -> Result<ChangeRecord> {
    let last_modified: String = row.get(3).map_err(storage_err)?;
    let source: String = row.get(4).map_err(storage_err)?;
    Ok(ChangeRecord {
        id: row.get(0).map_err(storage_err)?,
        title: row.get(1).map_err(storage_err)?,
        url: row.get(2).map_err(storage_err)?,
        last_modified: DateTime::parse_from_rfc3339(&last_modified)
            .map_err(|e| HarvestError::Storage(format!("bad timestamp {last_modified}: {e}")))?
            .with_timezone(&Utc),
        source: source.parse().map_err(HarvestError::Storage)?,
    })
}
