//! SQL migration definitions for the run ledger.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: runs, run_items, bundles",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per pipeline invocation
CREATE TABLE IF NOT EXISTS runs (
    id                TEXT PRIMARY KEY,
    source            TEXT NOT NULL,
    started_at        TEXT NOT NULL,
    finished_at       TEXT,
    items_detected    INTEGER NOT NULL DEFAULT 0,
    items_fetched     INTEGER NOT NULL DEFAULT 0,
    items_failed      INTEGER NOT NULL DEFAULT 0,
    sections_produced INTEGER NOT NULL DEFAULT 0,
    bundles_written   INTEGER NOT NULL DEFAULT 0,
    members_skipped   INTEGER NOT NULL DEFAULT 0,
    warnings_json     TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);

-- Per-item outcome; the failed subset feeds `retry`
CREATE TABLE IF NOT EXISTS run_items (
    run_id        TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    item_id       TEXT NOT NULL,
    title         TEXT NOT NULL,
    url           TEXT NOT NULL,
    last_modified TEXT NOT NULL,
    source        TEXT NOT NULL,
    status        TEXT NOT NULL,
    error         TEXT,
    sections      INTEGER NOT NULL DEFAULT 0,
    elapsed_ms    INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (run_id, item_id)
);

CREATE INDEX IF NOT EXISTS idx_run_items_status ON run_items(run_id, status);

-- Bundles written by the aggregation stage
CREATE TABLE IF NOT EXISTS bundles (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id         TEXT,
    key            TEXT NOT NULL,
    path           TEXT NOT NULL,
    member_count   INTEGER NOT NULL,
    members_digest TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bundles_key ON bundles(key);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
