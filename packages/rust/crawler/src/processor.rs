//! Per-item processors: fetch one item, convert it to sections, persist it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use docharvest_discovery::{ConfluenceClient, DriveClient};
use docharvest_segmenter::{
    BRIEF_WORDS, RenderOptions, brief, clean_text, parse_gdocs, parse_html, render_markdown,
    segment,
};
use docharvest_shared::{
    CURRENT_SCHEMA_VERSION, ChangeRecord, DocumentRecord, HarvestError, Result, Section,
    sanitize_for_filename,
};
use docharvest_storage::BlobStore;

use crate::engine::{ItemProcessor, ProcessedItem};

/// Store prefix for per-document output.
pub const DOCUMENTS_PREFIX: &str = "documents";

// ---------------------------------------------------------------------------
// DocumentWriter
// ---------------------------------------------------------------------------

/// Persists [`DocumentRecord`]s (and optional Markdown) under one prefix.
///
/// Keys are `<prefix>/<title>_<id>.<ext>`: the title keeps the group key in
/// front, the source id keeps same-titled items apart.
#[derive(Clone)]
pub struct DocumentWriter {
    store: Arc<dyn BlobStore>,
    prefix: String,
}

impl DocumentWriter {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            prefix: DOCUMENTS_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, record: &DocumentRecord, extension: &str) -> String {
        format!(
            "{}/{}_{}.{extension}",
            self.prefix,
            sanitize_for_filename(&record.title),
            sanitize_for_filename(&record.id)
        )
    }

    /// Write the record and, when given, its Markdown rendition.
    /// Returns the keys written.
    pub async fn write(&self, record: &DocumentRecord, markdown: Option<&str>) -> Result<Vec<String>> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| HarvestError::Storage(format!("failed to serialize {}: {e}", record.id)))?;
        let json_key = self.key(record, "json");
        self.store.put(&json_key, &json).await?;

        let mut keys = vec![json_key];
        if let Some(md) = markdown {
            let md_key = self.key(record, "md");
            self.store.put(&md_key, md.as_bytes()).await?;
            keys.push(md_key);
        }
        Ok(keys)
    }
}

/// Assemble the persisted record for one item.
pub fn build_record(
    item: &ChangeRecord,
    title: &str,
    sections: Vec<Section>,
    fetched_at: DateTime<Utc>,
) -> DocumentRecord {
    let joined = sections
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    DocumentRecord {
        schema_version: CURRENT_SCHEMA_VERSION,
        source: item.source,
        id: item.id.clone(),
        title: title.to_string(),
        url: item.url.clone(),
        updated_at: item.last_modified,
        fetched_at,
        brief: brief(&clean_text(&joined), BRIEF_WORDS),
        sections,
    }
}

/// The change record's title, falling back to the fetched one.
fn pick_title<'a>(item: &'a ChangeRecord, fetched: &'a str) -> &'a str {
    if item.title.trim().is_empty() {
        fetched
    } else {
        &item.title
    }
}

// ---------------------------------------------------------------------------
// Confluence
// ---------------------------------------------------------------------------

/// Export-view HTML → sections → `documents/<title>_<id>.json` (+ `.md`).
pub struct ConfluenceProcessor {
    client: ConfluenceClient,
    writer: DocumentWriter,
    emit_markdown: bool,
}

impl ConfluenceProcessor {
    pub fn new(client: ConfluenceClient, writer: DocumentWriter, emit_markdown: bool) -> Self {
        Self {
            client,
            writer,
            emit_markdown,
        }
    }
}

#[async_trait]
impl ItemProcessor for ConfluenceProcessor {
    #[instrument(skip_all, fields(id = %item.id))]
    async fn process(&self, item: &ChangeRecord) -> Result<ProcessedItem> {
        let view = self.client.fetch_export_view(&item.id).await?;
        let fetched_at = Utc::now();
        let title = pick_title(item, &view.title).to_string();

        let sections = segment(&parse_html(&view.html));
        debug!(sections = sections.len(), "segmented export view");

        let markdown = if self.emit_markdown {
            let opts = RenderOptions {
                source_url: item.url.clone(),
                title: title.clone(),
                fetched_at: Some(fetched_at.to_rfc3339()),
            };
            Some(render_markdown(&view.html, &opts)?)
        } else {
            None
        };

        let record = build_record(item, &title, sections, fetched_at);
        let outputs = self.writer.write(&record, markdown.as_deref()).await?;

        Ok(ProcessedItem {
            sections: record.sections.len(),
            outputs,
        })
    }
}

// ---------------------------------------------------------------------------
// Google Docs
// ---------------------------------------------------------------------------

/// Docs document JSON → sections → `documents/<title>_<id>.json`.
pub struct GdocsProcessor {
    client: DriveClient,
    writer: DocumentWriter,
}

impl GdocsProcessor {
    pub fn new(client: DriveClient, writer: DocumentWriter) -> Self {
        Self { client, writer }
    }
}

#[async_trait]
impl ItemProcessor for GdocsProcessor {
    #[instrument(skip_all, fields(id = %item.id))]
    async fn process(&self, item: &ChangeRecord) -> Result<ProcessedItem> {
        let raw = self.client.fetch_document(&item.id).await?;
        let fetched_at = Utc::now();
        let parsed = parse_gdocs(&raw)?;
        if parsed.skipped > 0 {
            warn!(skipped = parsed.skipped, "skipped malformed blocks");
        }

        let title = pick_title(item, &parsed.title).to_string();
        let sections = segment(&parsed.blocks);
        debug!(sections = sections.len(), "segmented document");

        let record = build_record(item, &title, sections, fetched_at);
        let outputs = self.writer.write(&record, None).await?;

        Ok(ProcessedItem {
            sections: record.sections.len(),
            outputs,
        })
    }
}
