//! Core domain types shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for persisted documents and bundles.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Heading used for content that appears before the first heading.
pub const INTRO_HEADING: &str = "INTRO";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// Which structured-document source an item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Confluence,
    Gdocs,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confluence => "confluence",
            Self::Gdocs => "gdocs",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "confluence" => Ok(Self::Confluence),
            "gdocs" | "google-docs" => Ok(Self::Gdocs),
            other => Err(format!(
                "unknown source '{other}': expected 'confluence' or 'gdocs'"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeRecord / FetchResult
// ---------------------------------------------------------------------------

/// One recently-changed item reported by a change source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Source-native identifier (Confluence page id, Drive file id).
    pub id: String,
    /// Human-readable title, used to name persisted output.
    pub title: String,
    /// Browser URL of the item.
    pub url: String,
    /// Last modification instant reported by the source.
    pub last_modified: DateTime<Utc>,
    /// Origin of the item.
    pub source: SourceKind,
}

/// Outcome of one fetch unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Success,
    Failure,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Result of processing one [`ChangeRecord`]; exactly one per submitted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Identifier of the processed item.
    pub id: String,
    pub status: FetchStatus,
    /// Error description for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sections persisted for a successful item (0 on failure).
    #[serde(default)]
    pub sections: usize,
    /// Wall time spent on the unit.
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl FetchResult {
    pub fn success(id: impl Into<String>, sections: usize, elapsed_ms: u64) -> Self {
        Self {
            id: id.into(),
            status: FetchStatus::Success,
            error: None,
            sections,
            elapsed_ms,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            id: id.into(),
            status: FetchStatus::Failure,
            error: Some(error.into()),
            sections: 0,
            elapsed_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Block / Section
// ---------------------------------------------------------------------------

/// One block of a converted document.
///
/// The segmenter branches on this closed set only; source payloads are
/// mapped onto it at the conversion boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Paragraph {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heading_level: Option<u8>,
    },
    Table {
        rows: Vec<Vec<String>>,
    },
}

impl Block {
    /// A plain (non-heading) paragraph.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Paragraph {
            text: text.into(),
            heading_level: None,
        }
    }

    /// A heading paragraph at `level`.
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self::Paragraph {
            text: text.into(),
            heading_level: Some(level),
        }
    }

    /// A table from rows of cell text.
    pub fn table<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self::Table {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }
}

/// An ordered sequence of blocks for one document.
pub type DocumentTree = Vec<Block>;

/// A contiguous span of document content addressed by one heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Zero-based emission order.
    pub index: usize,
    /// Never empty.
    pub heading: String,
    /// 1..=3
    pub level: u8,
    /// Never empty.
    pub text: String,
}

// ---------------------------------------------------------------------------
// DocumentRecord
// ---------------------------------------------------------------------------

/// Per-document JSON persisted by the fetch stage and consumed by bundling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub schema_version: u32,
    pub source: SourceKind,
    pub id: String,
    pub title: String,
    pub url: String,
    pub updated_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    /// First words of the document text.
    pub brief: String,
    pub sections: Vec<Section>,
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// One member of a bundle: the stored identifier and its parsed JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMember {
    pub source_identifier: String,
    pub data: serde_json::Value,
}

/// Bundle metadata. Only `created_at` may differ between runs over the
/// same member set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub member_count: usize,
    pub member_identifiers: Vec<String>,
    /// SHA-256 of the canonical JSON of `members`.
    pub members_digest: String,
}

/// A merged multi-document artifact keyed by a derived group key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub metadata: BundleMetadata,
    pub members: Vec<BundleMember>,
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Per-stage counts reported at the end of every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub items_detected: usize,
    pub items_fetched: usize,
    pub items_failed: usize,
    pub sections_produced: usize,
    pub bundles_written: usize,
    pub members_skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
