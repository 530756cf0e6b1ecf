//! Read per-document records from a store, bundle them, write the bundles.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use docharvest_shared::{HarvestError, Result, sanitize_for_filename};
use docharvest_storage::BlobStore;

use crate::group::{MemberInput, group, group_key};

/// One bundle written by [`aggregate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBundle {
    pub key: String,
    /// Store key of the bundle file.
    pub path: String,
    pub member_count: usize,
    pub members_digest: String,
}

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, Default)]
pub struct AggregateReport {
    pub written: Vec<WrittenBundle>,
    pub members_read: usize,
    pub members_skipped: usize,
    pub warnings: Vec<String>,
}

/// Store key of a bundle: `<dest>/<key>_combined_<YYYYMMDD_HHMMSS>.json`.
pub fn bundle_path(dest_prefix: &str, key: &str, created_at: DateTime<Utc>) -> String {
    let file = format!(
        "{}_combined_{}.json",
        sanitize_for_filename(key),
        created_at.format("%Y%m%d_%H%M%S")
    );
    let dest = dest_prefix.trim_matches('/');
    if dest.is_empty() {
        file
    } else {
        format!("{dest}/{file}")
    }
}

/// Whether a file name has the shape [`bundle_path`] produces.
pub fn is_bundle_file(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".json") else {
        return false;
    };
    let Some((_, stamp)) = stem.rsplit_once("_combined_") else {
        return false;
    };
    let bytes = stamp.as_bytes();
    bytes.len() == 15
        && bytes[8] == b'_'
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[9..].iter().all(u8::is_ascii_digit)
}

/// Bundle every `*.json` directly under `source_prefix` into `dest_prefix`
/// of the same store. Earlier bundles found there are not members.
pub async fn aggregate(
    store: &dyn BlobStore,
    source_prefix: &str,
    dest_prefix: &str,
    separator: char,
    now: DateTime<Utc>,
) -> Result<AggregateReport> {
    aggregate_into(store, source_prefix, store, dest_prefix, separator, now).await
}

/// [`aggregate`] with separate source and destination stores.
#[instrument(skip(source, dest))]
pub async fn aggregate_into(
    source: &dyn BlobStore,
    source_prefix: &str,
    dest: &dyn BlobStore,
    dest_prefix: &str,
    separator: char,
    now: DateTime<Utc>,
) -> Result<AggregateReport> {
    let keys = source.list(source_prefix).await?;
    let mut report = AggregateReport::default();
    let mut inputs = Vec::with_capacity(keys.len());

    for key in keys.iter().filter(|k| k.ends_with(".json")) {
        let identifier = key.rsplit('/').next().unwrap_or(key.as_str()).to_string();
        if is_bundle_file(&identifier) {
            debug!(%key, "skipping earlier bundle");
            continue;
        }
        match source.get(key).await {
            Ok(content) => inputs.push(MemberInput::new(identifier, content)),
            Err(e) => {
                warn!(%key, error = %e, "could not read member");
                report.warnings.push(format!("skipped {identifier}: {e}"));
                report.members_skipped += 1;
            }
        }
    }
    report.members_read = inputs.len();

    let outcome = group(inputs, |id| group_key(id, separator), now);
    report.members_skipped += outcome.members_skipped;
    report.warnings.extend(outcome.warnings);

    for (key, bundle) in outcome.bundles {
        let path = bundle_path(dest_prefix, &key, now);
        let json = serde_json::to_vec_pretty(&bundle)
            .map_err(|e| HarvestError::Storage(format!("failed to serialize bundle {key}: {e}")))?;
        dest.put(&path, &json).await?;

        report.written.push(WrittenBundle {
            key,
            path,
            member_count: bundle.metadata.member_count,
            members_digest: bundle.metadata.members_digest,
        });
    }

    info!(
        bundles_written = report.written.len(),
        members_read = report.members_read,
        members_skipped = report.members_skipped,
        "aggregation complete"
    );
    Ok(report)
}
