//! Grouping of per-document records into bundles.
//!
//! Pure: no I/O, and the same member set always produces the same
//! `members` (only `created_at` varies between runs).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use docharvest_shared::{Bundle, BundleMember, BundleMetadata};

/// Default separator between the group key and the rest of an identifier.
pub const DEFAULT_SEPARATOR: char = '_';

/// One raw member as read from the store.
#[derive(Debug, Clone)]
pub struct MemberInput {
    /// File name of the record (`SDK_page1.json`).
    pub identifier: String,
    pub content: Vec<u8>,
}

impl MemberInput {
    pub fn new(identifier: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: identifier.into(),
            content: content.into(),
        }
    }
}

/// Result of grouping.
#[derive(Debug, Clone, Default)]
pub struct GroupOutcome {
    pub bundles: BTreeMap<String, Bundle>,
    /// Members that could not be parsed, and groups left empty because of it.
    pub warnings: Vec<String>,
    pub members_skipped: usize,
}

/// Identifier up to (not including) the first `separator`, or the whole
/// identifier when it has none.
pub fn group_key(identifier: &str, separator: char) -> String {
    match identifier.split_once(separator) {
        Some((prefix, _)) => prefix.to_string(),
        None => identifier.to_string(),
    }
}

/// Hex SHA-256 of the canonical JSON of `members`.
///
/// `serde_json` maps keep keys sorted, so equal member sets hash equal.
pub fn members_digest(members: &[BundleMember]) -> String {
    let canonical = serde_json::to_vec(members).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    format!("{:x}", hasher.finalize())
}

/// Group `records` by `key_fn` and build one bundle per key.
///
/// Members are ordered by identifier. A member whose content is not valid
/// JSON is skipped with a warning; a key whose members were all skipped
/// yields no bundle.
pub fn group<F>(records: Vec<MemberInput>, key_fn: F, created_at: DateTime<Utc>) -> GroupOutcome
where
    F: Fn(&str) -> String,
{
    let mut by_key: BTreeMap<String, Vec<MemberInput>> = BTreeMap::new();
    for record in records {
        by_key.entry(key_fn(&record.identifier)).or_default().push(record);
    }

    let mut outcome = GroupOutcome::default();

    for (key, mut inputs) in by_key {
        inputs.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let mut members = Vec::with_capacity(inputs.len());
        for input in inputs {
            match serde_json::from_slice::<serde_json::Value>(&input.content) {
                Ok(data) => members.push(BundleMember {
                    source_identifier: input.identifier,
                    data,
                }),
                Err(e) => {
                    warn!(identifier = %input.identifier, error = %e, "skipping unparseable member");
                    outcome
                        .warnings
                        .push(format!("skipped {}: {e}", input.identifier));
                    outcome.members_skipped += 1;
                }
            }
        }

        if members.is_empty() {
            warn!(%key, "no parseable members, bundle not written");
            outcome
                .warnings
                .push(format!("group {key} has no parseable members"));
            continue;
        }

        let metadata = BundleMetadata {
            key: key.clone(),
            created_at,
            member_count: members.len(),
            member_identifiers: members.iter().map(|m| m.source_identifier.clone()).collect(),
            members_digest: members_digest(&members),
        };
        debug!(%key, members = metadata.member_count, "bundle built");
        outcome.bundles.insert(key, Bundle { metadata, members });
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, sec).unwrap()
    }

    fn member(id: &str, json: &str) -> MemberInput {
        MemberInput::new(id, json.as_bytes())
    }

    fn by_underscore(id: &str) -> String {
        group_key(id, DEFAULT_SEPARATOR)
    }

    #[test]
    fn keys_split_on_first_separator() {
        assert_eq!(group_key("SDK_page1.json", '_'), "SDK");
        assert_eq!(group_key("SDK_page_2.json", '_'), "SDK");
        assert_eq!(group_key("readme.json", '_'), "readme.json");
        assert_eq!(group_key("a-b_c", '-'), "a");
    }

    #[test]
    fn groups_and_orders_members() {
        let outcome = group(
            vec![
                member("SDK_page2.json", r#"{"n":2}"#),
                member("readme.json", r#"{"r":true}"#),
                member("SDK_page1.json", r#"{"n":1}"#),
            ],
            by_underscore,
            at(0),
        );

        assert_eq!(outcome.bundles.len(), 2);
        let sdk = &outcome.bundles["SDK"];
        assert_eq!(sdk.metadata.member_count, 2);
        assert_eq!(
            sdk.metadata.member_identifiers,
            vec!["SDK_page1.json", "SDK_page2.json"]
        );
        assert_eq!(sdk.members[0].data["n"], 1);
        assert!(outcome.bundles.contains_key("readme.json"));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn corrupt_member_is_skipped_with_warning() {
        let outcome = group(
            vec![
                member("SDK_a.json", "{}"),
                member("SDK_b.json", "{not json"),
                member("SDK_c.json", "[1,2]"),
            ],
            by_underscore,
            at(0),
        );

        let sdk = &outcome.bundles["SDK"];
        assert_eq!(sdk.metadata.member_count, 2);
        assert_eq!(sdk.metadata.member_identifiers, vec!["SDK_a.json", "SDK_c.json"]);
        assert_eq!(outcome.members_skipped, 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("SDK_b.json"));
    }

    #[test]
    fn all_corrupt_group_produces_no_bundle() {
        let outcome = group(
            vec![member("X_1.json", "nope"), member("Y_1.json", "{}")],
            by_underscore,
            at(0),
        );
        assert!(!outcome.bundles.contains_key("X"));
        assert!(outcome.bundles.contains_key("Y"));
        assert_eq!(outcome.members_skipped, 1);
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn regrouping_is_idempotent_except_timestamp() {
        let inputs = || {
            vec![
                member("SDK_b.json", r#"{"z":1,"a":[1,2]}"#),
                member("SDK_a.json", r#"{"title":"A"}"#),
            ]
        };
        let first = group(inputs(), by_underscore, at(1));
        let second = group(inputs(), by_underscore, at(59));

        let (a, b) = (&first.bundles["SDK"], &second.bundles["SDK"]);
        assert_eq!(a.members, b.members);
        assert_eq!(a.metadata.members_digest, b.metadata.members_digest);
        assert_ne!(a.metadata.created_at, b.metadata.created_at);
    }

    #[test]
    fn digest_changes_with_content() {
        let one = vec![BundleMember {
            source_identifier: "a".into(),
            data: serde_json::json!({"v": 1}),
        }];
        let two = vec![BundleMember {
            source_identifier: "a".into(),
            data: serde_json::json!({"v": 2}),
        }];
        assert_ne!(members_digest(&one), members_digest(&two));
        assert_eq!(members_digest(&one).len(), 64);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let outcome = group(vec![], by_underscore, at(0));
        assert!(outcome.bundles.is_empty());
        assert!(outcome.warnings.is_empty());
    }
}
