//! Aggregation of per-document records into keyed bundles.
//!
//! Records are grouped by the prefix of their identifier up to the first
//! separator (`SDK_page1.json` → `SDK`). Each group becomes one bundle with
//! metadata and is written as `<key>_combined_<timestamp>.json`.

pub mod group;
pub mod writer;

pub use group::{
    DEFAULT_SEPARATOR, GroupOutcome, MemberInput, group, group_key, members_digest,
};
pub use writer::{
    AggregateReport, WrittenBundle, aggregate, aggregate_into, bundle_path, is_bundle_file,
};
