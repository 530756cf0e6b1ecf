//! Pipeline orchestration for docharvest.
//!
//! - [`run_pipeline`]: detect changes, fetch and persist them through the
//!   worker pool, then bundle the stored documents
//! - [`retry_failed`]: re-run the failed items of an earlier run
//! - [`group_directory`]: standalone bundling of a directory of records
//! - [`build_backend`]: source + processor for a configured source kind

pub mod backend;
pub mod context;
pub mod pipeline;

pub use backend::{Backend, build_backend};
pub use docharvest_crawler::CancelToken;
pub use context::RunContext;
pub use pipeline::{
    BUNDLES_PREFIX, ProgressReporter, SilentProgress, group_directory, retry_failed, run_pipeline,
};
