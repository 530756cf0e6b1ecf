//! Concurrent fetch stage.
//!
//! This crate provides:
//! - [`Fetcher`]: bounded worker pool with per-item timeout, fault
//!   isolation and cooperative cancellation ([`CancelToken`])
//! - [`ItemProcessor`]: the per-item seam the pool drives
//! - [`ConfluenceProcessor`] / [`GdocsProcessor`]: fetch one item, segment
//!   it, and persist a `DocumentRecord` through a [`DocumentWriter`]

pub mod engine;
pub mod processor;

pub use engine::{
    CancelToken, FetchReport, Fetcher, ItemProcessor, ProcessedItem, ResultObserver, not_started,
};
pub use processor::{
    ConfluenceProcessor, DOCUMENTS_PREFIX, DocumentWriter, GdocsProcessor, build_record,
};
