//! Document conversion and heading-addressed segmentation.
//!
//! This crate provides:
//! - [`segment`]: split a [`DocumentTree`](docharvest_shared::DocumentTree) into ordered sections
//! - [`parse_html`]: rendered HTML (Confluence export view) → block tree
//! - [`parse_gdocs`]: Google Docs document JSON → block tree
//! - [`clean_text`] / [`brief`]: text cleanup for persisted records
//! - [`render_markdown`]: optional Markdown rendition of HTML

mod cleanup;
mod gdocs;
mod html;
mod render;
mod segment;

pub use cleanup::{BRIEF_WORDS, brief, clean_text};
pub use gdocs::{ParsedDocument, parse_gdocs};
pub use html::parse_html;
pub use render::{RenderOptions, render_markdown};
pub use segment::{MAX_SECTION_LEVEL, segment};
