//! Optional Markdown rendition of fetched HTML.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use docharvest_shared::{HarvestError, Result};

/// Frontmatter fields written at the top of a rendition.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub source_url: String,
    pub title: String,
    /// RFC 3339 timestamp.
    pub fetched_at: Option<String>,
}

/// Convert HTML to Markdown with a YAML frontmatter block.
#[instrument(skip(html), fields(url = %opts.source_url))]
pub fn render_markdown(html: &str, opts: &RenderOptions) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    let raw = converter
        .convert(html)
        .map_err(|e| HarvestError::Conversion(format!("htmd conversion failed: {e}")))?;

    let body = collapse_blank_lines(raw.trim());
    debug!(len = body.len(), "markdown rendition complete");

    let frontmatter = build_frontmatter(opts);
    Ok(format!("{frontmatter}\n{body}\n"))
}

fn collapse_blank_lines(md: &str) -> String {
    static BLANKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
    BLANKS_RE.replace_all(md, "\n\n").into_owned()
}

fn build_frontmatter(opts: &RenderOptions) -> String {
    let mut fm = String::from("---\n");
    fm.push_str(&format!("source_url: \"{}\"\n", escape_yaml_string(&opts.source_url)));
    fm.push_str(&format!("title: \"{}\"\n", escape_yaml_string(&opts.title)));
    if let Some(ts) = &opts.fetched_at {
        fm.push_str(&format!("fetched_at: \"{ts}\"\n"));
    }
    fm.push_str("---\n");
    fm
}

fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
