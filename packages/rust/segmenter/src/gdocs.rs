//! Google Docs document JSON → [`DocumentTree`].
//!
//! Only `paragraph` and `table` structural elements map onto blocks.
//! Anything else (section breaks, tables of contents, shapes added by
//! future API versions) is skipped and counted.

use docharvest_shared::{Block, DocumentTree, HarvestError, Result};
use serde::Deserialize;
use tracing::debug;

/// A parsed Docs document.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub title: String,
    pub blocks: DocumentTree,
    /// Structural elements that matched neither block shape.
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Body,
}

#[derive(Debug, Default, Deserialize)]
struct Body {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Debug, Deserialize)]
struct StructuralElement {
    paragraph: Option<Paragraph>,
    table: Option<Table>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paragraph {
    #[serde(default)]
    elements: Vec<ParagraphElement>,
    paragraph_style: Option<ParagraphStyle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphElement {
    text_run: Option<TextRun>,
}

#[derive(Debug, Deserialize)]
struct TextRun {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphStyle {
    named_style_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    #[serde(default)]
    table_rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableRow {
    #[serde(default)]
    table_cells: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

/// Parse a `documents.get` response body.
pub fn parse_gdocs(json: &str) -> Result<ParsedDocument> {
    let doc: Document = serde_json::from_str(json)
        .map_err(|e| HarvestError::parse(format!("invalid Docs document: {e}")))?;

    let mut blocks = Vec::with_capacity(doc.body.content.len());
    let mut skipped = 0;

    for element in &doc.body.content {
        match (&element.paragraph, &element.table) {
            (Some(p), _) => blocks.push(Block::Paragraph {
                text: paragraph_text(p),
                heading_level: p
                    .paragraph_style
                    .as_ref()
                    .and_then(|s| s.named_style_type.as_deref())
                    .and_then(heading_level),
            }),
            (None, Some(t)) => blocks.push(Block::Table {
                rows: t
                    .table_rows
                    .iter()
                    .map(|row| row.table_cells.iter().map(cell_text).collect())
                    .collect(),
            }),
            (None, None) => skipped += 1,
        }
    }

    debug!(
        title = %doc.title,
        blocks = blocks.len(),
        skipped,
        "parsed Docs document"
    );

    Ok(ParsedDocument {
        title: doc.title,
        blocks,
        skipped,
    })
}

fn paragraph_text(p: &Paragraph) -> String {
    p.elements
        .iter()
        .filter_map(|e| e.text_run.as_ref())
        .map(|run| run.content.as_str())
        .collect()
}

fn cell_text(cell: &TableCell) -> String {
    cell.content
        .iter()
        .filter_map(|e| e.paragraph.as_ref())
        .map(paragraph_text)
        .collect()
}

/// `HEADING_<n>` → `n`. Other named styles (`TITLE`, `NORMAL_TEXT`) are not headings.
fn heading_level(style: &str) -> Option<u8> {
    style.strip_prefix("HEADING_")?.parse().ok()
}
