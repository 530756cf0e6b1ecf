//! Rendered HTML → [`DocumentTree`].
//!
//! Walks the `<body>` in document order. Headings and tables become their
//! own blocks; inline content is gathered into paragraphs at the nearest
//! block boundary; page chrome is skipped. Past `MAX_DEPTH` nesting
//! levels a subtree is flattened to its text.

use std::sync::LazyLock;

use docharvest_shared::{Block, DocumentTree};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Elements whose content never reaches the tree.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "noscript", "svg", "iframe", "head", "template", "button",
];

/// Elements treated as part of the surrounding paragraph.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "cite", "code", "data", "dfn", "em", "i", "kbd", "label",
    "mark", "q", "s", "samp", "small", "span", "strong", "sub", "sup", "time", "u", "var",
];

/// Element nesting walked structurally before falling back to flat text.
const MAX_DEPTH: usize = 128;

static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid selector"));

/// Parse an HTML document (or fragment) into blocks.
pub fn parse_html(html: &str) -> DocumentTree {
    let doc = Html::parse_document(html);
    let root = doc
        .select(&BODY_SEL)
        .next()
        .unwrap_or_else(|| doc.root_element());

    let mut blocks = Vec::new();
    walk(root, &mut blocks, 0);
    debug!(blocks = blocks.len(), "parsed html into block tree");
    blocks
}

fn walk(el: ElementRef<'_>, out: &mut Vec<Block>, depth: usize) {
    let mut loose = String::new();

    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            loose.push_str(text);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child_el.value().name();

        if name == "br" {
            loose.push(' ');
            continue;
        }
        if INLINE_TAGS.contains(&name) {
            loose.push_str(&inline_text(child_el, depth + 1));
            continue;
        }

        flush_paragraph(&mut loose, out);

        if SKIP_TAGS.contains(&name) {
            continue;
        }
        if let Some(level) = heading_level(name) {
            out.push(Block::heading(
                level,
                collapse_whitespace(&inline_text(child_el, depth + 1)),
            ));
        } else if name == "table" {
            if let Some(table) = table_block(child_el, depth + 1) {
                out.push(table);
            }
        } else if name == "pre" {
            let text: String = child_el.text().collect();
            if !text.trim().is_empty() {
                out.push(Block::text(text.trim()));
            }
        } else if depth >= MAX_DEPTH {
            let text = collapse_whitespace(&flat_text(child_el));
            if !text.is_empty() {
                out.push(Block::text(text));
            }
        } else {
            walk(child_el, out, depth + 1);
        }
    }

    flush_paragraph(&mut loose, out);
}

fn flush_paragraph(loose: &mut String, out: &mut Vec<Block>) {
    let text = collapse_whitespace(loose);
    if !text.is_empty() {
        out.push(Block::text(text));
    }
    loose.clear();
}

/// Text of an inline subtree, without content of skipped elements.
fn inline_text(el: ElementRef<'_>, depth: usize) -> String {
    if depth >= MAX_DEPTH {
        return flat_text(el);
    }
    let mut text = String::new();
    for child in el.children() {
        if let Some(t) = child.value().as_text() {
            text.push_str(t);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if SKIP_TAGS.contains(&name) {
                continue;
            }
            if name == "br" {
                text.push(' ');
            } else {
                text.push_str(&inline_text(child_el, depth + 1));
            }
        }
    }
    text
}

/// Text of every descendant without recursion, minus skipped elements.
fn flat_text(el: ElementRef<'_>) -> String {
    el.descendants()
        .filter_map(|node| node.value().as_text().map(|text| (node, text)))
        .filter(|(node, _)| {
            !node
                .ancestors()
                .take_while(|ancestor| ancestor.id() != el.id())
                .any(|ancestor| {
                    ancestor
                        .value()
                        .as_element()
                        .is_some_and(|e| SKIP_TAGS.contains(&e.name()))
                })
        })
        .map(|(_, text)| &**text)
        .collect()
}

/// Rows owned by this table: direct `tr` children or those of its row
/// groups. Rows of nested tables stay inside their cell's text.
fn table_rows<'a>(table: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|row| row.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

fn table_block(table: ElementRef<'_>, depth: usize) -> Option<Block> {
    let rows: Vec<Vec<String>> = table_rows(table)
        .into_iter()
        .map(|tr| {
            tr.children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| matches!(cell.value().name(), "td" | "th"))
                .map(|cell| collapse_whitespace(&inline_text(cell, depth + 3)))
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    (!rows.is_empty()).then_some(Block::Table { rows })
}

fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
