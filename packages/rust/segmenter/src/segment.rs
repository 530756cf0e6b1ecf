//! Heading-addressed segmentation of a block tree.
//!
//! One accumulator is open at any time. Headings H1–H3 close it and open a
//! new one; everything else (plain paragraphs, deeper headings, flattened
//! table rows) is appended to whichever accumulator is open. An accumulator
//! is emitted only if something was appended to it.

use docharvest_shared::{Block, INTRO_HEADING, Section};

/// Deepest heading level that opens a new section.
pub const MAX_SECTION_LEVEL: u8 = 3;

/// Cell separator used when flattening table rows.
const CELL_SEPARATOR: &str = " | ";

/// The section currently being filled.
struct Accumulator {
    heading: String,
    level: u8,
    buffer: Vec<String>,
}

impl Accumulator {
    fn intro() -> Self {
        Self {
            heading: INTRO_HEADING.to_string(),
            level: 1,
            buffer: Vec::new(),
        }
    }

    fn opened_by(text: &str, level: u8) -> Self {
        let trimmed = text.trim();
        let heading = if trimmed.is_empty() {
            format!("HEADING_{level}")
        } else {
            trimmed.to_string()
        };
        Self {
            heading,
            level,
            buffer: Vec::new(),
        }
    }

    fn push(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if !fragment.is_empty() {
            self.buffer.push(fragment.to_string());
        }
    }
}

/// Split a document tree into ordered sections.
///
/// Pure and deterministic: the same tree always yields the same sections.
pub fn segment(tree: &[Block]) -> Vec<Section> {
    let mut flushed: Vec<Accumulator> = Vec::new();
    let mut current = Accumulator::intro();

    for block in tree {
        match block {
            Block::Paragraph {
                text,
                heading_level: Some(level),
            } if (1..=MAX_SECTION_LEVEL).contains(level) => {
                let next = Accumulator::opened_by(text, *level);
                let done = std::mem::replace(&mut current, next);
                if !done.buffer.is_empty() {
                    flushed.push(done);
                }
            }
            Block::Paragraph { text, .. } => current.push(text),
            Block::Table { rows } => {
                for row in rows {
                    current.push(&flatten_row(row));
                }
            }
        }
    }

    if !current.buffer.is_empty() {
        flushed.push(current);
    }

    flushed
        .into_iter()
        .filter_map(|acc| {
            let text = acc.buffer.join(" ").trim().to_string();
            (!text.is_empty()).then_some((acc.heading, acc.level, text))
        })
        .enumerate()
        .map(|(index, (heading, level, text))| Section {
            index,
            heading,
            level,
            text,
        })
        .collect()
}

/// Join the non-empty trimmed cells of a row.
fn flatten_row(row: &[String]) -> String {
    row.iter()
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .collect::<Vec<_>>()
        .join(CELL_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_headings_and_flattens_tables() {
        let tree = vec![
            Block::heading(1, "Intro"),
            Block::text("hello"),
            Block::heading(2, "Setup"),
            Block::text("step one"),
            Block::table([["a", "b"]]),
        ];

        let sections = segment(&tree);
        assert_eq!(
            sections,
            vec![
                Section {
                    index: 0,
                    heading: "Intro".into(),
                    level: 1,
                    text: "hello".into(),
                },
                Section {
                    index: 1,
                    heading: "Setup".into(),
                    level: 2,
                    text: "step one a | b".into(),
                },
            ]
        );
    }

    #[test]
    fn consecutive_headings_produce_nothing() {
        let tree = vec![
            Block::heading(1, "One"),
            Block::heading(2, "Two"),
            Block::heading(3, "Three"),
        ];
        assert!(segment(&tree).is_empty());
    }

    #[test]
    fn empty_heading_is_dropped_and_indices_stay_dense() {
        let tree = vec![
            Block::text("preamble"),
            Block::heading(1, "Empty"),
            Block::heading(2, "Full"),
            Block::text("body"),
        ];
        let sections = segment(&tree);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, "INTRO");
        assert_eq!(sections[0].index, 0);
        assert_eq!(sections[1].heading, "Full");
        assert_eq!(sections[1].index, 1);
    }

    #[test]
    fn content_before_first_heading_goes_to_intro() {
        let sections = segment(&[Block::text("  lead paragraph  ")]);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "INTRO");
        assert_eq!(sections[0].level, 1);
        assert_eq!(sections[0].text, "lead paragraph");
    }

    #[test]
    fn blank_heading_gets_placeholder() {
        let tree = vec![Block::heading(2, "   "), Block::text("content")];
        let sections = segment(&tree);
        assert_eq!(sections[0].heading, "HEADING_2");
        assert_eq!(sections[0].level, 2);
    }

    #[test]
    fn deep_headings_are_plain_text() {
        let tree = vec![
            Block::heading(2, "API"),
            Block::heading(4, "Parameters"),
            Block::text("takes two"),
        ];
        let sections = segment(&tree);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "API");
        assert_eq!(sections[0].text, "Parameters takes two");
    }

    #[test]
    fn level_zero_is_plain_text() {
        let sections = segment(&[Block::heading(0, "odd")]);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "INTRO");
        assert_eq!(sections[0].text, "odd");
    }

    #[test]
    fn table_rows_skip_empty_cells_and_rows() {
        let tree = vec![
            Block::heading(1, "Matrix"),
            Block::table(vec![
                vec![" x ", "", "y"],
                vec!["", "  "],
                vec!["z"],
            ]),
        ];
        let sections = segment(&tree);
        assert_eq!(sections[0].text, "x | y z");
    }

    #[test]
    fn table_only_document_lands_in_intro() {
        let sections = segment(&[Block::table([["k", "v"]])]);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "INTRO");
        assert_eq!(sections[0].text, "k | v");
    }

    #[test]
    fn blank_paragraphs_are_ignored() {
        let tree = vec![
            Block::heading(1, "Title"),
            Block::text("\n"),
            Block::text("   "),
        ];
        assert!(segment(&tree).is_empty());
    }

    #[test]
    fn segmentation_is_deterministic() {
        let tree = vec![
            Block::text("before"),
            Block::heading(1, "A"),
            Block::text("alpha"),
            Block::table([["1", "2"], ["3", "4"]]),
            Block::heading(3, "B"),
            Block::text("beta"),
        ];
        assert_eq!(segment(&tree), segment(&tree));
    }

    #[test]
    fn empty_tree_yields_no_sections() {
        assert!(segment(&[]).is_empty());
    }
}
