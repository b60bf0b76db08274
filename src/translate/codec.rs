//! Request text for one chunk, and the way back from a model reply to blocks.
//!
//! Only blocks with some non-blank text are sent. Everything else (images, empty
//! paragraphs, tables of empty cells) keeps its position and is carried over unchanged.

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::ir::{Block, BlockKind, Cell};
use crate::markup::markdown::{cell_markup, parse_blocks, render_blocks};
use crate::markup::{escape_cell, split_cell_slots, split_row, CELL_SLOT_SEP};

pub const TABLE_OPEN: &str = "[TABLE]";
pub const TABLE_CLOSE: &str = "[/TABLE]";

/// How chunk text is laid out for the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptStyle {
    /// Paragraphs as text, tables between `[TABLE]` markers.
    Plain,
    /// Markdown: ATX headings and pipe tables.
    Structured,
}

impl PromptStyle {
    pub fn from_structured(structured: bool) -> Self {
        if structured {
            Self::Structured
        } else {
            Self::Plain
        }
    }
}

pub fn needs_translation(block: &Block) -> bool {
    block.texts().iter().any(|t| !t.trim().is_empty())
}

/// The request body for `chunk`, or an empty string when nothing in it needs translating.
pub fn encode(chunk: &Chunk, style: PromptStyle) -> String {
    let sent = chunk.blocks.iter().filter(|b| needs_translation(b));
    match style {
        PromptStyle::Plain => sent.map(encode_plain).collect::<Vec<_>>().join("\n\n"),
        PromptStyle::Structured => render_blocks(sent),
    }
}

fn encode_plain(block: &Block) -> String {
    match block.kind {
        BlockKind::Table => {
            let mut lines = Vec::with_capacity(block.rows.len() + 2);
            lines.push(TABLE_OPEN.to_string());
            for row in &block.rows {
                let cells: Vec<String> = row.iter().map(plain_cell).collect();
                lines.push(format!("| {} |", cells.join(" | ")));
            }
            lines.push(TABLE_CLOSE.to_string());
            lines.join("\n")
        }
        _ => flatten_blank_lines(&block.text),
    }
}

fn plain_cell(cell: &Cell) -> String {
    cell.blocks
        .iter()
        .flat_map(Block::texts)
        .map(escape_cell)
        .collect::<Vec<_>>()
        .join(CELL_SLOT_SEP)
}

// A blank line inside a block would read as a block boundary.
fn flatten_blank_lines(text: &str) -> String {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rebuilds the chunk's blocks from `reply`. The reply must hold one segment per sent
/// block, in order, with the same kind and the same table layout.
pub fn decode(chunk: &Chunk, reply: &str, style: PromptStyle) -> Result<Vec<Block>> {
    let reply = strip_code_fence(reply);
    let segments = match style {
        PromptStyle::Plain => plain_segments(reply),
        PromptStyle::Structured => structured_segments(reply),
    };
    let fail = |reason: String| Error::translation(Some(chunk.index), reason);

    let sent = chunk.blocks.iter().filter(|b| needs_translation(b)).count();
    if segments.len() != sent {
        return Err(fail(format!(
            "reply has {} blocks, expected {sent}",
            segments.len()
        )));
    }

    let mut segments = segments.into_iter();
    let mut out = Vec::with_capacity(chunk.blocks.len());
    for (pos, block) in chunk.blocks.iter().enumerate() {
        if !needs_translation(block) {
            out.push(block.clone());
            continue;
        }
        let Some(segment) = segments.next() else {
            return Err(fail(format!("reply ended before block {pos}")));
        };
        let mut texts = segment_texts(block, segment)
            .map_err(|reason| fail(format!("block {pos}: {reason}")))?
            .into_iter();
        let rebuilt = block
            .with_texts(&mut texts)
            .ok_or_else(|| fail(format!("block {pos}: too few text slots")))?;
        out.push(rebuilt);
    }
    Ok(out)
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Table(Vec<Vec<String>>),
}

fn segment_texts(block: &Block, segment: Segment) -> std::result::Result<Vec<String>, String> {
    match (block.kind, segment) {
        (BlockKind::Paragraph | BlockKind::Heading { .. }, Segment::Text(text)) => Ok(vec![text]),
        (BlockKind::Table, Segment::Table(rows)) => table_texts(block, rows),
        (BlockKind::Table, Segment::Text(_)) => Err("table came back as text".to_string()),
        (_, Segment::Table(_)) => Err(format!("{:?} came back as a table", block.kind)),
        (BlockKind::Image, _) => Err("image blocks are never sent".to_string()),
    }
}

fn table_texts(block: &Block, rows: Vec<Vec<String>>) -> std::result::Result<Vec<String>, String> {
    if rows.len() != block.rows.len() {
        return Err(format!(
            "table has {} rows, expected {}",
            rows.len(),
            block.rows.len()
        ));
    }
    let mut texts = Vec::new();
    for (r, (got, want)) in rows.into_iter().zip(&block.rows).enumerate() {
        if got.len() != want.len() {
            return Err(format!(
                "row {r} has {} cells, expected {}",
                got.len(),
                want.len()
            ));
        }
        for (c, (cell, source)) in got.into_iter().zip(want).enumerate() {
            let expected: usize = source.blocks.iter().map(|b| b.texts().len()).sum();
            let slots = split_cell_slots(&cell, expected).ok_or_else(|| {
                format!("cell {r}:{c} does not split into {expected} text slots")
            })?;
            texts.extend(slots);
        }
    }
    Ok(texts)
}

fn plain_segments(reply: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut para: Vec<&str> = Vec::new();
    let mut table: Option<Vec<Vec<String>>> = None;

    let flush = |para: &mut Vec<&str>, out: &mut Vec<Segment>| {
        if !para.is_empty() {
            out.push(Segment::Text(para.join("\n")));
            para.clear();
        }
    };

    for line in reply.lines() {
        let trimmed = line.trim();
        if let Some(rows) = table.as_mut() {
            if trimmed == TABLE_CLOSE {
                out.push(Segment::Table(std::mem::take(rows)));
                table = None;
            } else if !trimmed.is_empty() {
                rows.push(split_row(trimmed));
            }
            continue;
        }
        if trimmed == TABLE_OPEN {
            flush(&mut para, &mut out);
            table = Some(Vec::new());
        } else if trimmed.is_empty() {
            flush(&mut para, &mut out);
        } else {
            para.push(line);
        }
    }
    flush(&mut para, &mut out);
    // an unterminated table still counts; the row check decides whether it is usable
    if let Some(rows) = table {
        out.push(Segment::Table(rows));
    }
    out
}

fn structured_segments(reply: &str) -> Vec<Segment> {
    parse_blocks(reply)
        .into_iter()
        .filter_map(|block| match block.kind {
            // a heading level the model changed is taken back at the source level
            BlockKind::Paragraph | BlockKind::Heading { .. } => Some(Segment::Text(block.text)),
            BlockKind::Table => Some(Segment::Table(
                block
                    .rows
                    .iter()
                    .map(|row| row.iter().map(cell_markup).collect())
                    .collect(),
            )),
            // images the model echoed back carry no text
            BlockKind::Image => None,
        })
        .collect()
}

/// Models sometimes wrap the whole answer in a code fence. Only the fence lines are
/// removed; the text inside keeps its indentation.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return reply;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return reply;
    };
    match body.split_once('\n') {
        Some((info, inner)) if !info.trim().contains(' ') => inner,
        _ => reply,
    }
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, PromptStyle};
    use crate::chunk::Chunk;
    use crate::error::Error;
    use crate::ir::{Block, BlockKind, Cell, StyleRef};

    fn chunk() -> Chunk {
        Chunk::new(
            4,
            vec![
                Block::heading(1, "Scope", StyleRef::new("w:p@0")),
                Block::paragraph("Applies to | all sites.", StyleRef::new("w:p@1")),
                Block::image(StyleRef::new("w:p@2")),
                Block::paragraph("Figure 1", StyleRef::new("w:p@3")),
                Block::table(
                    vec![
                        vec![Cell::text("Part"), Cell::text("")],
                        vec![
                            Cell::new(vec![
                                Block::paragraph("Bolt", StyleRef::default()),
                                Block::paragraph("M6", StyleRef::default()),
                            ]),
                            Cell::text("4"),
                        ],
                    ],
                    StyleRef::new("w:tbl@4"),
                ),
            ],
        )
    }

    #[test]
    fn plain_request_marks_tables_and_skips_images() {
        let text = encode(&chunk(), PromptStyle::Plain);
        assert_eq!(
            text,
            "Scope\n\nApplies to | all sites.\n\nFigure 1\n\n[TABLE]\n| Part |  |\n| Bolt<br>M6 | 4 |\n[/TABLE]"
        );
    }

    #[test]
    fn identity_reply_decodes_to_the_same_blocks() {
        let c = chunk();
        for style in [PromptStyle::Plain, PromptStyle::Structured] {
            let reply = encode(&c, style);
            let blocks = decode(&c, &reply, style).expect("decode");
            assert_eq!(blocks, c.blocks, "{style:?}");
        }
    }

    #[test]
    fn escapes_and_whitespace_survive_an_identity_reply() {
        let c = Chunk::new(
            0,
            vec![
                Block::paragraph("  indented first line\nsecond line  ", StyleRef::new("p0")),
                Block::paragraph("before\n\nafter two breaks", StyleRef::new("p1")),
                Block::table(
                    vec![
                        vec![Cell::text("Pattern"), Cell::text("Meaning")],
                        vec![Cell::text("a\\|b"), Cell::text("literal pipe")],
                        vec![Cell::text("Use <br> for a line break"), Cell::text("C:\\temp\\")],
                    ],
                    StyleRef::new("t0"),
                ),
            ],
        );
        for style in [PromptStyle::Plain, PromptStyle::Structured] {
            let reply = encode(&c, style);
            let blocks = decode(&c, &reply, style).expect("decode");
            if style == PromptStyle::Structured {
                assert_eq!(blocks, c.blocks, "{style:?}");
            } else {
                // plain requests use blank lines as block boundaries
                assert_eq!(blocks[1].text, "before\nafter two breaks");
                assert_eq!(blocks[0], c.blocks[0]);
                assert_eq!(blocks[2], c.blocks[2]);
            }
        }
    }

    #[test]
    fn plain_reply_with_translated_cells() {
        let c = chunk();
        let reply = "Umfang\n\nGilt für | alle Standorte.\n\nAbbildung 1\n\n[TABLE]\n| Teil |  |\n| Schraube <br> M6 | 4 |\n[/TABLE]\n";
        let blocks = decode(&c, reply, PromptStyle::Plain).expect("decode");
        assert_eq!(blocks[0].text, "Umfang");
        assert_eq!(blocks[1].text, "Gilt für | alle Standorte.");
        assert_eq!(blocks[2].kind, BlockKind::Image);
        assert_eq!(blocks[4].texts(), vec!["Teil", "", "Schraube", "M6", "4"]);
    }

    #[test]
    fn structured_request_escapes_pipes_in_paragraphs() {
        let c = chunk();
        let text = encode(&c, PromptStyle::Structured);
        assert!(text.starts_with("# Scope\n\nApplies to | all sites."));
        let reply = text.replace("Applies to", "Gilt für");
        let blocks = decode(&c, &format!("```markdown\n{reply}\n```"), PromptStyle::Structured)
            .expect("decode");
        assert_eq!(blocks[1].text, "Gilt für | all sites.");
        assert_eq!(blocks[4].table_shape(), (2, 2));
    }

    #[test]
    fn dropped_block_is_a_translation_failure() {
        let c = chunk();
        let err = decode(&c, "Umfang\n\nAbbildung 1", PromptStyle::Plain).unwrap_err();
        assert!(matches!(
            err,
            Error::TranslationFailure {
                chunk_index: Some(4),
                ..
            }
        ));
    }

    #[test]
    fn extra_column_is_a_translation_failure() {
        let c = chunk();
        let reply = "Umfang\n\nGilt.\n\nAbb. 1\n\n[TABLE]\n| Teil | | x |\n| Schraube<br>M6 | 4 |\n[/TABLE]";
        let err = decode(&c, reply, PromptStyle::Plain).unwrap_err();
        assert!(err.to_string().contains("row 0 has 3 cells"), "{err}");
    }

    #[test]
    fn chunk_without_text_sends_nothing() {
        let c = Chunk::new(0, vec![Block::image(StyleRef::default())]);
        assert_eq!(encode(&c, PromptStyle::Plain), "");
        assert_eq!(decode(&c, "", PromptStyle::Plain).expect("decode"), c.blocks);
    }
}
