use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::{Block, BlockKind, Cell, StyleRef};
use crate::markup::html_table::parse_html_table;
use crate::markup::{
    escape_cell, escape_paragraph, split_row, split_slot_markup, unescape_cell,
    unescape_paragraph, CELL_SLOT_SEP,
};

pub const STYLE_PARA: &str = "md:para";
pub const STYLE_HEADING: &str = "md:heading";
pub const STYLE_IMAGE: &str = "md:image";
pub const STYLE_VERBATIM: &str = "md:verbatim";
pub const STYLE_TABLE: &str = "md:table";
pub const STYLE_HTML_TABLE: &str = "md:html-table";

static ATX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})(?:[ \t]+(.*?))?[ \t]*$").expect("atx regex"));
static ATX_CLOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[ \t]+)#+[ \t]*$").expect("atx close regex"));
static DELIM_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\|?[ \t]*:?-{1,}:?[ \t]*(\|[ \t]*:?-{1,}:?[ \t]*)*\|?$").expect("delim regex")
});
static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^!\[[^\]]*\]\([^)]*\)(\{[^}]*\})?$").expect("image regex")
});
static LIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*(?:[-+*]|\d{1,9}[.)])(?:[ \t]|$)").expect("list regex"));
static SETEXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(=+|-+)[ \t]*$").expect("setext regex"));

/// Splits Markdown into raw blocks on blank lines, keeping fenced code (which may contain
/// blank lines) in one piece.
pub fn split_raw_blocks(markdown: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut fence: Option<&str> = None;

    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if let Some(marker) = fence {
            current.push(line);
            if trimmed.starts_with(marker) {
                fence = None;
            }
            continue;
        }
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if current.is_empty() {
            if trimmed.starts_with("```") {
                fence = Some("```");
            } else if trimmed.starts_with("~~~") {
                fence = Some("~~~");
            }
        }
        current.push(line);
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
}

/// Parses Markdown (as produced by Pandoc or MinerU) into structural blocks.
pub fn parse_blocks(markdown: &str) -> Vec<Block> {
    let mut out = Vec::new();
    for raw in split_raw_blocks(markdown) {
        classify(&raw, &mut out);
    }
    out
}

fn classify(raw: &str, out: &mut Vec<Block>) {
    let lines: Vec<&str> = raw.lines().collect();
    let Some(first) = lines.first().copied() else {
        return;
    };
    let first_trim = first.trim_start();

    if first_trim.starts_with("```") || first_trim.starts_with("~~~") || first_trim.starts_with(":::")
    {
        out.push(verbatim(raw));
        return;
    }

    let html_start = first_trim
        .strip_prefix('<')
        .is_some_and(|s| s.starts_with(|c: char| c.is_ascii_alphabetic() || c == '/' || c == '!'));
    if html_start {
        let lower = first_trim.to_ascii_lowercase();
        if lower.contains("<table") || lower.starts_with("<html") {
            if let Some(rows) = parse_html_table(raw) {
                out.push(Block::table(rows, StyleRef::new(STYLE_HTML_TABLE)));
                return;
            }
        }
        out.push(verbatim(raw));
        return;
    }

    if let Some(caps) = ATX_RE.captures(first) {
        let level = caps[1].len() as u8;
        let text = caps.get(2).map_or("", |m| m.as_str());
        out.push(Block::heading(
            level,
            unescape_heading(text),
            StyleRef::new(STYLE_HEADING),
        ));
        if lines.len() > 1 {
            classify(&lines[1..].join("\n"), out);
        }
        return;
    }

    if lines.len() == 2 && !LIST_RE.is_match(first) {
        if let Some(caps) = SETEXT_RE.captures(lines[1]) {
            let level = if caps[1].starts_with('=') { 1 } else { 2 };
            out.push(Block::heading(
                level,
                unescape_paragraph(first.trim()),
                StyleRef::new(STYLE_HEADING),
            ));
            return;
        }
    }

    if lines.len() >= 2
        && first_trim.starts_with('|')
        && DELIM_ROW_RE.is_match(lines[1].trim())
        && lines.iter().all(|l| l.trim_start().starts_with('|'))
    {
        out.push(parse_pipe_table(&lines));
        return;
    }

    if lines.len() == 1 && IMAGE_RE.is_match(first.trim()) {
        out.push(Block::image(StyleRef::new(format!(
            "{STYLE_IMAGE}:{}",
            first.trim()
        ))));
        return;
    }

    if LIST_RE.is_match(first) || first_trim.starts_with('>') {
        out.push(verbatim(raw));
        return;
    }

    out.push(Block::paragraph(
        unescape_paragraph(raw),
        StyleRef::new(STYLE_PARA),
    ));
}

fn verbatim(raw: &str) -> Block {
    Block::paragraph(raw, StyleRef::new(STYLE_VERBATIM))
}

fn unescape_heading(text: &str) -> String {
    let text = ATX_CLOSE_RE.replace(text, "");
    let text = text.trim();
    match text.strip_suffix("\\#") {
        Some(head) => format!("{head}#"),
        None => text.to_string(),
    }
}

fn escape_heading(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.strip_suffix('#') {
        Some(head) => format!("{head}\\#"),
        None => flat,
    }
}

fn parse_pipe_table(lines: &[&str]) -> Block {
    let delimiter = lines[1].trim().to_string();
    let rows = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .map(|(_, line)| {
            split_row(line)
                .iter()
                .map(|c| {
                    Cell::new(
                        split_slot_markup(c)
                            .into_iter()
                            .map(|s| Block::paragraph(unescape_cell(s.trim()), StyleRef::default()))
                            .collect(),
                    )
                })
                .collect()
        })
        .collect();
    Block::table(rows, StyleRef::new(format!("{STYLE_TABLE}:{delimiter}")))
}

/// Renders blocks back into Markdown, escaping translated text so it cannot turn into
/// structural markup.
pub fn render_blocks<'a, I>(blocks: I) -> String
where
    I: IntoIterator<Item = &'a Block>,
{
    blocks
        .into_iter()
        .map(render_block)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn render_block(block: &Block) -> String {
    match block.kind {
        BlockKind::Heading { level } => {
            let hashes = "#".repeat(usize::from(level.clamp(1, 6)));
            format!("{hashes} {}", escape_heading(&block.text))
        }
        BlockKind::Paragraph => {
            if block.style_ref.as_str() == STYLE_VERBATIM {
                block.text.clone()
            } else {
                escape_paragraph(&block.text)
            }
        }
        BlockKind::Table => render_table(block),
        BlockKind::Image => block
            .style_ref
            .as_str()
            .strip_prefix(STYLE_IMAGE)
            .and_then(|s| s.strip_prefix(':'))
            .unwrap_or("")
            .to_string(),
    }
}

/// Text of a cell for a pipe table: its text slots joined by [`CELL_SLOT_SEP`].
pub fn cell_markup(cell: &Cell) -> String {
    cell.blocks
        .iter()
        .flat_map(Block::texts)
        .map(escape_cell)
        .collect::<Vec<_>>()
        .join(CELL_SLOT_SEP)
}

fn render_table(block: &Block) -> String {
    let (_, cols) = block.table_shape();
    if cols == 0 {
        return String::new();
    }
    let delimiter = block
        .style_ref
        .as_str()
        .strip_prefix(STYLE_TABLE)
        .and_then(|s| s.strip_prefix(':'))
        .filter(|d| split_row(d).len() == cols)
        .map(str::to_string)
        .unwrap_or_else(|| format!("|{}", "---|".repeat(cols)));

    let mut lines = Vec::with_capacity(block.rows.len() + 1);
    for (i, row) in block.rows.iter().enumerate() {
        let cells: Vec<String> = row.iter().map(cell_markup).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
        if i == 0 {
            lines.push(delimiter.clone());
        }
    }
    lines.join("\n")
}
