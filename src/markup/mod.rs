//! Markup helpers shared by the Markdown-mediated adapters and the prompt codec.
//!
//! The one rule everything here follows: text coming out of a block is always plain
//! (unescaped) at the block level, and text going into markup is escaped so that it can
//! never introduce a heading, list, quote, fence or table column by accident.

pub mod html_table;
pub mod markdown;

/// Separator between the text slots of one table cell (cells holding several paragraphs).
pub const CELL_SLOT_SEP: &str = "<br>";

/// Byte offset of the character that must be backslash-escaped for `line` to be read as
/// ordinary paragraph text, or `None` if the line is already inert.
pub fn line_start_escape(line: &str) -> Option<usize> {
    let indent = line.len() - line.trim_start().len();
    let rest = &line[indent..];
    let mut chars = rest.chars();
    let first = chars.next()?;
    let second = chars.next();
    let ws_or_end = |c: Option<char>| c.map_or(true, char::is_whitespace);

    match first {
        '#' | '>' | '|' => return Some(indent),
        '\\' if rest.trim_end() == BLANK_LINE_MARK => return Some(indent),
        '-' | '+' | '*' if ws_or_end(second) => return Some(indent),
        '!' if second == Some('[') => return Some(indent),
        '<' if second.is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!') => {
            return Some(indent)
        }
        _ => {}
    }
    if rest.starts_with("```") || rest.starts_with("~~~") || rest.starts_with(":::") {
        return Some(indent);
    }
    let trimmed = rest.trim_end();
    let only = |c: char| !trimmed.is_empty() && trimmed.chars().all(|x| x == c || x == ' ');
    if only('=') || only('-') || only('*') || only('_') {
        return Some(indent);
    }
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 && digits <= 9 {
        let after = &rest[digits..];
        let mut it = after.chars();
        if matches!(it.next(), Some('.') | Some(')')) && ws_or_end(it.next()) {
            return Some(indent + digits);
        }
    }
    None
}

/// Line standing in for an empty line inside a paragraph; a real blank line would end it.
pub const BLANK_LINE_MARK: &str = "\\";

/// Escapes every line of paragraph text so none of them starts a block construct.
pub fn escape_paragraph(text: &str) -> String {
    text.lines().map(escape_line).collect::<Vec<_>>().join("\n")
}

fn escape_line(line: &str) -> String {
    if line.trim().is_empty() {
        return BLANK_LINE_MARK.to_string();
    }
    match line_start_escape(line) {
        Some(pos) => {
            let mut out = String::with_capacity(line.len() + 1);
            out.push_str(&line[..pos]);
            out.push('\\');
            out.push_str(&line[pos..]);
            out
        }
        None => line.to_string(),
    }
}

/// Exact inverse of [`escape_paragraph`] on a per-line basis: a backslash is removed only
/// where the escaper would have put it.
pub fn unescape_paragraph(text: &str) -> String {
    text.lines().map(unescape_line).collect::<Vec<_>>().join("\n")
}

fn unescape_line(line: &str) -> String {
    if line == BLANK_LINE_MARK {
        return String::new();
    }
    let indent = line.len() - line.trim_start().len();
    let digits = line[indent..]
        .chars()
        .take_while(char::is_ascii_digit)
        .count();
    for pos in [indent, indent + digits] {
        if line[pos..].starts_with('\\') {
            let candidate = format!("{}{}", &line[..pos], &line[pos + 1..]);
            if line_start_escape(&candidate) == Some(pos) {
                return candidate;
            }
        }
    }
    line.to_string()
}

/// Text of one pipe-table cell slot with line breaks flattened. Backslashes, pipes and a
/// literal [`CELL_SLOT_SEP`] are backslash-escaped.
pub fn escape_cell(text: &str) -> String {
    let flat = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let mut out = String::with_capacity(flat.len());
    for (i, ch) in flat.char_indices() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '<' if starts_with_slot_sep(&flat[i..]) => out.push_str("\\<"),
            _ => out.push(ch),
        }
    }
    out
}

/// Inverse of [`escape_cell`]. Any other backslash is kept as written.
pub fn unescape_cell(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, '\\' | '|' | '<') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}

fn starts_with_slot_sep(text: &str) -> bool {
    text.get(..CELL_SLOT_SEP.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(CELL_SLOT_SEP))
}

/// Splits a table row on unescaped pipes. Leading and trailing pipes are optional; cell
/// contents are trimmed but keep their escapes.
pub fn split_row(line: &str) -> Vec<String> {
    let body = line.trim();
    let body = body.strip_prefix('|').unwrap_or(body);
    let mut cells = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;
    // the last character was an unescaped pipe
    let mut closed = false;
    for ch in body.chars() {
        closed = false;
        if escaped {
            cur.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                cur.push(ch);
                escaped = true;
            }
            '|' => {
                cells.push(std::mem::take(&mut cur).trim().to_string());
                closed = true;
            }
            _ => cur.push(ch),
        }
    }
    if !closed {
        cells.push(cur.trim().to_string());
    }
    cells
}

/// Escaped cell markup cut at every unescaped [`CELL_SLOT_SEP`].
pub fn split_slot_markup(cell: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, ch) in cell.char_indices() {
        if i < start {
            continue;
        }
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '<' && starts_with_slot_sep(&cell[i..]) {
            parts.push(&cell[start..i]);
            start = i + CELL_SLOT_SEP.len();
        }
    }
    parts.push(&cell[start..]);
    parts
}

/// Splits escaped cell markup into `expected` unescaped text slots. A cell holding a
/// single slot is taken whole, whatever separators the reply put into it.
pub fn split_cell_slots(cell: &str, expected: usize) -> Option<Vec<String>> {
    match expected {
        0 => cell.trim().is_empty().then(Vec::new),
        1 => Some(vec![unescape_cell(cell.trim())]),
        _ => {
            let parts: Vec<String> = split_slot_markup(cell)
                .into_iter()
                .map(|s| unescape_cell(s.trim()))
                .collect();
            (parts.len() == expected).then_some(parts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        escape_cell, escape_paragraph, line_start_escape, split_cell_slots, split_row,
        split_slot_markup, unescape_cell, unescape_paragraph, CELL_SLOT_SEP,
    };

    #[test]
    fn block_tokens_are_escaped_at_line_start() {
        assert_eq!(escape_paragraph("# not a heading"), "\\# not a heading");
        assert_eq!(escape_paragraph("- item"), "\\- item");
        assert_eq!(escape_paragraph("12. point"), "12\\. point");
        assert_eq!(escape_paragraph("| a | b |"), "\\| a | b |");
        assert_eq!(escape_paragraph("> quoted"), "\\> quoted");
        assert_eq!(escape_paragraph("==="), "\\===");
        assert_eq!(escape_paragraph("<div>"), "\\<div>");
        assert_eq!(escape_paragraph("first\n# second"), "first\n\\# second");
    }

    #[test]
    fn inert_lines_are_left_alone() {
        for line in ["a | b", "-5 degrees", "*emphasis*", "2.5 mg", "<5 mg", "C# code"] {
            assert_eq!(line_start_escape(line), None, "{line}");
            assert_eq!(escape_paragraph(line), line);
        }
    }

    #[test]
    fn unescape_inverts_escape() {
        for text in [
            "# x",
            "- y",
            "3) z",
            "plain",
            "\\*stays escaped",
            "a\n> b\n1. c",
            "![not an image](x)",
        ] {
            assert_eq!(unescape_paragraph(&escape_paragraph(text)), text, "{text}");
        }
        // a backslash the escaper would not have written is kept
        assert_eq!(unescape_paragraph("\\*foo"), "\\*foo");
    }

    #[test]
    fn pipes_inside_cells_do_not_split_columns() {
        let cell = escape_cell("yes | no");
        let row = format!("| {cell} | other |");
        let cells = split_row(&row);
        assert_eq!(cells.len(), 2);
        assert_eq!(unescape_cell(&cells[0]), "yes | no");
        assert_eq!(cells[1], "other");
    }

    #[test]
    fn cell_slots_round_trip() {
        assert_eq!(
            split_cell_slots("a <br> b", 2),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(split_cell_slots("", 0), Some(vec![]));
        assert_eq!(split_cell_slots("x", 0), None);
        assert_eq!(split_cell_slots("a<br>b<br>c", 2), None);
        // a single slot is taken whole
        assert_eq!(split_cell_slots("a<br>b", 1), Some(vec!["a<br>b".to_string()]));
    }

    #[test]
    fn backslashes_and_separators_in_cells_round_trip() {
        for text in ["a\\|b", "ends with \\", "\\\\", "Use <br> for a line break", "<BR>", "x | y"] {
            let escaped = escape_cell(text);
            let row = format!("| {escaped} | {escaped} |");
            let cells = split_row(&row);
            assert_eq!(cells.len(), 2, "{text}: {row}");
            assert_eq!(cells[0], escaped);
            assert_eq!(split_cell_slots(&cells[0], 1), Some(vec![text.to_string()]));
            assert_eq!(unescape_cell(&cells[1]), text);
        }
        assert_eq!(escape_cell("a\\|b"), "a\\\\\\|b");
    }

    #[test]
    fn literal_separator_is_not_a_slot_boundary() {
        let cell = [escape_cell("Use <br> here"), escape_cell("second")].join(CELL_SLOT_SEP);
        assert_eq!(split_slot_markup(&cell).len(), 2);
        assert_eq!(
            split_cell_slots(&cell, 2),
            Some(vec!["Use <br> here".to_string(), "second".to_string()])
        );
    }

    #[test]
    fn trailing_pipe_after_escaped_backslash_closes_the_row() {
        assert_eq!(split_row("|a\\\\|b|"), vec!["a\\\\", "b"]);
        assert_eq!(split_row("| a \\| b |"), vec!["a \\| b"]);
    }

    #[test]
    fn blank_lines_inside_a_paragraph_survive() {
        for text in ["one\n\ntwo", "\\", "line\n\\\nend", "  indented\nnext"] {
            let escaped = escape_paragraph(text);
            assert!(!escaped.lines().any(|l| l.trim().is_empty()), "{escaped:?}");
            assert_eq!(unescape_paragraph(&escaped), text, "{text:?}");
        }
    }
}
