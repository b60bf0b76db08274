use quick_xml::events::Event;
use quick_xml::Reader;

use crate::ir::Cell;

/// Reads the rows of an HTML `<table>` (as emitted by PDF extractors inside Markdown).
///
/// Cell content is flattened to text; `<br>` becomes a space. Returns `None` when the
/// markup is not a well-formed table, in which case callers keep the block verbatim.
pub fn parse_html_table(html: &str) -> Option<Vec<Vec<Cell>>> {
    let trimmed = html.trim();
    if !trimmed.starts_with('<') || !trimmed.ends_with('>') {
        return None;
    }
    let mut reader = Reader::from_str(trimmed);
    reader.config_mut().check_end_names = false;

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut row: Option<Vec<Cell>> = None;
    let mut cell: Option<String> = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event().ok()? {
            Event::Eof => break,
            Event::Start(e) => {
                let name = e.name();
                let name = name.as_ref();
                if name.eq_ignore_ascii_case(b"table") {
                    depth += 1;
                    if depth > 1 {
                        return None;
                    }
                } else if name.eq_ignore_ascii_case(b"tr") {
                    row = Some(Vec::new());
                } else if name.eq_ignore_ascii_case(b"td") || name.eq_ignore_ascii_case(b"th") {
                    cell = Some(String::new());
                } else if name.eq_ignore_ascii_case(b"br") {
                    push_text(&mut cell, " ");
                }
            }
            Event::Empty(e) => {
                let name = e.name();
                let name = name.as_ref();
                if name.eq_ignore_ascii_case(b"br") {
                    push_text(&mut cell, " ");
                } else if name.eq_ignore_ascii_case(b"td") || name.eq_ignore_ascii_case(b"th") {
                    if let Some(r) = row.as_mut() {
                        r.push(Cell::text(""));
                    }
                }
            }
            Event::End(e) => {
                let name = e.name();
                let name = name.as_ref();
                if name.eq_ignore_ascii_case(b"td") || name.eq_ignore_ascii_case(b"th") {
                    if let (Some(text), Some(r)) = (cell.take(), row.as_mut()) {
                        r.push(Cell::text(collapse_ws(&text)));
                    }
                } else if name.eq_ignore_ascii_case(b"tr") {
                    if let Some(r) = row.take() {
                        if !r.is_empty() {
                            rows.push(r);
                        }
                    }
                } else if name.eq_ignore_ascii_case(b"table") {
                    depth = depth.saturating_sub(1);
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                push_text(&mut cell, &text);
            }
            Event::CData(t) => {
                push_text(&mut cell, &String::from_utf8_lossy(&t));
            }
            _ => {}
        }
    }

    (!rows.is_empty()).then_some(rows)
}

fn push_text(cell: &mut Option<String>, text: &str) {
    if let Some(buf) = cell.as_mut() {
        buf.push_str(text);
    }
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
