//! `word/document.xml` body to structural blocks.
//!
//! Every block keeps an anchor back to the event that opened it (`w:p@<index>` or
//! `w:tbl@<index>`), so reassembly can rewrite text in place and leave everything else
//! in the package untouched.

use std::collections::HashMap;

use anyhow::{anyhow, Context};

use crate::docx::xml::{element_end, find_attr, is_run_text_element, XmlEvent, XmlPart};
use crate::ir::{Block, Cell, StyleRef};

pub const DOCUMENT_PART: &str = "word/document.xml";
pub const STYLES_PART: &str = "word/styles.xml";

/// Containers a run may sit in and still count as the paragraph's own text.
const RUN_CONTAINERS: &[&str] = &[
    "w:hyperlink",
    "w:ins",
    "w:smartTag",
    "w:fldSimple",
    "w:customXml",
    "w:sdt",
    "w:sdtContent",
];

const GRAPHICS: &[&str] = &["w:drawing", "w:pict", "w:object"];

/// Block-level containers walked through transparently.
const BODY_CONTAINERS: &[&str] = &["w:sdt", "w:sdtContent", "w:customXml"];

/// Heading levels defined by `word/styles.xml`, keyed by style id.
#[derive(Debug, Default)]
pub struct StyleSheet {
    headings: HashMap<String, u8>,
}

impl StyleSheet {
    pub fn from_part(part: &XmlPart) -> Self {
        let mut headings = HashMap::new();
        let mut current: Option<(String, Option<String>, Option<i32>)> = None;

        for ev in &part.events {
            match ev {
                XmlEvent::Start { name, attrs } if name == "w:style" => {
                    current = find_attr(attrs, "w:styleId").map(|id| (id.to_string(), None, None));
                }
                XmlEvent::Empty { name, attrs } => {
                    if let Some((_, style_name, outline)) = current.as_mut() {
                        match name.as_str() {
                            "w:name" => {
                                *style_name = find_attr(attrs, "w:val").map(str::to_string)
                            }
                            "w:outlineLvl" => *outline = parse_i32(find_attr(attrs, "w:val")),
                            _ => {}
                        }
                    }
                }
                XmlEvent::End { name } if name == "w:style" => {
                    if let Some((id, style_name, outline)) = current.take() {
                        let level = style_name
                            .as_deref()
                            .and_then(level_from_style_name)
                            .or_else(|| level_from_outline(outline));
                        if let Some(level) = level {
                            headings.insert(id, level);
                        }
                    }
                }
                _ => {}
            }
        }
        Self { headings }
    }

    fn level(&self, style_id: &str) -> Option<u8> {
        self.headings.get(style_id).copied()
    }
}

fn parse_i32(v: Option<&str>) -> Option<i32> {
    v.and_then(|v| v.trim().parse().ok())
}

/// `Heading 2`, `Heading2` and `Title`.
fn level_from_style_name(style: &str) -> Option<u8> {
    let lower = style.trim().to_ascii_lowercase();
    if lower == "title" {
        return Some(1);
    }
    let rest = lower.strip_prefix("heading")?.trim_start();
    let n: u8 = rest.parse().ok()?;
    (1..=9).contains(&n).then_some(n)
}

fn level_from_outline(lvl: Option<i32>) -> Option<u8> {
    match lvl? {
        l @ 0..=8 => Some(l as u8 + 1),
        _ => None,
    }
}

/// Text and run layout of one `w:p`.
#[derive(Debug, Default)]
pub struct ParagraphScan {
    pub end: usize,
    pub text: String,
    pub p_style: Option<String>,
    pub outline_lvl: Option<i32>,
    pub has_graphic: bool,
    /// `(start, end)` event range of each `w:t` holding the paragraph's own text.
    pub texts: Vec<(usize, usize)>,
    /// Run-level tabs and line breaks that contribute to the text.
    pub controls: Vec<usize>,
}

fn in_captured_run(stack: &[&str]) -> bool {
    match stack.split_last() {
        Some((&"w:r", outer)) => outer.iter().all(|n| RUN_CONTAINERS.contains(n)),
        _ => false,
    }
}

pub fn scan_paragraph(events: &[XmlEvent], start: usize) -> anyhow::Result<ParagraphScan> {
    let end = element_end(events, start).with_context(|| format!("unclosed w:p at {start}"))?;
    let mut scan = ParagraphScan {
        end,
        ..ParagraphScan::default()
    };
    let mut stack: Vec<&str> = Vec::new();
    let mut i = start + 1;

    while i < end {
        let parent = stack.last().copied().unwrap_or("w:p");
        match &events[i] {
            XmlEvent::Start { name, attrs } => {
                if name == "w:t" && in_captured_run(&stack) {
                    let t_end = element_end(events, i)
                        .with_context(|| format!("unclosed w:t at {i}"))?;
                    for ev in &events[i + 1..t_end] {
                        if let XmlEvent::Text { text } = ev {
                            scan.text.push_str(text);
                        }
                    }
                    scan.texts.push((i, t_end));
                    i = t_end + 1;
                    continue;
                }
                if GRAPHICS.contains(&name.as_str()) {
                    scan.has_graphic = true;
                }
                paragraph_property(&mut scan, &stack, name, attrs);
                stack.push(name.as_str());
            }
            XmlEvent::Empty { name, attrs } => {
                if GRAPHICS.contains(&name.as_str()) {
                    scan.has_graphic = true;
                }
                if name == "w:t" && in_captured_run(&stack) {
                    scan.texts.push((i, i));
                } else if parent == "w:r"
                    && in_captured_run(&stack)
                    && is_run_text_element(name, parent, attrs)
                {
                    scan.text.push(if name == "w:tab" { '\t' } else { '\n' });
                    scan.controls.push(i);
                } else {
                    paragraph_property(&mut scan, &stack, name, attrs);
                }
            }
            XmlEvent::End { .. } => {
                stack.pop();
            }
            _ => {}
        }
        i += 1;
    }
    Ok(scan)
}

fn paragraph_property(scan: &mut ParagraphScan, stack: &[&str], name: &str, attrs: &[(String, String)]) {
    if stack.len() != 1 || stack[0] != "w:pPr" {
        return;
    }
    match name {
        "w:pStyle" => {
            scan.p_style = find_attr(attrs, "w:val")
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
        }
        "w:outlineLvl" => scan.outline_lvl = parse_i32(find_attr(attrs, "w:val")),
        _ => {}
    }
}

fn heading_level(scan: &ParagraphScan, styles: &StyleSheet) -> Option<u8> {
    if let Some(level) = level_from_outline(scan.outline_lvl) {
        return Some(level);
    }
    let style = scan.p_style.as_deref()?;
    level_from_style_name(style).or_else(|| styles.level(style))
}

pub fn paragraph_anchor(index: usize) -> StyleRef {
    StyleRef::new(format!("w:p@{index}"))
}

pub fn table_anchor(index: usize) -> StyleRef {
    StyleRef::new(format!("w:tbl@{index}"))
}

/// Parses an anchor produced by [`paragraph_anchor`] or [`table_anchor`].
pub fn parse_anchor(style: &StyleRef) -> Option<(&str, usize)> {
    let (tag, index) = style.as_str().split_once('@')?;
    Some((tag, index.parse().ok()?))
}

/// Blocks of the document body, in reading order.
pub fn document_blocks(part: &XmlPart, styles: &StyleSheet) -> anyhow::Result<Vec<Block>> {
    let events = &part.events;
    let body = events
        .iter()
        .position(|ev| matches!(ev, XmlEvent::Start { name, .. } if name == "w:body"))
        .ok_or_else(|| anyhow!("{} has no w:body", part.name))?;
    let body_end = element_end(events, body).context("unclosed w:body")?;
    let mut out = Vec::new();
    collect_children(events, body, body_end, styles, &mut out)?;
    Ok(out)
}

fn collect_children(
    events: &[XmlEvent],
    start: usize,
    end: usize,
    styles: &StyleSheet,
    out: &mut Vec<Block>,
) -> anyhow::Result<()> {
    let mut i = start + 1;
    while i < end {
        let Some(name) = opening_name(&events[i]) else {
            i += 1;
            continue;
        };
        let child_end = element_end(events, i).with_context(|| format!("unclosed {name} at {i}"))?;
        match name {
            "w:p" => {
                let scan = scan_paragraph(events, i)?;
                if let Some(block) = paragraph_block(i, &scan, styles) {
                    out.push(block);
                }
            }
            "w:tbl" => out.push(table_block(events, i, child_end, styles)?),
            n if BODY_CONTAINERS.contains(&n) => {
                collect_children(events, i, child_end, styles, out)?
            }
            _ => {}
        }
        i = child_end + 1;
    }
    Ok(())
}

fn opening_name(ev: &XmlEvent) -> Option<&str> {
    match ev {
        XmlEvent::Start { name, .. } | XmlEvent::Empty { name, .. } => Some(name),
        _ => None,
    }
}

fn paragraph_block(index: usize, scan: &ParagraphScan, styles: &StyleSheet) -> Option<Block> {
    let anchor = paragraph_anchor(index);
    if scan.text.trim().is_empty() {
        return scan.has_graphic.then(|| Block::image(anchor));
    }
    Some(match heading_level(scan, styles) {
        Some(level) => Block::heading(level, scan.text.clone(), anchor),
        None => Block::paragraph(scan.text.clone(), anchor),
    })
}

fn table_block(
    events: &[XmlEvent],
    start: usize,
    end: usize,
    styles: &StyleSheet,
) -> anyhow::Result<Block> {
    let mut rows = Vec::new();
    for (tr, tr_end) in child_elements(events, start, end, "w:tr")? {
        let mut row = Vec::new();
        for (tc, tc_end) in child_elements(events, tr, tr_end, "w:tc")? {
            let mut blocks = Vec::new();
            collect_children(events, tc, tc_end, styles, &mut blocks)?;
            row.push(Cell::new(blocks));
        }
        rows.push(row);
    }
    Ok(Block::table(rows, table_anchor(start)))
}

/// Direct children named `want`, looking through content controls.
fn child_elements(
    events: &[XmlEvent],
    start: usize,
    end: usize,
    want: &str,
) -> anyhow::Result<Vec<(usize, usize)>> {
    let mut found = Vec::new();
    let mut i = start + 1;
    while i < end {
        let Some(name) = opening_name(&events[i]) else {
            i += 1;
            continue;
        };
        let child_end = element_end(events, i).with_context(|| format!("unclosed {name} at {i}"))?;
        if name == want {
            found.push((i, child_end));
        } else if BODY_CONTAINERS.contains(&name) {
            found.extend(child_elements(events, i, child_end, want)?);
        }
        i = child_end + 1;
    }
    Ok(found)
}
