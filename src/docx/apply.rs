use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context};

use crate::docx::blocks::{parse_anchor, scan_paragraph};
use crate::docx::xml::{verify_skeleton_unchanged, XmlEvent, XmlPart};
use crate::ir::{Block, BlockKind};

/// Replacement for the event range `start..=end`.
struct Edit {
    end: usize,
    events: Vec<XmlEvent>,
}

/// Rewrites the run text of `part` so that each block's anchored paragraph reads as the
/// block's text. The first `w:t` of a paragraph receives the whole text (tabs and line
/// breaks become `w:tab` / `w:br`); the paragraph's other text elements are dropped.
/// Fails if anything other than run text would change.
pub fn apply_blocks<'a, I>(part: &mut XmlPart, blocks: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = &'a Block>,
{
    let mut edits = BTreeMap::new();
    for block in blocks {
        plan_block(&part.events, block, &mut edits)?;
    }
    if edits.is_empty() {
        return Ok(());
    }

    let mut out = Vec::with_capacity(part.events.len());
    let mut i = 0;
    while i < part.events.len() {
        match edits.remove(&i) {
            Some(edit) => {
                out.extend(edit.events);
                i = edit.end + 1;
            }
            None => {
                out.push(part.events[i].clone());
                i += 1;
            }
        }
    }
    part.events = out;
    verify_skeleton_unchanged(part)
}

fn plan_block(
    events: &[XmlEvent],
    block: &Block,
    edits: &mut BTreeMap<usize, Edit>,
) -> anyhow::Result<()> {
    let (tag, index) = parse_anchor(&block.style_ref)
        .ok_or_else(|| anyhow!("block has no document anchor: {}", block.style_ref))?;
    let expected = match block.kind {
        BlockKind::Table => "w:tbl",
        _ => "w:p",
    };
    let found = events.get(index).and_then(XmlEvent::name);
    if tag != expected || found != Some(expected) {
        bail!(
            "anchor {} does not point at a {expected} element (found {found:?})",
            block.style_ref
        );
    }

    match block.kind {
        BlockKind::Image => {}
        BlockKind::Table => {
            for cell_block in block.rows.iter().flatten().flat_map(|c| c.blocks.iter()) {
                plan_block(events, cell_block, edits)?;
            }
        }
        BlockKind::Paragraph | BlockKind::Heading { .. } => {
            let scan = scan_paragraph(events, index)
                .with_context(|| format!("scan paragraph {}", block.style_ref))?;
            if scan.text == block.text {
                return Ok(());
            }
            let Some((&(first, first_end), rest)) = scan.texts.split_first() else {
                bail!("paragraph {} has no text run", block.style_ref);
            };
            edits.insert(
                first,
                Edit {
                    end: first_end,
                    events: run_text_events(&block.text),
                },
            );
            for &(start, end) in rest {
                edits.insert(start, Edit { end, events: Vec::new() });
            }
            for &ctl in &scan.controls {
                edits.insert(ctl, Edit { end: ctl, events: Vec::new() });
            }
        }
    }
    Ok(())
}

/// `w:t` / `w:tab` / `w:br` sequence spelling out `text` inside a single run.
fn run_text_events(text: &str) -> Vec<XmlEvent> {
    fn push_t(out: &mut Vec<XmlEvent>, seg: &mut String) {
        out.push(XmlEvent::start("w:t", &[("xml:space", "preserve")]));
        if !seg.is_empty() {
            out.push(XmlEvent::text(std::mem::take(seg)));
        }
        out.push(XmlEvent::end("w:t"));
    }

    let mut out = Vec::new();
    let mut seg = String::new();
    for ch in text.chars() {
        match ch {
            '\t' | '\n' => {
                if !seg.is_empty() {
                    push_t(&mut out, &mut seg);
                }
                let name = if ch == '\t' { "w:tab" } else { "w:br" };
                out.push(XmlEvent::empty(name, &[]));
            }
            '\r' => {}
            _ => seg.push(ch),
        }
    }
    if !seg.is_empty() || out.is_empty() {
        push_t(&mut out, &mut seg);
    }
    out
}
