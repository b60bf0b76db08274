use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;
use sha2::{Digest, Sha256};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlEvent {
    Decl {
        version: String,
        encoding: Option<String>,
        standalone: Option<String>,
    },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
    },
    End {
        name: String,
    },
    Empty {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
    CData {
        text: String,
    },
    Comment {
        text: String,
    },
    PI {
        content: String,
    },
    DocType {
        text: String,
    },
}

impl XmlEvent {
    pub fn start(name: &str, attrs: &[(&str, &str)]) -> Self {
        Self::Start {
            name: name.to_string(),
            attrs: own_attrs(attrs),
        }
    }

    pub fn empty(name: &str, attrs: &[(&str, &str)]) -> Self {
        Self::Empty {
            name: name.to_string(),
            attrs: own_attrs(attrs),
        }
    }

    pub fn end(name: &str) -> Self {
        Self::End {
            name: name.to_string(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Element name for start, empty and end events.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Start { name, .. } | Self::Empty { name, .. } | Self::End { name } => {
                Some(name)
            }
            _ => None,
        }
    }
}

fn own_attrs(attrs: &[(&str, &str)]) -> Vec<(String, String)> {
    attrs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn find_attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// One XML part of a package, held as a flat event list.
///
/// `skeleton` is the hash of everything except run text, taken at parse time. Rewriting
/// run text must leave it unchanged.
#[derive(Clone, Debug)]
pub struct XmlPart {
    pub name: String,
    pub events: Vec<XmlEvent>,
    pub skeleton: String,
}

pub fn parse_xml_part(name: &str, xml_bytes: &[u8]) -> anyhow::Result<XmlPart> {
    let mut reader = Reader::from_reader(xml_bytes);
    reader.config_mut().trim_text(false);

    let mut events: Vec<XmlEvent> = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let ev = reader
            .read_event_into(&mut buf)
            .with_context(|| format!("read xml event in {name}"))?;
        match ev {
            Event::Eof => break,
            Event::Decl(d) => {
                let version = bytes_to_string(d.version().context("decl version")?);
                let encoding = d
                    .encoding()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                let standalone = d
                    .standalone()
                    .map(|r| r.map(bytes_to_string))
                    .transpose()
                    .unwrap_or(None);
                events.push(XmlEvent::Decl {
                    version,
                    encoding,
                    standalone,
                });
            }
            Event::Start(s) => events.push(XmlEvent::Start {
                name: bytes_to_string(s.name().as_ref()),
                attrs: collect_attrs(&s)?,
            }),
            Event::End(e) => events.push(XmlEvent::End {
                name: bytes_to_string(e.name().as_ref()),
            }),
            Event::Empty(s) => events.push(XmlEvent::Empty {
                name: bytes_to_string(s.name().as_ref()),
                attrs: collect_attrs(&s)?,
            }),
            Event::Text(t) => {
                let text = t.unescape().context("unescape text")?.into_owned();
                events.push(XmlEvent::Text { text });
            }
            Event::CData(t) => events.push(XmlEvent::CData {
                text: bytes_to_string(t.into_inner()),
            }),
            Event::Comment(t) => events.push(XmlEvent::Comment {
                text: bytes_to_string(t.into_inner()),
            }),
            Event::PI(t) => {
                let target = bytes_to_string(t.target());
                let content = bytes_to_string(t.content());
                events.push(XmlEvent::PI {
                    content: format!("{target}{content}"),
                });
            }
            Event::DocType(t) => events.push(XmlEvent::DocType {
                text: bytes_to_string(t.into_inner()),
            }),
        }
    }

    let skeleton = skeleton_hash(&events);
    Ok(XmlPart {
        name: name.to_string(),
        events,
        skeleton,
    })
}

fn collect_attrs(s: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for a in s.attributes() {
        let a = a.context("attr")?;
        // Values stay in their escaped form; VML payloads carry character references
        // that must survive a round trip byte for byte.
        attrs.push((
            bytes_to_string(a.key.as_ref()),
            bytes_to_string(a.value.as_ref()),
        ));
    }
    Ok(attrs)
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

pub fn write_xml_part(part: &XmlPart) -> anyhow::Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::new();

    fn escape_text_into(out: &mut Vec<u8>, text: &str) {
        for ch in text.chars() {
            match ch {
                '&' => out.extend_from_slice(b"&amp;"),
                '<' => out.extend_from_slice(b"&lt;"),
                '>' => out.extend_from_slice(b"&gt;"),
                _ => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    fn write_start_like(out: &mut Vec<u8>, name: &str, attrs: &[(String, String)], empty: bool) {
        out.push(b'<');
        out.extend_from_slice(name.as_bytes());
        for (k, v) in attrs {
            out.push(b' ');
            out.extend_from_slice(k.as_bytes());
            out.extend_from_slice(b"=\"");
            out.extend_from_slice(v.as_bytes());
            out.push(b'"');
        }
        if empty {
            out.extend_from_slice(b"/>");
        } else {
            out.push(b'>');
        }
    }

    for ev in &part.events {
        match ev {
            XmlEvent::Decl {
                version,
                encoding,
                standalone,
            } => {
                let d =
                    BytesDecl::new(version.as_str(), encoding.as_deref(), standalone.as_deref());
                let mut writer = quick_xml::Writer::new(Vec::new());
                writer.write_event(Event::Decl(d)).context("write decl")?;
                out.extend_from_slice(&writer.into_inner());
            }
            XmlEvent::Start { name, attrs } => write_start_like(&mut out, name, attrs, false),
            XmlEvent::End { name } => {
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.push(b'>');
            }
            XmlEvent::Empty { name, attrs } => write_start_like(&mut out, name, attrs, true),
            XmlEvent::Text { text } => escape_text_into(&mut out, text),
            XmlEvent::CData { text } => {
                out.extend_from_slice(b"<![CDATA[");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"]]>");
            }
            XmlEvent::Comment { text } => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            XmlEvent::PI { content } => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(content.as_bytes());
                out.extend_from_slice(b"?>");
            }
            XmlEvent::DocType { text } => {
                out.extend_from_slice(b"<!DOCTYPE");
                out.extend_from_slice(text.as_bytes());
                out.push(b'>');
            }
        }
    }

    Ok(out)
}

/// Index of the `End` event closing the element opened at `start` (or `start` itself for
/// an empty element).
pub fn element_end(events: &[XmlEvent], start: usize) -> Option<usize> {
    match events.get(start)? {
        XmlEvent::Empty { .. } => return Some(start),
        XmlEvent::Start { .. } => {}
        _ => return None,
    }
    let mut depth = 0usize;
    for (i, ev) in events.iter().enumerate().skip(start) {
        match ev {
            XmlEvent::Start { .. } => depth += 1,
            XmlEvent::End { .. } => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Run-level content that text rewriting is allowed to create or remove.
pub fn is_run_text_element(name: &str, parent: &str, attrs: &[(String, String)]) -> bool {
    match name {
        "w:t" => true,
        "w:tab" | "w:cr" => parent == "w:r",
        "w:br" => {
            parent == "w:r"
                && find_attr(attrs, "w:type").unwrap_or("textWrapping") == "textWrapping"
        }
        _ => false,
    }
}

pub fn verify_skeleton_unchanged(part: &XmlPart) -> anyhow::Result<()> {
    let cur = skeleton_hash(&part.events);
    if cur != part.skeleton {
        return Err(anyhow!(
            "non-text structure changed in {} (baseline={} current={})",
            part.name,
            part.skeleton,
            cur
        ));
    }
    Ok(())
}

fn skeleton_hash(events: &[XmlEvent]) -> String {
    let mut hasher = Sha256::new();
    let mut stack: Vec<&str> = Vec::new();
    // depth of the run-text element currently being skipped
    let mut skipping: Option<usize> = None;

    for ev in events {
        let parent = stack.last().copied().unwrap_or("");
        match ev {
            XmlEvent::Start { name, attrs } => {
                stack.push(name.as_str());
                if skipping.is_some() {
                    continue;
                }
                if is_run_text_element(name, parent, attrs) {
                    skipping = Some(stack.len());
                    continue;
                }
                hash_start_like(&mut hasher, name, attrs);
            }
            XmlEvent::Empty { name, attrs } => {
                if skipping.is_some() || is_run_text_element(name, parent, attrs) {
                    continue;
                }
                hash_start_like(&mut hasher, name, attrs);
                hash_end_like(&mut hasher, name);
            }
            XmlEvent::End { name } => {
                let depth = stack.len();
                stack.pop();
                if let Some(d) = skipping {
                    if d == depth {
                        skipping = None;
                    }
                    continue;
                }
                hash_end_like(&mut hasher, name);
            }
            _ if skipping.is_some() => {}
            XmlEvent::Text { text } => hash_tagged(&mut hasher, b"T:", text),
            XmlEvent::Decl {
                version,
                encoding,
                standalone,
            } => {
                hasher.update(b"D:");
                hasher.update(version.as_bytes());
                hasher.update(b"|");
                hasher.update(encoding.as_deref().unwrap_or("").as_bytes());
                hasher.update(b"|");
                hasher.update(standalone.as_deref().unwrap_or("").as_bytes());
                hasher.update(b"\n");
            }
            XmlEvent::CData { text } => hash_tagged(&mut hasher, b"C:", text),
            XmlEvent::Comment { text } => hash_tagged(&mut hasher, b"M:", text),
            XmlEvent::PI { content } => hash_tagged(&mut hasher, b"P:", content),
            XmlEvent::DocType { text } => hash_tagged(&mut hasher, b"Y:", text),
        }
    }
    hex::encode(hasher.finalize())
}

fn hash_tagged(hasher: &mut Sha256, tag: &[u8], text: &str) {
    hasher.update(tag);
    hasher.update(text.as_bytes());
    hasher.update(b"\n");
}

fn hash_start_like(hasher: &mut Sha256, name: &str, attrs: &[(String, String)]) {
    hasher.update(b"S:");
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    let map: BTreeMap<&str, &str> = attrs
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    for (k, v) in map {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b";");
    }
    hasher.update(b"\n");
}

fn hash_end_like(hasher: &mut Sha256, name: &str) {
    hasher.update(b"E:");
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
}

#[cfg(test)]
mod tests {
    use super::{element_end, parse_xml_part, verify_skeleton_unchanged, write_xml_part, XmlEvent};

    #[test]
    fn write_preserves_attr_entity_refs() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?><root xmlns:o="urn:test" o:gfxdata="A&#xD;&#xA;B"/>"#;
        let part = parse_xml_part("test.xml", xml).expect("parse xml");
        let out = write_xml_part(&part).expect("write xml");
        let s = String::from_utf8(out).expect("utf8");

        assert!(s.contains(r#"o:gfxdata="A&#xD;&#xA;B""#));
        assert!(!s.contains(r#"o:gfxdata="A&amp;#xD;"#));
    }

    #[test]
    fn skeleton_ignores_run_text_only() {
        let xml = br#"<w:p><w:pPr><w:tabs><w:tab w:val="left"/></w:tabs></w:pPr><w:r><w:t>Hi</w:t><w:tab/><w:t>there</w:t></w:r></w:p>"#;
        let mut part = parse_xml_part("document.xml", xml).expect("parse");

        // rewrite text and drop the run-level tab: still the same skeleton
        part.events.retain(|ev| !matches!(ev, XmlEvent::Empty { name, .. } if name == "w:tab")
            || matches!(ev, XmlEvent::Empty { attrs, .. } if !attrs.is_empty()));
        for ev in part.events.iter_mut() {
            if let XmlEvent::Text { text } = ev {
                *text = "Hola".into();
            }
        }
        verify_skeleton_unchanged(&part).expect("text-only change");

        // touching paragraph properties is caught
        part.events.retain(|ev| ev.name() != Some("w:tabs"));
        assert!(verify_skeleton_unchanged(&part).is_err());
    }

    #[test]
    fn element_end_matches_nesting() {
        let part = parse_xml_part("x.xml", b"<a><b><c/></b><b/></a>").expect("parse");
        assert_eq!(element_end(&part.events, 0), Some(5));
        assert_eq!(element_end(&part.events, 1), Some(3));
        assert_eq!(element_end(&part.events, 2), Some(2));
    }
}
