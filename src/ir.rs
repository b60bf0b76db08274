use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Structural kind of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    Heading { level: u8 },
    Table,
    Image,
}

impl BlockKind {
    /// Headings and images bind to the block that follows them.
    pub fn binds_forward(self) -> bool {
        matches!(self, Self::Heading { .. } | Self::Image)
    }
}

/// Opaque handle back to source formatting. Only the adapter that produced it knows
/// how to resolve it (an XML event anchor, a Markdown block marker, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StyleRef(String);

impl StyleRef {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StyleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub blocks: Vec<Block>,
}

impl Cell {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![Block::paragraph(text, StyleRef::default())])
    }
}

/// One structural unit of a document.
///
/// `text` is used by paragraphs and headings, `rows` by tables. Images carry neither and
/// are passed through reassembly untouched.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    pub style_ref: StyleRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<Cell>>,
}

impl Block {
    pub fn paragraph(text: impl Into<String>, style_ref: StyleRef) -> Self {
        Self {
            kind: BlockKind::Paragraph,
            text: text.into(),
            style_ref,
            rows: Vec::new(),
        }
    }

    pub fn heading(level: u8, text: impl Into<String>, style_ref: StyleRef) -> Self {
        Self {
            kind: BlockKind::Heading {
                level: level.max(1),
            },
            text: text.into(),
            style_ref,
            rows: Vec::new(),
        }
    }

    pub fn table(rows: Vec<Vec<Cell>>, style_ref: StyleRef) -> Self {
        Self {
            kind: BlockKind::Table,
            text: String::new(),
            style_ref,
            rows,
        }
    }

    pub fn image(style_ref: StyleRef) -> Self {
        Self {
            kind: BlockKind::Image,
            text: String::new(),
            style_ref,
            rows: Vec::new(),
        }
    }

    /// Length of the translatable text, in characters.
    pub fn char_count(&self) -> usize {
        match self.kind {
            BlockKind::Paragraph | BlockKind::Heading { .. } => self.text.chars().count(),
            BlockKind::Table => self
                .rows
                .iter()
                .flatten()
                .flat_map(|c| c.blocks.iter())
                .map(Block::char_count)
                .sum(),
            BlockKind::Image => 0,
        }
    }

    /// Number of rows and the widest row of a table; `(0, 0)` for other kinds.
    pub fn table_shape(&self) -> (usize, usize) {
        let cols = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        (self.rows.len(), cols)
    }

    /// Translatable text slots in document order (cells are walked row-major).
    pub fn texts(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_texts(&mut out);
        out
    }

    fn collect_texts<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self.kind {
            BlockKind::Paragraph | BlockKind::Heading { .. } => out.push(&self.text),
            BlockKind::Table => {
                for block in self.rows.iter().flatten().flat_map(|c| c.blocks.iter()) {
                    block.collect_texts(out);
                }
            }
            BlockKind::Image => {}
        }
    }

    /// Copy of this block with its text slots taken from `texts`, in the order of
    /// [`Block::texts`]. Returns `None` when `texts` runs out.
    pub fn with_texts<I>(&self, texts: &mut I) -> Option<Block>
    where
        I: Iterator<Item = String>,
    {
        let mut out = self.clone();
        out.fill_texts(texts)?;
        Some(out)
    }

    fn fill_texts<I>(&mut self, texts: &mut I) -> Option<()>
    where
        I: Iterator<Item = String>,
    {
        match self.kind {
            BlockKind::Paragraph | BlockKind::Heading { .. } => {
                self.text = texts.next()?;
            }
            BlockKind::Table => {
                for block in self
                    .rows
                    .iter_mut()
                    .flatten()
                    .flat_map(|c| c.blocks.iter_mut())
                {
                    block.fill_texts(texts)?;
                }
            }
            BlockKind::Image => {}
        }
        Some(())
    }

    /// Same kind, same table layout (recursively), same style handles. Text is ignored.
    pub fn same_shape(&self, other: &Block) -> bool {
        if self.kind != other.kind || self.style_ref != other.style_ref {
            return false;
        }
        if self.rows.len() != other.rows.len() {
            return false;
        }
        self.rows.iter().zip(&other.rows).all(|(a, b)| {
            a.len() == b.len()
                && a.iter().zip(b).all(|(ca, cb)| {
                    ca.blocks.len() == cb.blocks.len()
                        && ca.blocks.iter().zip(&cb.blocks).all(|(x, y)| x.same_shape(y))
                })
        })
    }
}

/// Source format families understood by the adapters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Docx,
    Pdf,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "docx" => Some(Self::Docx),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// Where a document came from; doubles as the style template on reassembly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub path: PathBuf,
    pub format: SourceFormat,
    /// Directory that relative resource links in intermediate markup resolve against
    /// (extracted images). Only set by markup-mediated adapters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_dir: Option<PathBuf>,
}

impl SourceRef {
    pub fn new(path: impl Into<PathBuf>, format: SourceFormat) -> Self {
        Self {
            path: path.into(),
            format,
            resource_dir: None,
        }
    }
}

/// The structural model of a whole input file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub blocks: Vec<Block>,
    pub source: SourceRef,
}

impl Document {
    pub fn new(blocks: Vec<Block>, source: SourceRef) -> Self {
        Self { blocks, source }
    }

    pub fn char_count(&self) -> usize {
        self.blocks.iter().map(Block::char_count).sum()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.blocks.iter().flat_map(Block::texts).collect()
    }

    pub fn kinds(&self) -> Vec<BlockKind> {
        self.blocks.iter().map(|b| b.kind).collect()
    }
}
