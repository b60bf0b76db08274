use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ir::{Block, BlockKind, Document};

/// A bounded group of consecutive blocks sent as one translation unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub blocks: Vec<Block>,
    pub char_count: usize,
}

impl Chunk {
    pub fn new(index: usize, blocks: Vec<Block>) -> Self {
        let char_count = blocks.iter().map(Block::char_count).sum();
        Self {
            index,
            blocks,
            char_count,
        }
    }

    pub fn kinds(&self) -> Vec<BlockKind> {
        self.blocks.iter().map(|b| b.kind).collect()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.blocks.iter().flat_map(Block::texts).collect()
    }
}

/// A chunk whose block texts have been replaced by their translation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedChunk {
    pub index: usize,
    pub blocks: Vec<Block>,
    pub target_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TranslatedChunk {
    pub fn new(index: usize, blocks: Vec<Block>, target_language: impl Into<String>) -> Self {
        Self {
            index,
            blocks,
            target_language: target_language.into(),
            model: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// A translation of `source` that changes nothing: used for dry runs and tests.
    pub fn identity(source: &Chunk, target_language: impl Into<String>) -> Self {
        Self::new(source.index, source.blocks.clone(), target_language)
    }

    pub fn texts(&self) -> Vec<&str> {
        self.blocks.iter().flat_map(Block::texts).collect()
    }

    /// Checks the structural invariants against the originating chunk: same index, same
    /// block count and kind sequence, same table layouts and style handles.
    pub fn check_against(&self, source: &Chunk) -> Result<()> {
        if self.index != source.index {
            return Err(Error::translation(
                Some(source.index),
                format!("index mismatch: got {}", self.index),
            ));
        }
        if self.blocks.len() != source.blocks.len() {
            return Err(Error::translation(
                Some(source.index),
                format!(
                    "block count mismatch: expected {} got {}",
                    source.blocks.len(),
                    self.blocks.len()
                ),
            ));
        }
        for (pos, (got, want)) in self.blocks.iter().zip(&source.blocks).enumerate() {
            if !got.same_shape(want) {
                return Err(Error::translation(
                    Some(source.index),
                    format!(
                        "block {pos} changed structure: expected {:?} {:?} got {:?} {:?}",
                        want.kind,
                        want.table_shape(),
                        got.kind,
                        got.table_shape()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Groups consecutive blocks into chunks of at most `max_chars` translatable characters.
///
/// Blocks are first gathered into atomic units: a run of headings/images together with the
/// block that follows it, or any other block on its own. Units are packed greedily and never
/// split; a unit that alone exceeds the budget becomes its own chunk.
pub fn split(doc: &Document, max_chars: usize) -> Result<Vec<Chunk>> {
    if max_chars == 0 {
        return Err(Error::InvalidConfiguration(
            "max_chars must be a positive integer".to_string(),
        ));
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Vec<Block> = Vec::new();
    let mut current_chars = 0usize;

    for unit in atomic_units(&doc.blocks) {
        let unit_chars: usize = unit.iter().map(Block::char_count).sum();
        if !current.is_empty() && current_chars + unit_chars > max_chars {
            let index = chunks.len();
            chunks.push(Chunk::new(index, std::mem::take(&mut current)));
            current_chars = 0;
        }
        current.extend(unit.iter().cloned());
        current_chars += unit_chars;
        if current_chars > max_chars {
            log::debug!(
                "oversized atomic unit: {unit_chars} chars > max_chars {max_chars} ({} blocks)",
                unit.len()
            );
            let index = chunks.len();
            chunks.push(Chunk::new(index, std::mem::take(&mut current)));
            current_chars = 0;
        }
    }
    if !current.is_empty() {
        let index = chunks.len();
        chunks.push(Chunk::new(index, current));
    }
    Ok(chunks)
}

fn atomic_units(blocks: &[Block]) -> Vec<&[Block]> {
    let mut units = Vec::new();
    let mut start = 0usize;
    for (i, block) in blocks.iter().enumerate() {
        if block.kind.binds_forward() {
            continue;
        }
        units.push(&blocks[start..=i]);
        start = i + 1;
    }
    if start < blocks.len() {
        units.push(&blocks[start..]);
    }
    units
}

/// Verifies that the chunk indices are exactly `0..N-1` with no repeats.
pub fn validate_sequence(chunks: &[TranslatedChunk]) -> Result<()> {
    let n = chunks.len();
    let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
    for c in chunks {
        *seen.entry(c.index).or_default() += 1;
    }
    let missing: Vec<usize> = (0..n).filter(|i| !seen.contains_key(i)).collect();
    let duplicated: Vec<usize> = seen
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(i, _)| *i)
        .collect();
    let unexpected: Vec<usize> = seen.keys().copied().filter(|i| *i >= n).collect();
    if missing.is_empty() && duplicated.is_empty() && unexpected.is_empty() {
        return Ok(());
    }
    Err(Error::ChunkSequence {
        missing,
        duplicated,
        unexpected,
    })
}

/// All translated blocks in chunk-index order, after validating the index sequence.
pub fn ordered_blocks(chunks: &[TranslatedChunk]) -> Result<Vec<&Block>> {
    validate_sequence(chunks)?;
    let mut sorted: Vec<&TranslatedChunk> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.index);
    Ok(sorted.into_iter().flat_map(|c| c.blocks.iter()).collect())
}

/// Checks a translated batch against the chunks it came from: same length, same index
/// at every position, and per-chunk structural equality.
pub fn check_batch(source: &[Chunk], translated: &[TranslatedChunk]) -> Result<()> {
    if source.len() != translated.len() {
        return Err(Error::translation(
            None,
            format!(
                "expected {} translated chunks, got {}",
                source.len(),
                translated.len()
            ),
        ));
    }
    for (want, got) in source.iter().zip(translated) {
        got.check_against(want)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{check_batch, ordered_blocks, split, validate_sequence, Chunk, TranslatedChunk};
    use crate::error::Error;
    use crate::ir::{Block, BlockKind, Cell, Document, SourceFormat, SourceRef, StyleRef};

    fn doc(blocks: Vec<Block>) -> Document {
        Document::new(
            blocks,
            SourceRef::new(PathBuf::from("in.docx"), SourceFormat::Docx),
        )
    }

    fn para(n: usize, fill: char) -> Block {
        Block::paragraph(fill.to_string().repeat(n), StyleRef::default())
    }

    fn heading(text: &str) -> Block {
        Block::heading(1, text, StyleRef::new("Heading1"))
    }

    fn table_2x2() -> Block {
        Block::table(
            vec![
                vec![Cell::text("a"), Cell::text("b")],
                vec![Cell::text("c"), Cell::text("d")],
            ],
            StyleRef::new("tbl"),
        )
    }

    // Tiny deterministic generator so the property checks need no extra crates.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn below(&mut self, n: u64) -> usize {
            (self.next() % n) as usize
        }
    }

    fn random_doc(rng: &mut Lcg) -> Document {
        let n = rng.below(30);
        let mut blocks = Vec::new();
        for i in 0..n {
            let b = match rng.below(5) {
                0 => Block::heading(1 + rng.below(3) as u8, format!("H{i}"), StyleRef::default()),
                1 => {
                    let rows = 1 + rng.below(3);
                    let cols = 1 + rng.below(3);
                    Block::table(
                        (0..rows)
                            .map(|r| {
                                (0..cols)
                                    .map(|c| Cell::text("x".repeat(rng.below(40) + r + c)))
                                    .collect()
                            })
                            .collect(),
                        StyleRef::default(),
                    )
                }
                2 => Block::image(StyleRef::default()),
                _ => para(1 + rng.below(120), 'p'),
            };
            blocks.push(b);
        }
        doc(blocks)
    }

    #[test]
    fn zero_budget_is_rejected() {
        let err = split(&doc(vec![para(3, 'a')]), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        assert!(split(&doc(vec![]), 10).expect("split").is_empty());
    }

    #[test]
    fn small_document_fits_one_chunk() {
        let d = doc(vec![
            heading("Title"),
            Block::paragraph("Hello world", StyleRef::default()),
            table_2x2(),
        ]);
        let chunks = split(&d, 50).expect("split");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(
            chunks[0].kinds(),
            vec![BlockKind::Heading { level: 1 }, BlockKind::Paragraph, BlockKind::Table]
        );
        assert_eq!(chunks[0].char_count, 5 + 11 + 4);
    }

    #[test]
    fn three_paragraphs_of_thirty_make_three_chunks() {
        let d = doc(vec![para(30, 'a'), para(30, 'b'), para(30, 'c')]);
        let chunks = split(&d, 50).expect("split");
        assert_eq!(chunks.len(), 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert_eq!(c.blocks.len(), 1);
            assert_eq!(c.char_count, 30);
        }
    }

    #[test]
    fn oversized_table_stands_alone() {
        let big = Block::table(
            vec![vec![Cell::text("x".repeat(80)), Cell::text("y".repeat(80))]],
            StyleRef::default(),
        );
        let d = doc(vec![para(10, 'a'), big.clone(), para(10, 'b')]);
        let chunks = split(&d, 50).expect("split");
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].blocks, vec![big]);
        assert_eq!(chunks[1].char_count, 160);
    }

    #[test]
    fn heading_moves_to_the_chunk_of_its_paragraph() {
        let d = doc(vec![para(40, 'a'), heading("Next"), para(30, 'b')]);
        let chunks = split(&d, 50).expect("split");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].kinds(), vec![BlockKind::Paragraph]);
        assert_eq!(
            chunks[1].kinds(),
            vec![BlockKind::Heading { level: 1 }, BlockKind::Paragraph]
        );
    }

    #[test]
    fn heading_stays_with_oversized_follower() {
        let d = doc(vec![heading("Big"), para(90, 'x')]);
        let chunks = split(&d, 50).expect("split");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].blocks.len(), 2);
    }

    #[test]
    fn image_travels_with_its_caption() {
        let d = doc(vec![
            para(45, 'a'),
            Block::image(StyleRef::new("img")),
            Block::paragraph("Figure 1", StyleRef::new("Caption")),
        ]);
        let chunks = split(&d, 50).expect("split");
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1].kinds(),
            vec![BlockKind::Image, BlockKind::Paragraph]
        );
    }

    #[test]
    fn split_properties_hold_for_generated_documents() {
        let mut rng = Lcg(0x5eed);
        for round in 0..300 {
            let d = random_doc(&mut rng);
            let max_chars = 1 + rng.below(200);
            let chunks = split(&d, max_chars).expect("split");

            // lossless and ordered
            let joined: Vec<&str> = chunks.iter().flat_map(|c| c.texts()).collect();
            assert_eq!(joined, d.texts(), "round {round}");
            let blocks: Vec<&Block> = chunks.iter().flat_map(|c| c.blocks.iter()).collect();
            assert_eq!(blocks.len(), d.blocks.len());
            for (a, b) in blocks.iter().zip(&d.blocks) {
                assert_eq!(*a, b);
                if b.kind == BlockKind::Table {
                    assert_eq!(a.table_shape(), b.table_shape());
                }
            }

            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.index, i);
                assert!(!c.blocks.is_empty());
                let non_binding = c.blocks.iter().filter(|b| !b.kind.binds_forward()).count();
                assert!(
                    c.char_count <= max_chars || non_binding <= 1,
                    "round {round}: chunk {i} has {} chars over {max_chars}",
                    c.char_count
                );
                // a heading never closes a chunk when something follows it
                let is_last_chunk = i + 1 == chunks.len();
                if !is_last_chunk {
                    let last = c.blocks.last().expect("non-empty");
                    assert!(!last.kind.binds_forward(), "round {round}: orphaned {:?}", last.kind);
                }
            }
        }
    }

    fn translated(indices: &[usize]) -> Vec<TranslatedChunk> {
        indices
            .iter()
            .map(|i| TranslatedChunk::new(*i, vec![para(1, 'z')], "en"))
            .collect()
    }

    #[test]
    fn sequence_accepts_permutation_of_range() {
        validate_sequence(&translated(&[2, 0, 1])).expect("valid");
        let swapped = translated(&[1, 0]);
        let blocks = ordered_blocks(&swapped).expect("ordered");
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn sequence_reports_missing_and_duplicated() {
        let err = validate_sequence(&translated(&[0, 0, 2])).unwrap_err();
        match err {
            Error::ChunkSequence {
                missing,
                duplicated,
                unexpected,
            } => {
                assert_eq!(missing, vec![1]);
                assert_eq!(duplicated, vec![0]);
                assert!(unexpected.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = validate_sequence(&translated(&[0, 5])).unwrap_err();
        match err {
            Error::ChunkSequence {
                missing, unexpected, ..
            } => {
                assert_eq!(missing, vec![1]);
                assert_eq!(unexpected, vec![5]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn batch_check_catches_dropped_block() {
        let source = vec![Chunk::new(0, vec![para(3, 'a'), para(3, 'b')])];
        let mut out = vec![TranslatedChunk::identity(&source[0], "de")];
        check_batch(&source, &out).expect("identity is aligned");

        out[0].blocks.pop();
        let err = check_batch(&source, &out).unwrap_err();
        assert!(matches!(
            err,
            Error::TranslationFailure {
                chunk_index: Some(0),
                ..
            }
        ));

        let err = check_batch(&source, &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::TranslationFailure {
                chunk_index: None,
                ..
            }
        ));
    }
}
