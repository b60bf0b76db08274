use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::translate::codec::{encode, PromptStyle};

pub const CHUNKS_JSON: &str = "chunks.json";

#[derive(Serialize)]
struct ChunkManifest<'a> {
    source: &'a Path,
    max_chars: usize,
    chunks: &'a [Chunk],
}

/// Writes `chunk_000.txt`, `chunk_001.txt`, ... (the request text each chunk would be sent
/// as) and `chunks.json` with the full block structure. Returns the text files written.
pub fn export_chunks(
    chunks: &[Chunk],
    source: &Path,
    max_chars: usize,
    style: PromptStyle,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let mut written = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let path = dir.join(format!("chunk_{:03}.txt", chunk.index));
        std::fs::write(&path, encode(chunk, style)).map_err(|e| Error::io(&path, e))?;
        written.push(path);
    }

    let manifest = ChunkManifest {
        source,
        max_chars,
        chunks,
    };
    let json_path = dir.join(CHUNKS_JSON);
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| Error::io(&json_path, std::io::Error::other(e)))?;
    std::fs::write(&json_path, json).map_err(|e| Error::io(&json_path, e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{export_chunks, CHUNKS_JSON};
    use crate::chunk::Chunk;
    use crate::ir::{Block, Cell, StyleRef};
    use crate::translate::codec::PromptStyle;

    #[test]
    fn writes_text_files_and_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let chunks = vec![
            Chunk::new(0, vec![Block::paragraph("Hello", StyleRef::new("w:p@0"))]),
            Chunk::new(
                1,
                vec![Block::table(
                    vec![vec![Cell::text("a"), Cell::text("b")]],
                    StyleRef::new("w:tbl@1"),
                )],
            ),
        ];
        let out = dir.path().join("chunks");
        let files = export_chunks(&chunks, Path::new("in.docx"), 50, PromptStyle::Plain, &out)
            .expect("export");
        assert_eq!(files.len(), 2);
        assert_eq!(std::fs::read_to_string(&files[0]).expect("read"), "Hello");
        assert_eq!(
            std::fs::read_to_string(out.join("chunk_001.txt")).expect("read"),
            "[TABLE]\n| a | b |\n[/TABLE]"
        );

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join(CHUNKS_JSON)).expect("read")).expect("json");
        assert_eq!(json["max_chars"], 50);
        assert_eq!(json["chunks"][1]["blocks"][0]["kind"], "table");
        assert_eq!(json["chunks"][0]["char_count"], 5);
    }
}
