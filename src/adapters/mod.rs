//! Format adapters: one per source format family, all behind [`FormatAdapter`].

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::chunk::{ordered_blocks, TranslatedChunk};
use crate::config::ConverterOptions;
use crate::convert::{MarkupConverter, MineruConverter, PandocConverter};
use crate::error::{Error, Result};
use crate::ir::{Block, Document, SourceFormat};

pub mod markdown;
pub mod native;

pub use markdown::{MarkdownAdapter, MarkdownFlavor};
pub use native::NativeDocxAdapter;

/// Reads a source file into the structural model and writes blocks back out.
pub trait FormatAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Builds the structural model. Pure read: no output is produced.
    fn parse(&self, source: &Path) -> Result<Document>;

    /// Writes `blocks` (same shapes and order as `template.blocks`) into a staged file in
    /// the directory of `output_path`. Nothing exists at `output_path` until the staged file
    /// is persisted.
    fn reassemble(
        &self,
        blocks: &[&Block],
        template: &Document,
        output_path: &Path,
    ) -> Result<NamedTempFile>;

    /// Reassembles translated chunks in index order and moves the result to `output_path`.
    fn concatenate(
        &self,
        translated: &[TranslatedChunk],
        template: &Document,
        output_path: &Path,
    ) -> Result<()> {
        let blocks = ordered_blocks(translated)?;
        let staged = self.reassemble(&blocks, template, output_path)?;
        persist(staged, output_path)
    }
}

/// Atomically moves a staged output file into place.
pub fn persist(staged: NamedTempFile, output_path: &Path) -> Result<()> {
    staged
        .persist(output_path)
        .map(|_| ())
        .map_err(|e| Error::io(output_path, e.error))
}

/// A temporary `.docx` next to `output_path`, so the final rename stays on one filesystem.
pub(crate) fn stage_output(output_path: &Path) -> Result<NamedTempFile> {
    let dir = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tempfile::Builder::new()
        .prefix(".doc-translator-")
        .suffix(".docx")
        .tempfile_in(dir)
        .map_err(|e| Error::io(dir, e))
}

/// Translated blocks must line up one-to-one with the template's blocks.
pub(crate) fn check_against_template(blocks: &[&Block], template: &Document) -> Result<()> {
    if blocks.len() != template.blocks.len() {
        return Err(Error::translation(
            None,
            format!(
                "{} blocks to write but the source has {}",
                blocks.len(),
                template.blocks.len()
            ),
        ));
    }
    if let Some(pos) = blocks
        .iter()
        .zip(&template.blocks)
        .position(|(b, t)| !b.same_shape(t))
    {
        return Err(Error::translation(
            None,
            format!("block {pos} does not match the source structure"),
        ));
    }
    Ok(())
}

/// How a source file is turned into blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// `.docx` read and rewritten directly.
    Native,
    /// `.docx` through Pandoc Markdown.
    Pandoc,
    /// `.pdf` through MinerU Markdown.
    Mineru,
}

impl FromStr for AdapterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "docx" => Ok(Self::Native),
            "pandoc" => Ok(Self::Pandoc),
            "mineru" | "pdf" => Ok(Self::Mineru),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown mode {other:?} (expected native, pandoc or mineru)"
            ))),
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Native => "native",
            Self::Pandoc => "pandoc",
            Self::Mineru => "mineru",
        })
    }
}

/// The adapter kind that can read `format`, given the requested mode. PDFs always go
/// through MinerU.
pub fn resolve_kind(format: SourceFormat, requested: AdapterKind) -> Result<AdapterKind> {
    match (format, requested) {
        (SourceFormat::Pdf, _) => Ok(AdapterKind::Mineru),
        (SourceFormat::Docx, AdapterKind::Mineru) => Err(Error::InvalidConfiguration(
            "mode mineru reads PDF files only; use native or pandoc for .docx".into(),
        )),
        (SourceFormat::Docx, kind) => Ok(kind),
    }
}

/// Picks and prepares the adapter for `input`. Markup-mediated adapters check that their
/// external tools run before anything is read.
pub fn select(
    input: &Path,
    requested: AdapterKind,
    converters: &ConverterOptions,
) -> Result<Box<dyn FormatAdapter>> {
    let format = SourceFormat::from_path(input)
        .ok_or_else(|| Error::unsupported(input, "unknown extension (expected .docx or .pdf)"))?;
    let kind = resolve_kind(format, requested)?;
    let pandoc = || PandocConverter::new(&converters.pandoc, converters.pandoc_timeout);

    let adapter: Box<dyn FormatAdapter> = match kind {
        AdapterKind::Native => Box::new(NativeDocxAdapter::new()),
        AdapterKind::Pandoc => {
            let conv = pandoc();
            conv.check_available()?;
            Box::new(MarkdownAdapter::new(MarkdownFlavor::Pandoc, Box::new(conv))?)
        }
        AdapterKind::Mineru => {
            let conv = MineruConverter::new(
                &converters.mineru,
                converters.mineru_backend.clone(),
                converters.mineru_timeout,
                pandoc(),
            );
            conv.check_available()?;
            Box::new(MarkdownAdapter::new(MarkdownFlavor::Mineru, Box::new(conv))?)
        }
    };
    if kind != requested {
        info!("mode {requested} does not apply to {}; using {kind}", input.display());
    }
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{resolve_kind, select, AdapterKind};
    use crate::config::ConverterOptions;
    use crate::error::Error;
    use crate::ir::SourceFormat;

    #[test]
    fn mode_names_parse() {
        assert_eq!("Native".parse::<AdapterKind>().expect("native"), AdapterKind::Native);
        assert_eq!("pdf".parse::<AdapterKind>().expect("pdf"), AdapterKind::Mineru);
        assert!(matches!(
            "ocr".parse::<AdapterKind>(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn pdf_always_uses_mineru() {
        assert_eq!(
            resolve_kind(SourceFormat::Pdf, AdapterKind::Native).expect("pdf"),
            AdapterKind::Mineru
        );
        assert!(resolve_kind(SourceFormat::Docx, AdapterKind::Mineru).is_err());
        assert_eq!(
            resolve_kind(SourceFormat::Docx, AdapterKind::Pandoc).expect("docx"),
            AdapterKind::Pandoc
        );
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let err = select(Path::new("notes.txt"), AdapterKind::Native, &ConverterOptions::default())
            .err()
            .expect("unsupported");
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn missing_converter_is_a_configuration_error() {
        let converters = ConverterOptions {
            pandoc: "definitely-not-pandoc-4242".into(),
            ..ConverterOptions::default()
        };
        let err = select(Path::new("in.docx"), AdapterKind::Pandoc, &converters)
            .err()
            .expect("missing tool");
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }
}
