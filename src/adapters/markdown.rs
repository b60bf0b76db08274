use std::path::Path;

use log::debug;
use tempfile::{NamedTempFile, TempDir};

use crate::adapters::{check_against_template, stage_output, FormatAdapter};
use crate::convert::MarkupConverter;
use crate::error::{Error, Result};
use crate::ir::{Block, Document, SourceFormat, SourceRef};
use crate::markup::markdown::{parse_blocks, render_blocks};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkdownFlavor {
    /// `.docx` via Pandoc; the source document is the reference doc on the way back.
    Pandoc,
    /// `.pdf` via MinerU; there is no Word template to borrow styles from.
    Mineru,
}

impl MarkdownFlavor {
    fn source_format(self) -> SourceFormat {
        match self {
            Self::Pandoc => SourceFormat::Docx,
            Self::Mineru => SourceFormat::Pdf,
        }
    }
}

/// Adapter for formats that go through an intermediate Markdown text. Extracted media
/// lives in a scratch directory owned by the adapter.
pub struct MarkdownAdapter {
    flavor: MarkdownFlavor,
    converter: Box<dyn MarkupConverter>,
    workdir: TempDir,
}

impl MarkdownAdapter {
    pub fn new(flavor: MarkdownFlavor, converter: Box<dyn MarkupConverter>) -> Result<Self> {
        let workdir = tempfile::Builder::new()
            .prefix("doc-translator-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        Ok(Self {
            flavor,
            converter,
            workdir,
        })
    }
}

impl FormatAdapter for MarkdownAdapter {
    fn name(&self) -> &str {
        match self.flavor {
            MarkdownFlavor::Pandoc => "pandoc",
            MarkdownFlavor::Mineru => "mineru",
        }
    }

    fn parse(&self, source: &Path) -> Result<Document> {
        let format = self.flavor.source_format();
        if SourceFormat::from_path(source) != Some(format) {
            return Err(Error::unsupported(
                source,
                format!("{} mode cannot read this file type", self.name()),
            ));
        }
        if !source.is_file() {
            return Err(Error::unsupported(source, "file not found"));
        }
        let extracted = self
            .converter
            .external_markup_from_native(source, self.workdir.path())?;
        let blocks = parse_blocks(&extracted.markup);
        debug!(
            "{}: {} blocks from {} bytes of markdown",
            source.display(),
            blocks.len(),
            extracted.markup.len()
        );
        let mut source_ref = SourceRef::new(source, format);
        source_ref.resource_dir = Some(extracted.resource_dir);
        Ok(Document::new(blocks, source_ref))
    }

    fn reassemble(
        &self,
        blocks: &[&Block],
        template: &Document,
        output_path: &Path,
    ) -> Result<NamedTempFile> {
        check_against_template(blocks, template)?;
        let markdown = render_blocks(blocks.iter().copied());

        let style_template = match self.flavor {
            MarkdownFlavor::Pandoc => Some(template.source.path.as_path()),
            MarkdownFlavor::Mineru => None,
        };
        let resource_dir = template
            .source
            .resource_dir
            .as_deref()
            .unwrap_or(self.workdir.path());

        let staged = stage_output(output_path)?;
        self.converter
            .native_from_markup(&markdown, style_template, resource_dir, staged.path())?;
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use super::{MarkdownAdapter, MarkdownFlavor};
    use crate::adapters::FormatAdapter;
    use crate::chunk::{split, TranslatedChunk};
    use crate::convert::{Extracted, MarkupConverter};
    use crate::error::{Error, Result};
    use crate::ir::BlockKind;
    use crate::markup::markdown::parse_blocks;

    type Written = Arc<Mutex<Option<(String, bool)>>>;

    /// Converter double: hands out fixed Markdown and records what comes back.
    struct CannedConverter {
        markdown: &'static str,
        written: Written,
    }

    impl MarkupConverter for CannedConverter {
        fn tool(&self) -> &str {
            "canned"
        }

        fn check_available(&self) -> Result<()> {
            Ok(())
        }

        fn external_markup_from_native(&self, _source: &Path, workdir: &Path) -> Result<Extracted> {
            Ok(Extracted {
                markup: self.markdown.to_string(),
                resource_dir: workdir.to_path_buf(),
            })
        }

        fn native_from_markup(
            &self,
            markup: &str,
            style_template: Option<&Path>,
            _resource_dir: &Path,
            output: &Path,
        ) -> Result<()> {
            *self.written.lock().expect("lock") = Some((markup.to_string(), style_template.is_some()));
            std::fs::write(output, b"docx").map_err(|e| Error::io(output, e))
        }
    }

    const MD: &str = "# Scope\n\nThe valve | gasket set.\n\n| Part | Qty |\n|---|---|\n| Bolt | 4 |\n";

    #[test]
    fn translated_text_is_escaped_on_the_way_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.docx");
        std::fs::write(&input, b"placeholder").expect("write input");

        let written = Written::default();
        let conv = CannedConverter {
            markdown: MD,
            written: written.clone(),
        };
        let adapter = MarkdownAdapter::new(MarkdownFlavor::Pandoc, Box::new(conv)).expect("adapter");
        let doc = adapter.parse(&input).expect("parse");
        assert_eq!(
            doc.kinds(),
            vec![BlockKind::Heading { level: 1 }, BlockKind::Paragraph, BlockKind::Table]
        );

        let chunks = split(&doc, 4000).expect("split");
        let mut translated: Vec<TranslatedChunk> = chunks
            .iter()
            .map(|c| TranslatedChunk::identity(c, "de"))
            .collect();
        translated[0].blocks[1].text = "# Das Ventil | Dichtungssatz.".into();
        translated[0].blocks[2].rows[1][0].blocks[0].text = "Schraube | M6".into();

        let out = dir.path().join("out.docx");
        adapter.concatenate(&translated, &doc, &out).expect("concatenate");
        assert!(out.is_file());

        let (markdown, used_template) = written.lock().expect("lock").clone().expect("written");
        assert!(used_template);
        let back = parse_blocks(&markdown);
        assert_eq!(back.len(), 3);
        assert_eq!(back[1].kind, BlockKind::Paragraph);
        assert_eq!(back[1].text, "# Das Ventil | Dichtungssatz.");
        assert_eq!(back[2].table_shape(), (2, 2));
        assert_eq!(back[2].texts(), vec!["Part", "Qty", "Schraube | M6", "4"]);
    }

    #[test]
    fn wrong_extension_is_unsupported() {
        let conv = CannedConverter {
            markdown: MD,
            written: Written::default(),
        };
        let adapter = MarkdownAdapter::new(MarkdownFlavor::Mineru, Box::new(conv)).expect("adapter");
        let err = adapter.parse(Path::new("in.docx")).expect_err("pdf only");
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }
}
