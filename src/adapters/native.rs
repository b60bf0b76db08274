use std::collections::HashMap;
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;

use crate::adapters::{check_against_template, stage_output, FormatAdapter};
use crate::docx::apply::apply_blocks;
use crate::docx::blocks::{document_blocks, StyleSheet, DOCUMENT_PART, STYLES_PART};
use crate::docx::package::DocxPackage;
use crate::docx::xml::{parse_xml_part, write_xml_part, XmlPart};
use crate::error::{Error, Result};
use crate::ir::{Block, Document, SourceFormat, SourceRef};

/// Reads `.docx` straight from `word/document.xml` and writes the translation back into a
/// copy of the source package. Only run text changes; every other entry is copied as is.
#[derive(Debug, Default)]
pub struct NativeDocxAdapter;

impl NativeDocxAdapter {
    pub fn new() -> Self {
        Self
    }
}

struct LoadedDocx {
    package: DocxPackage,
    document: XmlPart,
    blocks: Vec<Block>,
}

fn load(path: &Path) -> anyhow::Result<LoadedDocx> {
    use anyhow::Context;

    let package = DocxPackage::read(path)?;
    let doc_bytes = package
        .part(DOCUMENT_PART)
        .with_context(|| format!("missing {DOCUMENT_PART}"))?;
    let document = parse_xml_part(DOCUMENT_PART, doc_bytes)?;
    let styles = match package.part(STYLES_PART) {
        Some(bytes) => StyleSheet::from_part(&parse_xml_part(STYLES_PART, bytes)?),
        None => StyleSheet::default(),
    };
    let blocks = document_blocks(&document, &styles)?;
    Ok(LoadedDocx {
        package,
        document,
        blocks,
    })
}

impl FormatAdapter for NativeDocxAdapter {
    fn name(&self) -> &str {
        "native"
    }

    fn parse(&self, source: &Path) -> Result<Document> {
        if SourceFormat::from_path(source) != Some(SourceFormat::Docx) {
            return Err(Error::unsupported(source, "native mode reads .docx files only"));
        }
        let loaded = load(source).map_err(|e| Error::unsupported(source, format!("{e:#}")))?;
        debug!(
            "{}: {} blocks from {DOCUMENT_PART}",
            source.display(),
            loaded.blocks.len()
        );
        Ok(Document::new(
            loaded.blocks,
            SourceRef::new(source, SourceFormat::Docx),
        ))
    }

    fn reassemble(
        &self,
        blocks: &[&Block],
        template: &Document,
        output_path: &Path,
    ) -> Result<NamedTempFile> {
        check_against_template(blocks, template)?;

        let source = &template.source.path;
        let mut loaded =
            load(source).map_err(|e| Error::conversion("docx", format!("{e:#}")))?;
        if loaded.blocks != template.blocks {
            return Err(Error::conversion(
                "docx",
                format!("{} changed since it was read", source.display()),
            ));
        }

        apply_blocks(&mut loaded.document, blocks.iter().copied())
            .map_err(|e| Error::conversion("docx", format!("{e:#}")))?;
        let xml = write_xml_part(&loaded.document)
            .map_err(|e| Error::conversion("docx", format!("{e:#}")))?;

        let mut staged = stage_output(output_path)?;
        let replacements = HashMap::from([(DOCUMENT_PART.to_string(), xml)]);
        loaded
            .package
            .write_with_replacements(staged.as_file_mut(), &replacements)
            .map_err(|e| Error::conversion("docx", format!("{e:#}")))?;
        Ok(staged)
    }
}
