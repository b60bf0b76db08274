//! The run orchestrator: load, split, translate, reassemble, write. Strictly linear; the
//! first failure ends the run and nothing is written to the output path.

mod export;
mod trace;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::Serialize;

use crate::adapters::{self, AdapterKind, FormatAdapter};
use crate::cancel::CancelToken;
use crate::chunk::{check_batch, ordered_blocks, split, Chunk};
use crate::config::{ConverterOptions, TranslateOptions};
use crate::error::{Error, Result, Stage};
use crate::ir::Document;
use crate::progress::ConsoleProgress;
use crate::translate::TranslateBatch;

pub use export::{export_chunks, CHUNKS_JSON};
pub use trace::TraceWriter;

/// Summary of a finished run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub adapter: String,
    pub blocks: usize,
    pub chunks: usize,
    pub source_chars: usize,
    pub target_language: String,
    pub model: Option<String>,
    #[serde(with = "secs")]
    pub elapsed: Duration,
}

mod secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

pub struct Pipeline {
    opts: TranslateOptions,
    progress: ConsoleProgress,
    cancel: CancelToken,
}

impl Pipeline {
    /// A run deadline from `opts.timeout` starts counting here.
    pub fn new(opts: TranslateOptions, progress: ConsoleProgress) -> Self {
        let cancel = match opts.timeout {
            Some(t) => CancelToken::with_timeout(t),
            None => CancelToken::new(),
        };
        Self {
            opts,
            progress,
            cancel,
        }
    }

    /// Shares `cancel` with the run; a deadline from the options is dropped.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Hand this to the translator so a cancelled run also stops pending requests.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &TranslateOptions {
        &self.opts
    }

    /// Trace writer for the configured trace directory (disabled when there is none).
    pub fn trace_writer(&self) -> Result<TraceWriter> {
        match &self.opts.trace_dir {
            Some(dir) => TraceWriter::new(dir.clone(), true)
                .map_err(|e| Error::InvalidConfiguration(format!("{e:#}"))),
            None => Ok(TraceWriter::disabled()),
        }
    }

    /// Validates the options, picks the adapter for the input, then runs.
    pub fn run(&self, translator: &dyn TranslateBatch) -> Result<RunReport> {
        self.opts.validate().map_err(|e| e.at_stage(Stage::Configure))?;
        let adapter = adapters::select(&self.opts.input, self.opts.mode, &self.opts.converters)
            .map_err(|e| e.at_stage(Stage::Configure))?;
        self.run_with_adapter(adapter.as_ref(), translator)
    }

    /// Runs with a caller-chosen adapter. The options are still validated first.
    pub fn run_with_adapter(
        &self,
        adapter: &dyn FormatAdapter,
        translator: &dyn TranslateBatch,
    ) -> Result<RunReport> {
        let t0 = Instant::now();
        let opts = &self.opts;
        opts.validate().map_err(|e| e.at_stage(Stage::Configure))?;

        self.checkpoint(Stage::Load)?;
        self.progress.info(format!(
            "Load {} ({} mode)",
            opts.input.display(),
            adapter.name()
        ));
        let doc = adapter
            .parse(&opts.input)
            .map_err(|e| e.at_stage(Stage::Load))?;
        self.progress.info(format!(
            "Loaded {} blocks, {} characters",
            doc.blocks.len(),
            doc.char_count()
        ));

        self.checkpoint(Stage::Split)?;
        let chunks = split(&doc, opts.max_chars).map_err(|e| e.at_stage(Stage::Split))?;
        self.progress.info(format!(
            "Split into {} chunks (max {} characters)",
            chunks.len(),
            opts.max_chars
        ));
        self.trace_chunks(&chunks);

        self.checkpoint(Stage::Translate)?;
        self.progress.info(format!(
            "Translate to {} with {}",
            opts.target_language, opts.model
        ));
        let translated = translator
            .translate_batch(&chunks, &opts.target_language)
            .and_then(|t| check_batch(&chunks, &t).map(|()| t))
            .map_err(|e| e.at_stage(Stage::Translate))?;

        self.checkpoint(Stage::Reassemble)?;
        self.progress.info("Reassemble");
        let blocks = ordered_blocks(&translated).map_err(|e| e.at_stage(Stage::Reassemble))?;
        let staged = adapter
            .reassemble(&blocks, &doc, &opts.output)
            .map_err(|e| e.at_stage(Stage::Reassemble))?;

        // dropping `staged` on the way out removes the temporary file
        self.checkpoint(Stage::Write)?;
        adapters::persist(staged, &opts.output).map_err(|e| e.at_stage(Stage::Write))?;
        self.progress
            .info(format!("Wrote {}", opts.output.display()));

        let report = RunReport {
            input: opts.input.clone(),
            output: opts.output.clone(),
            adapter: adapter.name().to_string(),
            blocks: doc.blocks.len(),
            chunks: chunks.len(),
            source_chars: doc.char_count(),
            target_language: opts.target_language.clone(),
            model: translated.iter().find_map(|c| c.model.clone()),
            elapsed: t0.elapsed(),
        };
        info!(
            "{} -> {}: {} chunks in {:.1}s",
            report.input.display(),
            report.output.display(),
            report.chunks,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    fn checkpoint(&self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { stage }.at_stage(stage));
        }
        Ok(())
    }

    fn trace_chunks(&self, chunks: &[Chunk]) {
        let Some(dir) = &self.opts.trace_dir else {
            return;
        };
        let path = dir.join(CHUNKS_JSON);
        let written = std::fs::create_dir_all(dir)
            .map_err(anyhow::Error::from)
            .and_then(|()| Ok(serde_json::to_vec_pretty(chunks)?))
            .and_then(|json| Ok(std::fs::write(&path, json)?));
        match written {
            Ok(()) => debug!("wrote {}", path.display()),
            Err(e) => log::warn!("trace {}: {e:#}", path.display()),
        }
    }
}

/// Reads `input` and splits it, without translating. Used by the `chunk` command.
pub fn load_and_split(
    input: &Path,
    mode: AdapterKind,
    max_chars: usize,
    converters: &ConverterOptions,
) -> Result<(Document, Vec<Chunk>)> {
    if max_chars == 0 {
        return Err(Error::InvalidConfiguration(
            "max_chars must be a positive number of characters".into(),
        )
        .at_stage(Stage::Configure));
    }
    let adapter =
        adapters::select(input, mode, converters).map_err(|e| e.at_stage(Stage::Configure))?;
    let doc = adapter.parse(input).map_err(|e| e.at_stage(Stage::Load))?;
    let chunks = split(&doc, max_chars).map_err(|e| e.at_stage(Stage::Split))?;
    Ok((doc, chunks))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::NamedTempFile;

    use super::Pipeline;
    use crate::adapters::FormatAdapter;
    use crate::cancel::CancelToken;
    use crate::chunk::{Chunk, TranslatedChunk};
    use crate::config::TranslateOptions;
    use crate::error::{Error, Result, Stage};
    use crate::ir::{Block, Document, SourceFormat, SourceRef, StyleRef};
    use crate::progress::ConsoleProgress;
    use crate::translate::{IdentityTranslator, TranslateBatch};

    /// In-memory adapter: three paragraphs in, the rendered texts out.
    struct MemoryAdapter;

    impl FormatAdapter for MemoryAdapter {
        fn name(&self) -> &str {
            "memory"
        }

        fn parse(&self, source: &Path) -> Result<Document> {
            let blocks = (0..3)
                .map(|i| Block::paragraph("x".repeat(30), StyleRef::new(format!("p{i}"))))
                .collect();
            Ok(Document::new(blocks, SourceRef::new(source, SourceFormat::Docx)))
        }

        fn reassemble(&self, blocks: &[&Block], template: &Document, output_path: &Path) -> Result<NamedTempFile> {
            crate::adapters::check_against_template(blocks, template)?;
            let staged = crate::adapters::stage_output(output_path)?;
            let text: Vec<&str> = blocks.iter().map(|b| b.text.as_str()).collect();
            std::fs::write(staged.path(), text.join("\n")).map_err(|e| Error::io(staged.path(), e))?;
            Ok(staged)
        }
    }

    struct DropsLastChunk;

    impl TranslateBatch for DropsLastChunk {
        fn translate_batch(&self, chunks: &[Chunk], lang: &str) -> Result<Vec<TranslatedChunk>> {
            let mut out: Vec<TranslatedChunk> =
                chunks.iter().map(|c| TranslatedChunk::identity(c, lang)).collect();
            out.pop();
            Ok(out)
        }
    }

    struct Reorders;

    impl TranslateBatch for Reorders {
        fn translate_batch(&self, chunks: &[Chunk], lang: &str) -> Result<Vec<TranslatedChunk>> {
            let mut out: Vec<TranslatedChunk> =
                chunks.iter().map(|c| TranslatedChunk::identity(c, lang)).collect();
            out.reverse();
            Ok(out)
        }
    }

    fn options(dir: &Path) -> TranslateOptions {
        let mut opts = TranslateOptions::new(dir.join("in.docx"), "German");
        opts.output = dir.join("out.docx");
        opts.max_chars = 50;
        opts
    }

    #[test]
    fn identity_run_writes_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = Pipeline::new(options(dir.path()), ConsoleProgress::new(false));
        let report = p
            .run_with_adapter(&MemoryAdapter, &IdentityTranslator)
            .expect("run");
        assert_eq!(report.chunks, 3);
        assert_eq!(report.blocks, 3);
        assert_eq!(report.model.as_deref(), Some("identity"));
        let out = std::fs::read_to_string(dir.path().join("out.docx")).expect("output");
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn short_batch_fails_without_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = Pipeline::new(options(dir.path()), ConsoleProgress::new(false));
        let err = p.run_with_adapter(&MemoryAdapter, &DropsLastChunk).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Translate));
        assert!(matches!(err.root(), Error::TranslationFailure { chunk_index: None, .. }));
        assert!(!dir.path().join("out.docx").exists());
    }

    #[test]
    fn misaligned_batch_fails_without_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = Pipeline::new(options(dir.path()), ConsoleProgress::new(false));
        let err = p.run_with_adapter(&MemoryAdapter, &Reorders).unwrap_err();
        assert!(matches!(err.root(), Error::TranslationFailure { chunk_index: Some(0), .. }));
        assert!(!dir.path().join("out.docx").exists());
        // no staged leftovers either
        let leftovers = std::fs::read_dir(dir.path()).expect("read dir").count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn zero_budget_fails_before_reading() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut opts = options(dir.path());
        opts.max_chars = 0;
        let err = Pipeline::new(opts, ConsoleProgress::new(false))
            .run(&IdentityTranslator)
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Configure));
        assert!(matches!(err.root(), Error::InvalidConfiguration(_)));
    }

    #[test]
    fn cancelled_run_stops_at_the_next_stage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cancel = CancelToken::new();
        cancel.cancel();
        let p = Pipeline::new(options(dir.path()), ConsoleProgress::new(false)).with_cancel(cancel);
        let err = p
            .run_with_adapter(&MemoryAdapter, &IdentityTranslator)
            .unwrap_err();
        assert!(matches!(err.root(), Error::Cancelled { stage: Stage::Load }));
        assert!(!dir.path().join("out.docx").exists());
    }

    #[test]
    fn trace_dir_gets_the_chunk_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut opts = options(dir.path());
        opts.trace_dir = Some(dir.path().join("trace"));
        let p = Pipeline::new(opts, ConsoleProgress::new(false));
        p.run_with_adapter(&MemoryAdapter, &IdentityTranslator)
            .expect("run");
        assert!(dir.path().join("trace").join(super::CHUNKS_JSON).is_file());
    }
}
