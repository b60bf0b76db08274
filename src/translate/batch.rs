use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{debug, warn};

use crate::cancel::CancelToken;
use crate::chunk::{Chunk, TranslatedChunk};
use crate::error::{Error, Result, Stage};
use crate::pipeline::TraceWriter;
use crate::progress::ConsoleProgress;
use crate::translate::codec::{decode, encode, PromptStyle};
use crate::translate::{TextTranslator, TranslateBatch};

/// Turns a [`TextTranslator`] into a [`TranslateBatch`]: one request per chunk, replies
/// decoded back into blocks of the same shape.
///
/// With `concurrency > 1` chunks are dispatched from a shared queue to that many worker
/// threads; results are put back in index order before they are returned. The first
/// failure stops every worker from picking up new chunks.
pub struct BatchTranslator<T> {
    inner: T,
    style: PromptStyle,
    concurrency: usize,
    cancel: CancelToken,
    trace: TraceWriter,
    progress: Option<ConsoleProgress>,
}

impl<T: TextTranslator> BatchTranslator<T> {
    pub fn new(inner: T, style: PromptStyle) -> Self {
        Self {
            inner,
            style,
            concurrency: 1,
            cancel: CancelToken::new(),
            trace: TraceWriter::disabled(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ConsoleProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn translate_chunk(&self, chunk: &Chunk, target_language: &str) -> Result<TranslatedChunk> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                stage: Stage::Translate,
            });
        }
        let request = encode(chunk, self.style);
        if request.trim().is_empty() {
            debug!("chunk {}: nothing to translate", chunk.index);
            return Ok(TranslatedChunk::identity(chunk, target_language).with_model(self.inner.model()));
        }
        self.trace_text(chunk.index, "request", &request);

        let reply = self
            .inner
            .translate(&request, target_language)
            .map_err(|e| Error::translation(Some(chunk.index), format!("{e:#}")))?;
        self.trace_text(chunk.index, "reply", &reply);

        // a deadline that passed during the request discards the reply
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                stage: Stage::Translate,
            });
        }
        let blocks = decode(chunk, &reply, self.style)?;
        Ok(TranslatedChunk::new(chunk.index, blocks, target_language).with_model(self.inner.model()))
    }

    fn trace_text(&self, chunk_index: usize, kind: &str, text: &str) {
        if let Err(e) = self.trace.write_chunk_text(chunk_index, kind, text) {
            warn!("{e:#}");
        }
    }

    fn report(&self, done: usize, total: usize) {
        if let Some(p) = &self.progress {
            p.progress("Translate chunk", done, total);
        }
    }

    fn translate_sequential(&self, chunks: &[Chunk], target_language: &str) -> Result<Vec<TranslatedChunk>> {
        let mut out = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            out.push(self.translate_chunk(chunk, target_language)?);
            self.report(i + 1, chunks.len());
        }
        Ok(out)
    }

    fn translate_parallel(&self, chunks: &[Chunk], target_language: &str) -> Result<Vec<TranslatedChunk>> {
        let next = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let results: Mutex<Vec<(usize, TranslatedChunk)>> = Mutex::new(Vec::with_capacity(chunks.len()));
        let first_error: Mutex<Option<Error>> = Mutex::new(None);
        let workers = self.concurrency.min(chunks.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if failed.load(Ordering::SeqCst) {
                        break;
                    }
                    let pos = next.fetch_add(1, Ordering::SeqCst);
                    let Some(chunk) = chunks.get(pos) else {
                        break;
                    };
                    match self.translate_chunk(chunk, target_language) {
                        Ok(tc) => {
                            if let Ok(mut r) = results.lock() {
                                r.push((pos, tc));
                            }
                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            self.report(done, chunks.len());
                        }
                        Err(e) => {
                            failed.store(true, Ordering::SeqCst);
                            if let Ok(mut slot) = first_error.lock() {
                                slot.get_or_insert(e);
                            }
                            break;
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error.into_inner().ok().flatten() {
            return Err(e);
        }
        let mut results = results
            .into_inner()
            .map_err(|_| Error::translation(None, "a translation worker panicked"))?;
        if results.len() != chunks.len() {
            return Err(Error::translation(
                None,
                format!("{} of {} chunks translated", results.len(), chunks.len()),
            ));
        }
        results.sort_by_key(|(pos, _)| *pos);
        Ok(results.into_iter().map(|(_, tc)| tc).collect())
    }
}

impl<T: TextTranslator> TranslateBatch for BatchTranslator<T> {
    fn translate_batch(&self, chunks: &[Chunk], target_language: &str) -> Result<Vec<TranslatedChunk>> {
        if self.concurrency <= 1 || chunks.len() <= 1 {
            self.translate_sequential(chunks, target_language)
        } else {
            debug!(
                "translating {} chunks on {} workers",
                chunks.len(),
                self.concurrency.min(chunks.len())
            );
            self.translate_parallel(chunks, target_language)
        }
    }
}
