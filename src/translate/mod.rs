//! The translation boundary: what the pipeline needs from a model, and the adapters that
//! turn a text-in/text-out model into a chunk translator.

use crate::chunk::{Chunk, TranslatedChunk};
use crate::error::Result;

pub mod batch;
pub mod codec;
pub mod ollama;
pub mod prompts;

pub use batch::BatchTranslator;
pub use codec::PromptStyle;
pub use ollama::OllamaTranslator;

/// Translates a whole batch. The result has the same length as `chunks`, in index order,
/// and every element keeps the structure of its source chunk.
pub trait TranslateBatch: Send + Sync {
    fn translate_batch(&self, chunks: &[Chunk], target_language: &str) -> Result<Vec<TranslatedChunk>>;
}

/// A model that translates one request text at a time.
pub trait TextTranslator: Send + Sync {
    /// Identifier recorded on translated chunks.
    fn model(&self) -> &str;

    fn translate(&self, text: &str, target_language: &str) -> anyhow::Result<String>;

    fn list_models(&self) -> anyhow::Result<Vec<String>>;
}

impl<T: TextTranslator + ?Sized> TextTranslator for Box<T> {
    fn model(&self) -> &str {
        (**self).model()
    }

    fn translate(&self, text: &str, target_language: &str) -> anyhow::Result<String> {
        (**self).translate(text, target_language)
    }

    fn list_models(&self) -> anyhow::Result<Vec<String>> {
        (**self).list_models()
    }
}

/// Returns every request unchanged. Used for dry runs and round-trip checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTranslator;

impl TextTranslator for IdentityTranslator {
    fn model(&self) -> &str {
        "identity"
    }

    fn translate(&self, text: &str, _target_language: &str) -> anyhow::Result<String> {
        Ok(text.to_string())
    }

    fn list_models(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec![self.model().to_string()])
    }
}

impl TranslateBatch for IdentityTranslator {
    fn translate_batch(&self, chunks: &[Chunk], target_language: &str) -> Result<Vec<TranslatedChunk>> {
        Ok(chunks
            .iter()
            .map(|c| TranslatedChunk::identity(c, target_language).with_model(self.model()))
            .collect())
    }
}
