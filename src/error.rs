use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Load,
    Split,
    Translate,
    Reassemble,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Configure => "configure",
            Self::Load => "load",
            Self::Split => "split",
            Self::Translate => "translate",
            Self::Reassemble => "reassemble",
            Self::Write => "write",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the document translation pipeline.
///
/// Every variant is fatal for the run: nothing is downgraded to a warning and no output
/// file is written once one of these has been raised.
#[derive(Error, Debug)]
pub enum Error {
    /// The input could not be decoded into a structural model.
    #[error("unsupported format: {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// Bad size budget, language, output format or tool setup; raised before any I/O.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The translation collaborator failed or returned a misaligned result.
    #[error("translation failed{}: {reason}", chunk_suffix(.chunk_index))]
    TranslationFailure {
        chunk_index: Option<usize>,
        reason: String,
    },

    /// Translated chunk indices are not exactly `0..N-1`.
    #[error(
        "chunk sequence broken: missing={missing:?} duplicated={duplicated:?} unexpected={unexpected:?}"
    )]
    ChunkSequence {
        missing: Vec<usize>,
        duplicated: Vec<usize>,
        unexpected: Vec<usize>,
    },

    /// An external conversion collaborator (or the package writer) failed.
    #[error("{tool} conversion failed: {diagnostic}")]
    FormatConversion { tool: String, diagnostic: String },

    #[error("cancelled during {stage}")]
    Cancelled { stage: Stage },

    #[error("io error: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// First failure of a run, tagged with the stage it happened in.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

fn chunk_suffix(chunk_index: &Option<usize>) -> String {
    chunk_index
        .map(|i| format!(" (chunk {i})"))
        .unwrap_or_default()
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn unsupported(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::UnsupportedFormat {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn translation(chunk_index: Option<usize>, reason: impl fmt::Display) -> Self {
        Self::TranslationFailure {
            chunk_index,
            reason: reason.to_string(),
        }
    }

    pub fn conversion(tool: &str, diagnostic: impl fmt::Display) -> Self {
        Self::FormatConversion {
            tool: tool.to_string(),
            diagnostic: diagnostic.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Tags the error with a stage unless it already carries one.
    #[must_use]
    pub fn at_stage(self, stage: Stage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any stage tag removed.
    pub fn root(&self) -> &Error {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
