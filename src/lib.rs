//! Chunked document translation with structure-preserving reassembly.
//!
//! A source file (`.docx`, or `.pdf` through MinerU) is read into a sequence of blocks,
//! split into chunks that never cut through a table or orphan a heading, sent to a
//! translation model chunk by chunk, and written back as `.docx` with the source layout.

pub mod adapters;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod convert;
pub mod docx;
pub mod error;
pub mod ir;
pub mod markup;
pub mod pipeline;
pub mod progress;
pub mod translate;

pub use error::{Error, Result, Stage};
