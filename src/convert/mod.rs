//! External format converters (Pandoc, MinerU), driven as subprocesses.

use std::path::{Path, PathBuf};

use crate::error::Result;

pub mod mineru;
pub mod pandoc;
pub mod process;

pub use mineru::MineruConverter;
pub use pandoc::PandocConverter;

/// Markup pulled out of a source file, plus the directory its relative resource links
/// (extracted images) resolve against.
#[derive(Clone, Debug)]
pub struct Extracted {
    pub markup: String,
    pub resource_dir: PathBuf,
}

/// A black-box transform between a native document and an intermediate markup text.
pub trait MarkupConverter: Send + Sync {
    /// Tool name used in diagnostics.
    fn tool(&self) -> &str;

    /// Fails with `InvalidConfiguration` if the tool cannot be run.
    fn check_available(&self) -> Result<()>;

    /// Converts `source` to markup. Scratch files (media, intermediate output) go under
    /// `workdir`, which must outlive the returned [`Extracted`].
    fn external_markup_from_native(&self, source: &Path, workdir: &Path) -> Result<Extracted>;

    /// Converts markup into a native document at `output`, borrowing styles from
    /// `style_template` when given.
    fn native_from_markup(
        &self,
        markup: &str,
        style_template: Option<&Path>,
        resource_dir: &Path,
        output: &Path,
    ) -> Result<()>;
}
