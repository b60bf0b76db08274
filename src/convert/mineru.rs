use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use walkdir::WalkDir;

use crate::convert::pandoc::absolute;
use crate::convert::process::{run_tool, tool_available};
use crate::convert::{Extracted, MarkupConverter, PandocConverter};
use crate::error::{Error, Result};

/// PDF to Markdown through MinerU. The way back to a document goes through Pandoc, since
/// MinerU only reads PDFs.
pub struct MineruConverter {
    program: PathBuf,
    backend: String,
    timeout: Duration,
    writer: PandocConverter,
}

impl MineruConverter {
    pub fn new(
        program: impl Into<PathBuf>,
        backend: impl Into<String>,
        timeout: Duration,
        writer: PandocConverter,
    ) -> Self {
        Self {
            program: program.into(),
            backend: backend.into(),
            timeout,
            writer,
        }
    }
}

impl MarkupConverter for MineruConverter {
    fn tool(&self) -> &str {
        "mineru"
    }

    fn check_available(&self) -> Result<()> {
        if !tool_available(&self.program) {
            return Err(Error::InvalidConfiguration(format!(
                "mineru not found (tried {}); it is required for PDF input",
                self.program.display()
            )));
        }
        self.writer.check_available()
    }

    fn external_markup_from_native(&self, source: &Path, workdir: &Path) -> Result<Extracted> {
        let source = absolute(source)?;
        let out_dir = workdir.join("mineru");
        std::fs::create_dir_all(&out_dir).map_err(|e| Error::io(&out_dir, e))?;

        info!("extracting {} with mineru ({})", source.display(), self.backend);
        run_tool(
            &self.program,
            [
                OsStr::new("-p"),
                source.as_os_str(),
                OsStr::new("-o"),
                out_dir.as_os_str(),
                OsStr::new("-b"),
                OsStr::new(&self.backend),
            ],
            Some(workdir),
            self.timeout,
        )
        .map_err(|e| Error::conversion("mineru", format!("{e:#}")))?;

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let md_path = find_markdown(&out_dir, &stem).ok_or_else(|| {
            Error::conversion(
                "mineru",
                format!("no markdown output found under {}", out_dir.display()),
            )
        })?;
        debug!("mineru markdown: {}", md_path.display());

        let markup =
            std::fs::read_to_string(&md_path).map_err(|e| Error::io(&md_path, e))?;
        let resource_dir = md_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(out_dir);
        Ok(Extracted {
            markup,
            resource_dir,
        })
    }

    fn native_from_markup(
        &self,
        markup: &str,
        style_template: Option<&Path>,
        resource_dir: &Path,
        output: &Path,
    ) -> Result<()> {
        self.writer
            .native_from_markup(markup, style_template, resource_dir, output)
    }
}

/// `<stem>.md` anywhere below `dir`, else the first Markdown file found.
fn find_markdown(dir: &Path, stem: &str) -> Option<PathBuf> {
    let mut fallback = None;
    for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("md")
        {
            continue;
        }
        if path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
            return Some(path.to_path_buf());
        }
        fallback.get_or_insert_with(|| path.to_path_buf());
    }
    fallback
}
