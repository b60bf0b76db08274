use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use crate::convert::process::{run_tool, tool_available};
use crate::convert::{Extracted, MarkupConverter};
use crate::error::{Error, Result};

/// Markdown flavour requested from Pandoc: only pipe tables, so anything a pipe table cannot
/// hold comes out as an HTML table.
const MARKDOWN_WRITER: &str = "markdown-grid_tables-multiline_tables-simple_tables";
const MARKDOWN_READER: &str = "markdown";

pub struct PandocConverter {
    program: PathBuf,
    timeout: Duration,
}

impl PandocConverter {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn run(&self, args: Vec<OsString>, cwd: &Path) -> Result<Vec<u8>> {
        run_tool(&self.program, args, Some(cwd), self.timeout)
            .map(|out| out.stdout)
            .map_err(|e| Error::conversion("pandoc", format!("{e:#}")))
    }
}

impl MarkupConverter for PandocConverter {
    fn tool(&self) -> &str {
        "pandoc"
    }

    fn check_available(&self) -> Result<()> {
        if tool_available(&self.program) {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration(format!(
                "pandoc not found (tried {}); install it or choose mode \"native\"",
                self.program.display()
            )))
        }
    }

    fn external_markup_from_native(&self, source: &Path, workdir: &Path) -> Result<Extracted> {
        let source = absolute(source)?;
        let args: Vec<OsString> = vec![
            source.into_os_string(),
            "-f".into(),
            "docx".into(),
            "-t".into(),
            MARKDOWN_WRITER.into(),
            "--wrap=none".into(),
            "--markdown-headings=atx".into(),
            "--extract-media=.".into(),
        ];
        let stdout = self.run(args, workdir)?;
        let markup = String::from_utf8(stdout)
            .map_err(|e| Error::conversion("pandoc", format!("output is not UTF-8: {e}")))?;
        debug!("pandoc produced {} bytes of markdown", markup.len());
        Ok(Extracted {
            markup,
            resource_dir: workdir.to_path_buf(),
        })
    }

    fn native_from_markup(
        &self,
        markup: &str,
        style_template: Option<&Path>,
        resource_dir: &Path,
        output: &Path,
    ) -> Result<()> {
        let input = tempfile::Builder::new()
            .prefix("reassembled-")
            .suffix(".md")
            .tempfile_in(resource_dir)
            .map_err(|e| Error::io(resource_dir, e))?;
        std::fs::write(input.path(), markup).map_err(|e| Error::io(input.path(), e))?;

        let mut args: Vec<OsString> = vec![
            input.path().as_os_str().to_owned(),
            "-f".into(),
            MARKDOWN_READER.into(),
            "-t".into(),
            "docx".into(),
            "-o".into(),
            absolute(output)?.into_os_string(),
        ];
        if let Some(template) = style_template {
            let mut flag = OsString::from("--reference-doc=");
            flag.push(absolute(template)?);
            args.push(flag);
        }
        self.run(args, resource_dir)?;

        let written = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(Error::conversion(
                "pandoc",
                format!("no output written to {}", output.display()),
            ));
        }
        Ok(())
    }
}

pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| Error::io(path, e))
}
