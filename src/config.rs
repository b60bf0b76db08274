use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::adapters::{resolve_kind, AdapterKind};
use crate::error::{Error, Result};
use crate::ir::SourceFormat;
use crate::translate::PromptStyle;

pub const CONFIG_FILE_NAME: &str = "doc-translator.toml";
pub const CONFIG_ENV: &str = "DOC_TRANSLATOR_CONFIG";

pub const DEFAULT_MAX_CHARS: usize = 4000;
pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_TARGET_LANGUAGE: &str = "English";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub ollama: OllamaSection,
    #[serde(default)]
    pub converters: ConvertersSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    /// Chunk size budget in characters.
    #[serde(default)]
    pub max_chars: Option<usize>,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Send chunks as Markdown (headings, pipe tables) instead of plain text with markers.
    #[serde(default)]
    pub use_structured_prompt: Option<bool>,
    /// "native", "pandoc" or "mineru".
    #[serde(default)]
    pub mode: Option<String>,
    /// Chunks translated at the same time.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Abort the whole run after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub trace_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OllamaSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConvertersSection {
    #[serde(default)]
    pub pandoc: Option<PathBuf>,
    #[serde(default)]
    pub mineru: Option<PathBuf>,
    #[serde(default)]
    pub mineru_backend: Option<String>,
    #[serde(default)]
    pub pandoc_timeout_secs: Option<u64>,
    #[serde(default)]
    pub mineru_timeout_secs: Option<u64>,
}

/// Resolved settings for the external converters.
#[derive(Clone, Debug)]
pub struct ConverterOptions {
    pub pandoc: PathBuf,
    pub mineru: PathBuf,
    pub mineru_backend: String,
    pub pandoc_timeout: Duration,
    pub mineru_timeout: Duration,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            pandoc: PathBuf::from("pandoc"),
            mineru: PathBuf::from("mineru"),
            mineru_backend: "pipeline".to_string(),
            pandoc_timeout: Duration::from_secs(120),
            mineru_timeout: Duration::from_secs(600),
        }
    }
}

impl ConverterOptions {
    pub fn from_section(section: &ConvertersSection) -> Self {
        let d = Self::default();
        Self {
            pandoc: section.pandoc.clone().unwrap_or(d.pandoc),
            mineru: section.mineru.clone().unwrap_or(d.mineru),
            mineru_backend: section.mineru_backend.clone().unwrap_or(d.mineru_backend),
            pandoc_timeout: section
                .pandoc_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(d.pandoc_timeout),
            mineru_timeout: section
                .mineru_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(d.mineru_timeout),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OllamaOptions {
    pub base_url: String,
    pub request_timeout: Duration,
    pub temperature: Option<f32>,
}

impl Default for OllamaOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            request_timeout: Duration::from_secs(300),
            temperature: None,
        }
    }
}

impl OllamaOptions {
    pub fn from_section(section: &OllamaSection) -> Self {
        let d = Self::default();
        Self {
            base_url: section.base_url.clone().unwrap_or(d.base_url),
            request_timeout: section
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(d.request_timeout),
            temperature: section.temperature,
        }
    }
}

/// Everything one `translate` run needs. Built from defaults, then the config file, then
/// command-line overrides; checked by [`TranslateOptions::validate`] before any file I/O.
#[derive(Clone, Debug)]
pub struct TranslateOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub max_chars: usize,
    pub target_language: String,
    pub model: String,
    pub use_structured_prompt: bool,
    pub mode: AdapterKind,
    pub concurrency: usize,
    pub timeout: Option<Duration>,
    pub trace_dir: Option<PathBuf>,
    /// Skip the model availability check.
    pub force: bool,
    pub converters: ConverterOptions,
    pub ollama: OllamaOptions,
}

impl TranslateOptions {
    pub fn new(input: impl Into<PathBuf>, target_language: impl Into<String>) -> Self {
        let input = input.into();
        let target_language = target_language.into();
        let output = default_output_path(&input, &target_language);
        Self {
            input,
            output,
            max_chars: DEFAULT_MAX_CHARS,
            target_language,
            model: DEFAULT_MODEL.to_string(),
            use_structured_prompt: false,
            mode: AdapterKind::Native,
            concurrency: 1,
            timeout: None,
            trace_dir: None,
            force: false,
            converters: ConverterOptions::default(),
            ollama: OllamaOptions::default(),
        }
    }

    /// Defaults overlaid with the config file. The output path is derived from the input
    /// and the configured language; callers may override it afterwards.
    pub fn from_config(cfg: &AppConfig, input: impl Into<PathBuf>) -> Result<Self> {
        let p = &cfg.pipeline;
        let language = p
            .target_language
            .clone()
            .unwrap_or_else(|| DEFAULT_TARGET_LANGUAGE.to_string());
        let mut opts = Self::new(input, language);
        if let Some(v) = p.max_chars {
            opts.max_chars = v;
        }
        if let Some(v) = p.model.as_ref() {
            opts.model = v.clone();
        }
        if let Some(v) = p.use_structured_prompt {
            opts.use_structured_prompt = v;
        }
        if let Some(v) = p.mode.as_deref() {
            opts.mode = v.parse()?;
        }
        if let Some(v) = p.concurrency {
            opts.concurrency = v;
        }
        opts.timeout = p.timeout_secs.map(Duration::from_secs);
        opts.trace_dir = p.trace_dir.clone();
        opts.converters = ConverterOptions::from_section(&cfg.converters);
        opts.ollama = OllamaOptions::from_section(&cfg.ollama);
        Ok(opts)
    }

    /// Input format family, by extension.
    pub fn source_format(&self) -> Option<SourceFormat> {
        SourceFormat::from_path(&self.input)
    }

    /// Chunks read through Markdown are always sent as Markdown.
    pub fn prompt_style(&self) -> PromptStyle {
        let mediated = self
            .source_format()
            .and_then(|f| resolve_kind(f, self.mode).ok())
            .is_some_and(|k| k != AdapterKind::Native);
        PromptStyle::from_structured(self.use_structured_prompt || mediated)
    }

    /// Rejects settings that can never produce a run. Performs no I/O.
    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(Error::InvalidConfiguration(
                "max_chars must be a positive number of characters".into(),
            ));
        }
        if self.target_language.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "target language must not be empty".into(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfiguration("model must not be empty".into()));
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidConfiguration(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidConfiguration(
                "timeout must be greater than zero".into(),
            ));
        }
        if SourceFormat::from_path(&self.output) != Some(SourceFormat::Docx) {
            return Err(Error::InvalidConfiguration(format!(
                "unsupported output format: {} (only .docx is written)",
                self.output.display()
            )));
        }
        if self.output == self.input {
            return Err(Error::InvalidConfiguration(
                "output path must differ from the input path".into(),
            ));
        }
        Ok(())
    }
}

/// `<stem>_translated_<language>.docx` next to the input.
pub fn default_output_path(input: &Path, target_language: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let lang: String = target_language
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    input.with_file_name(format!("{stem}_translated_{lang}.docx"))
}

/// Rewrites a `.pdf` output path to `.docx`: the converters can only write Word files.
pub fn docx_output_for(output: &Path) -> Option<PathBuf> {
    (SourceFormat::from_path(output) == Some(SourceFormat::Pdf))
        .then(|| output.with_extension("docx"))
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

/// Config file location: `$DOC_TRANSLATOR_CONFIG`, else the first `doc-translator.toml`
/// found walking up from the current directory, `workdir`, or the executable's directory.
pub fn find_default_config(workdir: &Path) -> Option<PathBuf> {
    if let Some(p) = std::env::var_os(CONFIG_ENV).map(PathBuf::from) {
        if p.is_file() {
            return Some(p);
        }
        log::warn!("{CONFIG_ENV} points at {} which does not exist", p.display());
    }
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, CONFIG_FILE_NAME, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, CONFIG_FILE_NAME, 8) {
        return Some(p);
    }
    let exe = std::env::current_exe().ok()?;
    find_file_upwards(exe.parent()?, CONFIG_FILE_NAME, 4)
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_config(&text)
        .map_err(|e| Error::InvalidConfiguration(format!("{}: {e}", path.display())))
}

pub fn parse_config(text: &str) -> std::result::Result<AppConfig, toml::de::Error> {
    toml::from_str(text)
}

pub const DEFAULT_CONFIG_TOML: &str = r#"# doc-translator configuration.
# Command-line flags override these values.

[pipeline]
# Chunk size budget in characters. Tables and heading groups are never split, so a
# single large table may exceed it.
max_chars = 4000
target_language = "English"
model = "llama3.2"
# Send chunks as Markdown instead of plain text with [TABLE] markers.
use_structured_prompt = false
# native: rewrite .docx text in place
# pandoc: .docx through Pandoc Markdown
# mineru: .pdf through MinerU, written back as .docx
mode = "native"
# Chunks translated at the same time (1 = one after another).
concurrency = 1
# Abort the run after this many seconds.
# timeout_secs = 3600
# Per-chunk source/translation dumps.
# trace_dir = "trace"

[ollama]
base_url = "http://localhost:11434"
request_timeout_secs = 300
# temperature = 0.2

[converters]
pandoc = "pandoc"
mineru = "mineru"
mineru_backend = "pipeline"
pandoc_timeout_secs = 120
mineru_timeout_secs = 600
"#;

/// Writes the default config into `dir`. An existing file is kept unless `force`.
pub fn init_default_config(dir: &Path, force: bool) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);
    if cfg_path.exists() && !force {
        return Err(Error::InvalidConfiguration(format!(
            "{} already exists (use --force to overwrite)",
            cfg_path.display()
        )));
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML).map_err(|e| Error::io(&cfg_path, e))?;
    Ok(cfg_path)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::{
        default_output_path, docx_output_for, init_default_config, load_config, parse_config,
        TranslateOptions, DEFAULT_MAX_CHARS,
    };
    use crate::adapters::AdapterKind;
    use crate::error::Error;
    use crate::translate::PromptStyle;

    #[test]
    fn default_config_parses_to_defaults() {
        let cfg = parse_config(super::DEFAULT_CONFIG_TOML).expect("parse");
        let opts = TranslateOptions::from_config(&cfg, "report.docx").expect("options");
        assert_eq!(opts.max_chars, DEFAULT_MAX_CHARS);
        assert_eq!(opts.model, "llama3.2");
        assert_eq!(opts.mode, AdapterKind::Native);
        assert_eq!(opts.converters.mineru_timeout, Duration::from_secs(600));
        assert_eq!(opts.output, PathBuf::from("report_translated_English.docx"));
        opts.validate().expect("valid");
    }

    #[test]
    fn file_values_override_defaults() {
        let cfg = parse_config(
            "[pipeline]\nmax_chars = 1200\nmode = \"pandoc\"\ntarget_language = \"Brazilian Portuguese\"\n[ollama]\nbase_url = \"http://gpu:11434\"\n",
        )
        .expect("parse");
        let opts = TranslateOptions::from_config(&cfg, "/data/in.docx").expect("options");
        assert_eq!(opts.max_chars, 1200);
        assert_eq!(opts.mode, AdapterKind::Pandoc);
        assert_eq!(opts.ollama.base_url, "http://gpu:11434");
        assert_eq!(
            opts.output,
            PathBuf::from("/data/in_translated_Brazilian_Portuguese.docx")
        );
    }

    #[test]
    fn unknown_keys_and_modes_are_rejected() {
        assert!(parse_config("[pipeline]\nmax_char = 10\n").is_err());
        let cfg = parse_config("[pipeline]\nmode = \"ocr\"\n").expect("parse");
        assert!(matches!(
            TranslateOptions::from_config(&cfg, "a.docx"),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let base = TranslateOptions::new("in.docx", "German");
        base.validate().expect("valid");

        let mut o = base.clone();
        o.max_chars = 0;
        assert!(matches!(o.validate(), Err(Error::InvalidConfiguration(_))));

        let mut o = base.clone();
        o.target_language = "  ".into();
        assert!(o.validate().is_err());

        let mut o = base.clone();
        o.output = PathBuf::from("out.odt");
        assert!(o.validate().is_err());

        let mut o = base.clone();
        o.concurrency = 0;
        assert!(o.validate().is_err());

        let mut o = base;
        o.output = PathBuf::from("in.docx");
        assert!(o.validate().is_err());
    }

    #[test]
    fn markdown_modes_use_structured_prompts() {
        let mut o = TranslateOptions::new("in.docx", "German");
        assert_eq!(o.prompt_style(), PromptStyle::Plain);
        o.mode = AdapterKind::Pandoc;
        assert_eq!(o.prompt_style(), PromptStyle::Structured);
        let pdf = TranslateOptions::new("scan.pdf", "German");
        assert_eq!(pdf.prompt_style(), PromptStyle::Structured);
    }

    #[test]
    fn pdf_output_becomes_docx() {
        assert_eq!(
            docx_output_for(Path::new("out/scan.pdf")),
            Some(PathBuf::from("out/scan.docx"))
        );
        assert_eq!(docx_output_for(Path::new("out/scan.docx")), None);
        assert_eq!(
            default_output_path(Path::new("scan.pdf"), "fr"),
            PathBuf::from("scan_translated_fr.docx")
        );
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_default_config(dir.path(), false).expect("first write");
        load_config(&path).expect("written config loads");
        assert!(init_default_config(dir.path(), false).is_err());
        init_default_config(dir.path(), true).expect("forced");
    }
}
