use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use doc_translator::adapters::AdapterKind;
use doc_translator::config::{
    default_output_path, docx_output_for, find_default_config, init_default_config, load_config,
    AppConfig, OllamaOptions, TranslateOptions, CONFIG_ENV, DEFAULT_MODEL,
};
use doc_translator::pipeline::{export_chunks, load_and_split, Pipeline};
use doc_translator::progress::{level_for, ConsoleLogger, ConsoleProgress};
use doc_translator::translate::ollama::model_matches;
use doc_translator::translate::{
    BatchTranslator, IdentityTranslator, OllamaTranslator, PromptStyle, TextTranslator,
};
use doc_translator::Error;

#[derive(Parser, Debug)]
#[command(name = "doc-translator")]
#[command(about = "Translate .docx/.pdf documents chunk by chunk with a local model, keeping the layout", long_about = None)]
struct Cli {
    /// Config file path (default: search for doc-translator.toml upwards)
    #[arg(long, global = true, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Ollama server URL (overrides [ollama].base_url)
    #[arg(long, global = true, value_name = "URL")]
    ollama_url: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a document into chunks without translating
    Chunk(ChunkArgs),
    /// Translate a document
    Translate(TranslateArgs),
    /// List the models installed on the Ollama server
    Models,
    /// Write a commented default config file, then exit
    InitConfig {
        /// Directory to write doc-translator.toml into (default: current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Input document (.docx or .pdf)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Chunk size budget in characters
    #[arg(long)]
    max_chars: Option<usize>,

    /// native, pandoc or mineru (.pdf always uses mineru)
    #[arg(long, value_name = "MODE")]
    mode: Option<AdapterKind>,

    /// Shorthand for --mode pandoc
    #[arg(long, conflicts_with_all = ["mode", "mineru"])]
    pandoc: bool,

    /// Shorthand for --mode mineru
    #[arg(long, conflicts_with = "mode")]
    mineru: bool,

    /// Send chunks as Markdown instead of plain text with [TABLE] markers
    #[arg(long)]
    structured: bool,
}

impl SourceArgs {
    fn mode(&self) -> Option<AdapterKind> {
        if self.pandoc {
            Some(AdapterKind::Pandoc)
        } else if self.mineru {
            Some(AdapterKind::Mineru)
        } else {
            self.mode
        }
    }
}

#[derive(Args, Debug)]
struct ChunkArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Output directory (default: <input dir>/chunks)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Output .docx (default: <input_stem>_translated_<language>.docx)
    #[arg(short, long, value_name = "DOCX")]
    output: Option<PathBuf>,

    /// Target language
    #[arg(short, long)]
    language: Option<String>,

    /// Ollama model
    #[arg(short, long)]
    model: Option<String>,

    /// Chunks translated at the same time
    #[arg(long)]
    concurrency: Option<usize>,

    /// Abort the whole run after this many seconds
    #[arg(long, value_name = "SEC")]
    timeout: Option<u64>,

    /// Per-request timeout for Ollama in seconds
    #[arg(long, value_name = "SEC")]
    request_timeout: Option<u64>,

    /// Write per-chunk request/reply dumps here
    #[arg(long, value_name = "DIR")]
    trace_dir: Option<PathBuf>,

    /// Continue even if the model is not installed
    #[arg(long)]
    force: bool,

    /// Skip the model and write the source text back (layout check)
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(e) = ConsoleLogger::install(level_for(cli.verbose, cli.quiet)) {
        eprintln!("logger: {e}");
    }
    let progress = ConsoleProgress::new(!cli.quiet);

    match &cli.command {
        Command::InitConfig { dir, force } => {
            let dir = match dir {
                Some(d) => d.clone(),
                None => std::env::current_dir().context("current dir")?,
            };
            let cfg_path = init_default_config(&dir, *force)?;
            eprintln!("Wrote config: {}", cfg_path.display());
            Ok(())
        }
        Command::Models => cmd_models(&cli),
        Command::Chunk(args) => cmd_chunk(&cli, args, &progress),
        Command::Translate(args) => cmd_translate(&cli, args, progress),
    }
}

fn load_app_config(cli: &Cli, input: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = match &cli.config {
        Some(p) => Some(p.clone()),
        None => {
            let workdir = input
                .and_then(Path::parent)
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            find_default_config(workdir)
        }
    };
    let Some(path) = path else {
        return Ok(AppConfig::default());
    };
    info!("Config: {}", path.display());
    load_config(&path).with_context(|| format!("load config (set {CONFIG_ENV} or pass --config)"))
}

fn ollama_options(cli: &Cli, cfg: &AppConfig) -> OllamaOptions {
    let mut opts = OllamaOptions::from_section(&cfg.ollama);
    if let Some(url) = &cli.ollama_url {
        opts.base_url = url.clone();
    }
    opts
}

fn cmd_models(cli: &Cli) -> anyhow::Result<()> {
    let cfg = load_app_config(cli, None)?;
    let opts = ollama_options(cli, &cfg);
    let client = OllamaTranslator::new(&opts, DEFAULT_MODEL, false)?;
    if !client.check_connection() {
        bail!(
            "cannot reach Ollama at {} (is `ollama serve` running?)",
            client.base_url()
        );
    }
    let models = client.list_models()?;
    if models.is_empty() {
        println!("No models installed. Install one with: ollama pull {DEFAULT_MODEL}");
        return Ok(());
    }
    println!("Ollama models:");
    for m in models {
        println!("  - {m}");
    }
    Ok(())
}

fn cmd_chunk(cli: &Cli, args: &ChunkArgs, progress: &ConsoleProgress) -> anyhow::Result<()> {
    let src = &args.source;
    if !src.input.is_file() {
        bail!("file not found: {}", src.input.display());
    }
    let cfg = load_app_config(cli, Some(&src.input))?;
    let mut opts = TranslateOptions::from_config(&cfg, &src.input)?;
    apply_source_args(&mut opts, src);

    progress.info(format!(
        "Split {} ({} mode, max {} characters)",
        src.input.display(),
        opts.mode,
        opts.max_chars
    ));
    let (doc, chunks) = load_and_split(&opts.input, opts.mode, opts.max_chars, &opts.converters)?;
    let dir = args.output.clone().unwrap_or_else(|| {
        src.input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("chunks")
    });
    let files = export_chunks(&chunks, &doc.source.path, opts.max_chars, opts.prompt_style(), &dir)?;

    println!("{} blocks, {} chunks", doc.blocks.len(), chunks.len());
    for (chunk, file) in chunks.iter().zip(&files) {
        let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        println!("  chunk {}: {} characters -> {name}", chunk.index, chunk.char_count);
    }
    println!("Chunks written to {}", dir.display());
    Ok(())
}

fn apply_source_args(opts: &mut TranslateOptions, src: &SourceArgs) {
    if let Some(v) = src.max_chars {
        opts.max_chars = v;
    }
    if let Some(mode) = src.mode() {
        opts.mode = mode;
    }
    if src.structured {
        opts.use_structured_prompt = true;
    }
}

fn cmd_translate(cli: &Cli, args: &TranslateArgs, progress: ConsoleProgress) -> anyhow::Result<()> {
    let src = &args.source;
    if !src.input.is_file() {
        bail!("file not found: {}", src.input.display());
    }
    let cfg = load_app_config(cli, Some(&src.input))?;
    let mut opts = TranslateOptions::from_config(&cfg, &src.input)?;
    apply_source_args(&mut opts, src);
    if let Some(lang) = &args.language {
        opts.target_language = lang.clone();
    }
    if let Some(model) = &args.model {
        opts.model = model.clone();
    }
    if let Some(n) = args.concurrency {
        opts.concurrency = n;
    }
    if let Some(secs) = args.timeout {
        opts.timeout = Some(std::time::Duration::from_secs(secs));
    }
    if let Some(secs) = args.request_timeout {
        opts.ollama.request_timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(dir) = &args.trace_dir {
        opts.trace_dir = Some(dir.clone());
    }
    if let Some(url) = &cli.ollama_url {
        opts.ollama.base_url = url.clone();
    }
    opts.force = args.force;
    opts.output = match &args.output {
        Some(p) => p.clone(),
        None => default_output_path(&opts.input, &opts.target_language),
    };
    if let Some(docx) = docx_output_for(&opts.output) {
        warn!(
            "{} cannot be written; saving as {}",
            opts.output.display(),
            docx.display()
        );
        opts.output = docx;
    }
    opts.validate()?;

    let style = opts.prompt_style();
    progress.info(format!(
        "Document: {} -> {}",
        opts.input.display(),
        opts.output.display()
    ));
    progress.info(format!(
        "Language: {}, model: {}, prompt: {}",
        opts.target_language,
        opts.model,
        match style {
            PromptStyle::Plain => "plain",
            PromptStyle::Structured => "markdown",
        }
    ));

    let report = if args.dry_run {
        let pipeline = Pipeline::new(opts, progress.clone());
        let batch = batch_translator(&pipeline, IdentityTranslator, style, &progress)?;
        pipeline.run(&batch)?
    } else {
        let ollama = OllamaTranslator::new(&opts.ollama, opts.model.clone(), style == PromptStyle::Structured)?;
        ensure_model(&ollama, opts.force)?;
        let pipeline = Pipeline::new(opts, progress.clone());
        let batch = batch_translator(&pipeline, ollama, style, &progress)?;
        pipeline.run(&batch)?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Done: {}", report.output.display());
    }
    Ok(())
}

fn batch_translator<T: TextTranslator>(
    pipeline: &Pipeline,
    translator: T,
    style: PromptStyle,
    progress: &ConsoleProgress,
) -> anyhow::Result<BatchTranslator<T>> {
    Ok(BatchTranslator::new(translator, style)
        .with_concurrency(pipeline.options().concurrency)
        .with_cancel(pipeline.cancel_token())
        .with_trace(pipeline.trace_writer()?)
        .with_progress(progress.clone()))
}

fn ensure_model(ollama: &OllamaTranslator, force: bool) -> anyhow::Result<()> {
    if !ollama.check_connection() {
        bail!(
            "cannot reach Ollama at {} (is `ollama serve` running?)",
            ollama.base_url()
        );
    }
    let models = ollama.list_models()?;
    if models.iter().any(|m| model_matches(m, ollama.model())) {
        return Ok(());
    }
    let available = if models.is_empty() {
        "none".to_string()
    } else {
        models.join(", ")
    };
    if force {
        warn!("model {} is not installed (available: {available}); continuing", ollama.model());
        return Ok(());
    }
    Err(Error::InvalidConfiguration(format!(
        "model {} is not installed (available: {available}); use --force to continue anyway",
        ollama.model()
    ))
    .into())
}
