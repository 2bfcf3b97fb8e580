//! CLI binary for edgequake-docstruct.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docstruct::extract::write_json_atomic;
use edgequake_docstruct::{
    default_output_path, extract, extract_entities, inspect, ChunkFailurePolicy, EntityMode,
    ExtractionConfig, ExtractionProgressCallback, MarkdownStrategy, ProgressCallback,
    RetryPolicy, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one spinner whose prefix follows the current
/// stage, with a log line per finished or degraded stage.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Finished items in the current stage.
    done_items: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            done_items: AtomicUsize::new(0),
        })
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Ingest => "Reading",
        Stage::Vision => "Describing images",
        Stage::Entities => "Extracting entities",
        Stage::Structure => "Structuring",
        Stage::Categorize => "Categorising",
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, source: &str) {
        self.bar.println(format!("{} {}", cyan("◆"), bold(source)));
    }

    fn on_stage_start(&self, stage: Stage, items: usize) {
        self.done_items.store(0, Ordering::SeqCst);
        self.bar.set_prefix(stage_label(stage));
        if items > 1 {
            self.bar.set_message(format!("0/{items}"));
        } else {
            self.bar.set_message("");
        }
    }

    fn on_item_complete(&self, _stage: Stage, _index: usize, items: usize) {
        let done = self.done_items.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar.set_message(format!("{done}/{items}"));
    }

    fn on_stage_error(&self, stage: Stage, error: &str) {
        let msg: String = if error.chars().count() > 100 {
            let head: String = error.chars().take(99).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} {:<10} {}", red("✗"), stage.as_str(), red(&msg)));
    }

    fn on_stage_complete(&self, stage: Stage, produced: usize) {
        self.bar.println(format!(
            "  {} {:<10} {}",
            green("✓"),
            stage.as_str(),
            dim(&format!("{produced} produced")),
        ));
    }

    fn on_run_complete(&self, stage_errors: usize) {
        self.bar.finish_and_clear();
        if stage_errors == 0 {
            eprintln!("{} extraction complete", green("✔"));
        } else {
            eprintln!(
                "{} extraction complete with {} degraded stage(s)",
                cyan("⚠"),
                red(&stage_errors.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Structured record to stdout
  docstruct report.pdf

  # Write next to the input as report_output.json
  docstruct --save report.pdf

  # Write to a specific file
  docstruct report.pdf -o record.json

  # Long documents: chunked entity extraction, de-duplicated
  docstruct --entity-mode chunked --dedup annual_report.pdf

  # Entity list only (chunked, stops on the first failed chunk)
  docstruct --entities-only circular.pdf > entities.json

  # Layout-aware Markdown through the vision model
  docstruct --markdown vision scanned_tables.pdf

  # Custom schema
  docstruct --schema schema.json budget.pdf

  # Inspect the PDF (no API key needed)
  docstruct --inspect report.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Log filter; overrides -v / -q

EXTERNAL TOOLS:
  pdfium      Loaded at runtime. Without it the record is empty and the
              report carries a toolchain_missing error.
  tesseract   Needed for scanned documents (override with --ocr-command).
"#;

/// Turn PDF files and URLs into structured JSON records using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "docstruct",
    version,
    about = "Turn PDF files and URLs into structured JSON records using LLMs",
    long_about = "Extract text (embedded or OCR), describe embedded images, find named \
entities and fill a JSON schema for a PDF document. Supports OpenAI, Anthropic, Google \
Gemini, Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the record to this file instead of stdout.
    #[arg(short, long, env = "DOCSTRUCT_OUTPUT", conflicts_with = "save")]
    output: Option<PathBuf>,

    /// Write the record to `<input stem>_output.json` next to the input.
    #[arg(long, env = "DOCSTRUCT_SAVE")]
    save: bool,

    /// Print only the entity list (chunked extraction, aborts on failure).
    #[arg(long, env = "DOCSTRUCT_ENTITIES_ONLY")]
    entities_only: bool,

    /// Print PDF facts only; no model calls.
    #[arg(long)]
    inspect: bool,

    /// Print the run report (stage errors, timings) to stderr.
    #[arg(long, env = "DOCSTRUCT_REPORT")]
    report: bool,

    /// Text model ID (entities and structuring).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision model ID (image descriptions and layout Markdown).
    #[arg(long, env = "DOCSTRUCT_VISION_MODEL")]
    vision_model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// File holding the schema description for the structurer.
    #[arg(long, env = "DOCSTRUCT_SCHEMA")]
    schema: Option<PathBuf>,

    /// Entity extraction mode.
    #[arg(long, env = "DOCSTRUCT_ENTITY_MODE", value_enum, default_value = "single")]
    entity_mode: EntityModeArg,

    /// Abort the run when a chunk fails for good (chunked mode).
    #[arg(long, env = "DOCSTRUCT_ABORT_ON_CHUNK_FAILURE")]
    abort_on_chunk_failure: bool,

    /// Characters per chunk in chunked mode.
    #[arg(long, env = "DOCSTRUCT_CHUNK_CHARS", default_value_t = 8000)]
    chunk_chars: usize,

    /// Drop repeated (text, label) entity pairs.
    #[arg(long, env = "DOCSTRUCT_DEDUP")]
    dedup: bool,

    /// How digital documents become Markdown.
    #[arg(long, env = "DOCSTRUCT_MARKDOWN", value_enum, default_value = "text")]
    markdown: MarkdownArg,

    /// Concurrent model calls within one stage.
    #[arg(short, long, env = "DOCSTRUCT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Rate-limit attempts per call (0 = retry until the deadline).
    #[arg(long, env = "DOCSTRUCT_MAX_RETRIES", default_value_t = 10)]
    max_retries: u32,

    /// Overall run timeout in seconds.
    #[arg(long, env = "DOCSTRUCT_TIMEOUT")]
    timeout: Option<u64>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "DOCSTRUCT_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOCSTRUCT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// OCR executable.
    #[arg(long, env = "DOCSTRUCT_OCR_COMMAND", default_value = "tesseract")]
    ocr_command: String,

    /// OCR language pack.
    #[arg(long, env = "DOCSTRUCT_OCR_LANGUAGE", default_value = "eng")]
    ocr_language: String,

    /// Keep extracted images in this directory.
    #[arg(long, env = "DOCSTRUCT_IMAGE_DIR")]
    image_dir: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCSTRUCT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCSTRUCT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSTRUCT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCSTRUCT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EntityModeArg {
    Single,
    Chunked,
}

impl From<EntityModeArg> for EntityMode {
    fn from(v: EntityModeArg) -> Self {
        match v {
            EntityModeArg::Single => EntityMode::Single,
            EntityModeArg::Chunked => EntityMode::Chunked,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MarkdownArg {
    Text,
    Vision,
}

impl From<MarkdownArg> for MarkdownStrategy {
    fn from(v: MarkdownArg) -> Self {
        match v {
            MarkdownArg::Text => MarkdownStrategy::Text,
            MarkdownArg::Vision => MarkdownStrategy::Vision,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; -v brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Inspect mode ─────────────────────────────────────────────────────
    if cli.inspect {
        let info = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect PDF")?;
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialise document info")?
        );
        return Ok(());
    }

    // ── Entity-only mode ─────────────────────────────────────────────────
    if cli.entities_only {
        let entities = extract_entities(&cli.input, &config)
            .await
            .context("Entity extraction failed")?;
        match output_path(&cli) {
            Some(path) => write_json_atomic(&path, &entities)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?,
            None => println!(
                "{}",
                serde_json::to_string_pretty(&entities).context("Failed to serialise entities")?
            ),
        }
        if !cli.quiet {
            eprintln!("{} {} entities", green("✔"), bold(&entities.len().to_string()));
        }
        return Ok(());
    }

    // ── Full extraction ──────────────────────────────────────────────────
    let output = extract(&cli.input, &config)
        .await
        .context("Extraction failed")?;

    match output_path(&cli) {
        Some(path) => {
            write_json_atomic(&path, &output.record)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} keys  {}ms  →  {}",
                    if output.report.is_clean() {
                        green("✔")
                    } else {
                        cyan("⚠")
                    },
                    output.record.len(),
                    output.report.timings.total_ms,
                    bold(&path.display().to_string()),
                );
            }
        }
        None => {
            let json = serde_json::to_string_pretty(&output.record)
                .context("Failed to serialise record")?;
            println!("{json}");
        }
    }

    if cli.report {
        let json = serde_json::to_string_pretty(&output.report)
            .context("Failed to serialise run report")?;
        eprintln!("{json}");
    } else if !cli.quiet && !show_progress {
        for err in &output.report.stage_errors {
            eprintln!("  {} {}", red("✗"), err);
        }
    }

    Ok(())
}

fn output_path(cli: &Cli) -> Option<PathBuf> {
    if cli.save {
        Some(default_output_path(&cli.input))
    } else {
        cli.output.clone()
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .entity_mode(cli.entity_mode.into())
        .chunk_chars(cli.chunk_chars)
        .dedup_entities(cli.dedup)
        .markdown(cli.markdown.into())
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .ocr_command(cli.ocr_command.clone())
        .ocr_language(cli.ocr_language.clone())
        .download_timeout_secs(cli.download_timeout);

    if cli.abort_on_chunk_failure {
        builder = builder.chunk_failure(ChunkFailurePolicy::Abort);
    }
    let retry = match cli.max_retries {
        0 => RetryPolicy::unbounded(),
        n => RetryPolicy::default().with_max_attempts(Some(n)),
    };
    builder = builder.retry(retry);

    if let Some(ref model) = cli.model {
        builder = builder.text_model(model.clone());
        if cli.vision_model.is_none() {
            builder = builder.vision_model(model.clone());
        }
    }
    if let Some(ref model) = cli.vision_model {
        builder = builder.vision_model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = cli.schema {
        let schema = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read schema from {:?}", path))?;
        builder = builder.schema(schema);
    }
    if let Some(ref dir) = cli.image_dir {
        builder = builder.image_dir(dir.clone());
    }
    if let Some(secs) = cli.timeout {
        builder = builder.run_timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
