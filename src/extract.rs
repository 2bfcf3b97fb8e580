//! Extraction entry points and the pipeline orchestrator.
//!
//! A run goes ingest → image descriptions → context assembly → entities →
//! structuring → categorisation, strictly in that order. Each stage writes
//! into its own part of the result; a stage that fails leaves its part empty
//! and records a [`StageError`] in the [`RunReport`]. Only unsupported
//! input, provider configuration, and an aborted chunked extraction stop a
//! run.

use crate::config::{ChunkFailurePolicy, EntityMode, ExtractionConfig};
use crate::error::{DocStructError, StageError};
use crate::model::{resolve_client, ModelClient};
use crate::pipeline::categorize::categorize;
use crate::pipeline::entities::EntityExtractor;
use crate::pipeline::ingest::{inspect_pdf, DocumentIngestor, DocumentInfo, PdfIngestor};
use crate::pipeline::input;
use crate::pipeline::structure::structure;
use crate::pipeline::vision::{describe_images, ImageSummary};
use crate::progress::{ExtractionProgressCallback, NoopProgressCallback, Stage};
use crate::record::{DocumentKind, Entity, StructuredRecord};
use crate::retry::Deadline;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

static NOOP_PROGRESS: NoopProgressCallback = NoopProgressCallback;

/// Wall-clock time spent per stage, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    pub ingest_ms: u64,
    pub vision_ms: u64,
    pub entities_ms: u64,
    pub structure_ms: u64,
    pub total_ms: u64,
}

/// What happened during a run, beside the record itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub source: String,
    pub kind: DocumentKind,
    pub page_count: usize,
    pub image_count: usize,
    /// Images that received a non-empty description.
    pub described_images: usize,
    /// Characters in the assembled context.
    pub context_chars: usize,
    pub entity_count: usize,
    /// Every degraded stage, in the order it happened.
    pub stage_errors: Vec<StageError>,
    pub timings: StageTimings,
}

impl RunReport {
    /// `true` when no stage degraded.
    pub fn is_clean(&self) -> bool {
        self.stage_errors.is_empty()
    }
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    /// The merged record. Always a mapping, possibly empty.
    pub record: StructuredRecord,
    /// Entities in extraction order (also attached to the record when
    /// non-empty).
    pub entities: Vec<Entity>,
    pub report: RunReport,
}

/// Assemble the text handed to the entity extractor and the structurer:
/// the document text followed by one `Image (<id>): <description>` line per
/// non-empty image description.
pub fn assemble_context(markdown: &str, summaries: &[ImageSummary]) -> String {
    let lines: Vec<String> = summaries
        .iter()
        .filter(|s| !s.description.trim().is_empty())
        .map(|s| format!("Image ({}): {}", s.identifier, s.description.trim()))
        .collect();
    let text = markdown.trim_end();

    match (text.trim().is_empty(), lines.is_empty()) {
        (_, true) => text.to_string(),
        (true, false) => lines.join("\n"),
        (false, false) => format!("{}\n\n{}", text, lines.join("\n")),
    }
}

/// The orchestrator: a configuration bound to a model client and an ingestor.
///
/// A `Pipeline` holds no per-run state, so one instance can serve many
/// concurrent runs.
pub struct Pipeline {
    config: ExtractionConfig,
    client: Arc<dyn ModelClient>,
    ingestor: Arc<dyn DocumentIngestor>,
}

impl Pipeline {
    /// Resolve the model client and build the pdfium ingestor.
    ///
    /// Fails only when no model provider can be configured.
    pub fn new(config: ExtractionConfig) -> Result<Self, DocStructError> {
        let client = resolve_client(&config)?;
        let ingestor = PdfIngestor::new(&config).with_layout_client(Arc::clone(&client));
        Ok(Self {
            config,
            client,
            ingestor: Arc::new(ingestor),
        })
    }

    /// Assemble a pipeline from explicit parts.
    pub fn with_parts(
        config: ExtractionConfig,
        client: Arc<dyn ModelClient>,
        ingestor: Arc<dyn DocumentIngestor>,
    ) -> Self {
        Self {
            config,
            client,
            ingestor,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn progress(&self) -> &dyn ExtractionProgressCallback {
        match &self.config.progress_callback {
            Some(cb) => cb.as_ref(),
            None => &NOOP_PROGRESS,
        }
    }

    fn record_errors(&self, report: &mut RunReport, stage: Stage, errors: impl IntoIterator<Item = StageError>) {
        for err in errors {
            self.progress().on_stage_error(stage, &err.to_string());
            report.stage_errors.push(err);
        }
    }

    /// Resolve `input` (path or URL) and run the full pipeline on it.
    pub async fn run_input(&self, input_str: &str) -> Result<ExtractionOutput, DocStructError> {
        let resolved = input::resolve_input(input_str, self.config.download_timeout_secs).await?;
        let mut output = self.run(resolved.path()).await?;
        output.report.source = input_str.to_string();
        Ok(output)
    }

    /// Run the full pipeline on a local PDF.
    pub async fn run(&self, path: &Path) -> Result<ExtractionOutput, DocStructError> {
        let total_start = Instant::now();
        let progress = self.progress();
        let deadline = Deadline::from_timeout(self.config.run_timeout());
        let source = path.display().to_string();
        info!("Starting extraction: {}", source);
        progress.on_run_start(&source);

        // ── Step 1: Ingest ───────────────────────────────────────────────
        let stage_start = Instant::now();
        progress.on_stage_start(Stage::Ingest, 1);
        let ingested = self.ingestor.ingest(path).await?;
        progress.on_stage_complete(Stage::Ingest, ingested.images.len());

        let mut report = RunReport {
            source,
            kind: ingested.document.kind,
            page_count: ingested.document.page_count,
            image_count: ingested.images.len(),
            described_images: 0,
            context_chars: 0,
            entity_count: 0,
            stage_errors: Vec::new(),
            timings: StageTimings {
                ingest_ms: stage_start.elapsed().as_millis() as u64,
                ..Default::default()
            },
        };
        self.record_errors(&mut report, Stage::Ingest, ingested.warnings.iter().cloned());
        info!(
            "Document is {} with {} pages and {} images",
            report.kind, report.page_count, report.image_count
        );

        // ── Step 2: Describe images ──────────────────────────────────────
        let mut summaries = Vec::new();
        if !ingested.images.is_empty() {
            let stage_start = Instant::now();
            progress.on_stage_start(Stage::Vision, ingested.images.len());
            let (described, errors) = describe_images(
                self.client.as_ref(),
                &self.config.vision_model,
                &ingested.images,
                self.config.concurrency,
                progress,
            )
            .await;
            report.described_images = described
                .iter()
                .filter(|s| !s.description.is_empty())
                .count();
            report.stage_errors.extend(errors);
            progress.on_stage_complete(Stage::Vision, report.described_images);
            report.timings.vision_ms = stage_start.elapsed().as_millis() as u64;
            summaries = described;
        }

        // ── Step 3: Assemble context ─────────────────────────────────────
        let context = assemble_context(&ingested.markdown, &summaries);
        report.context_chars = context.chars().count();
        debug!("Context assembled: {} chars", report.context_chars);
        drop(ingested);

        if context.trim().is_empty() {
            warn!("No text or image content found; skipping model stages");
            report.timings.total_ms = total_start.elapsed().as_millis() as u64;
            progress.on_run_complete(report.stage_errors.len());
            return Ok(ExtractionOutput {
                record: StructuredRecord::new(),
                entities: Vec::new(),
                report,
            });
        }

        // ── Step 4: Extract entities ─────────────────────────────────────
        let stage_start = Instant::now();
        progress.on_stage_start(Stage::Entities, 1);
        let outcome = EntityExtractor::new(Arc::clone(&self.client), &self.config)
            .extract(self.config.entity_mode, &context, deadline, progress)
            .await?;
        let entities = outcome.entities;
        report.stage_errors.extend(outcome.errors);
        report.entity_count = entities.len();
        progress.on_stage_complete(Stage::Entities, entities.len());
        report.timings.entities_ms = stage_start.elapsed().as_millis() as u64;
        info!("Found {} entities", entities.len());

        // ── Step 5: Structure ────────────────────────────────────────────
        let stage_start = Instant::now();
        progress.on_stage_start(Stage::Structure, 1);
        let (mut record, error) = structure(
            self.client.as_ref(),
            &self.config.text_model,
            &context,
            self.config.schema_description(),
            self.config.structure_char_budget,
        )
        .await;
        self.record_errors(&mut report, Stage::Structure, error);
        progress.on_stage_complete(Stage::Structure, record.len());
        report.timings.structure_ms = stage_start.elapsed().as_millis() as u64;

        // ── Step 6: Categorise and merge ─────────────────────────────────
        progress.on_stage_start(Stage::Categorize, entities.len());
        let buckets = categorize(&entities);
        record.attach_entities(&entities, &buckets);
        progress.on_stage_complete(Stage::Categorize, buckets.len());

        report.timings.total_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Extraction complete: {} record keys, {} stage errors, {}ms",
            record.len(),
            report.stage_errors.len(),
            report.timings.total_ms
        );
        progress.on_run_complete(report.stage_errors.len());

        Ok(ExtractionOutput {
            record,
            entities,
            report,
        })
    }

    /// Entity-only batch run: ingest, then chunked extraction over the whole
    /// document text. A chunk that fails for good aborts the run.
    pub async fn run_entities(&self, path: &Path) -> Result<Vec<Entity>, DocStructError> {
        let progress = self.progress();
        let deadline = Deadline::from_timeout(self.config.run_timeout());

        progress.on_stage_start(Stage::Ingest, 1);
        let ingested = self.ingestor.ingest(path).await?;
        for warning in &ingested.warnings {
            warn!("{}", warning);
        }
        progress.on_stage_complete(Stage::Ingest, ingested.images.len());

        progress.on_stage_start(Stage::Entities, 1);
        let outcome = EntityExtractor::new(Arc::clone(&self.client), &self.config)
            .with_chunk_failure(ChunkFailurePolicy::Abort)
            .extract(
                EntityMode::Chunked,
                &ingested.markdown,
                deadline,
                progress,
            )
            .await?;
        progress.on_stage_complete(Stage::Entities, outcome.entities.len());
        Ok(outcome.entities)
    }
}

// ── Convenience entry points ─────────────────────────────────────────────

/// Extract a structured record from a PDF file or URL.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err` only for fatal conditions: missing or unsupported input,
/// a failed download, no configurable model provider, or an aborted
/// chunked entity extraction. Stage failures are reported in
/// [`RunReport::stage_errors`].
///
/// # Example
/// ```rust,no_run
/// use edgequake_docstruct::{extract, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::default();
/// let output = extract("report.pdf", &config).await?;
/// println!("{}", serde_json::to_string_pretty(&output.record)?);
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, DocStructError> {
    Pipeline::new(config.clone())?
        .run_input(input_str.as_ref())
        .await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, DocStructError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocStructError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Extract from PDF bytes held in memory.
///
/// `name` is the original file name; it must end in `.pdf`.
pub async fn extract_from_bytes(
    bytes: &[u8],
    name: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, DocStructError> {
    let pipeline = Pipeline::new(config.clone())?;
    let resolved = input::resolve_bytes(bytes, name).await?;
    let mut output = pipeline.run(resolved.path()).await?;
    output.report.source = name.to_string();
    Ok(output)
}

/// Entity-only extraction over a PDF file or URL.
pub async fn extract_entities(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<Vec<Entity>, DocStructError> {
    let pipeline = Pipeline::new(config.clone())?;
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    pipeline.run_entities(resolved.path()).await
}

/// Extract and write the record as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<RunReport, DocStructError> {
    let output = extract(input_str, config).await?;
    write_json_atomic(output_path.as_ref(), &output.record).await?;
    Ok(output.report)
}

/// Serialise `value` as pretty JSON and write it atomically.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), DocStructError> {
    let write_failed = |source: std::io::Error| DocStructError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| DocStructError::Internal(format!("Failed to serialise output: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_failed)?;
    Ok(())
}

/// `<stem>_output.json` next to a local input, or in the working directory
/// for URLs.
pub fn default_output_path(input_str: &str) -> PathBuf {
    let (dir, name) = if input::is_url(input_str) {
        let name = input_str
            .rsplit('/')
            .next()
            .and_then(|s| s.split(['?', '#']).next())
            .unwrap_or_default()
            .to_string();
        (PathBuf::new(), name)
    } else {
        let path = Path::new(input_str);
        (
            path.parent().map(Path::to_path_buf).unwrap_or_default(),
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    };

    let stem = Path::new(&name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string());
    dir.join(format!("{stem}_output.json"))
}

/// Open a PDF and report its page count, kind, image count and metadata.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<DocumentInfo, DocStructError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    inspect_pdf(
        resolved.path(),
        config.detection_pages,
        config.digital_threshold_chars,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, text: &str) -> ImageSummary {
        ImageSummary {
            identifier: id.to_string(),
            description: text.to_string(),
        }
    }

    #[test]
    fn context_appends_non_empty_descriptions() {
        let ctx = assemble_context(
            "# Report\n\nBody\n",
            &[
                summary("page_1_img_0.png", "A bar chart of enrolment"),
                summary("page_1_img_1.png", "  "),
                summary("page_2_img_0.png", "Logo"),
            ],
        );
        assert_eq!(
            ctx,
            "# Report\n\nBody\n\nImage (page_1_img_0.png): A bar chart of enrolment\nImage (page_2_img_0.png): Logo"
        );
    }

    #[test]
    fn context_without_images_is_the_text() {
        assert_eq!(assemble_context("Body\n", &[]), "Body");
        assert_eq!(assemble_context("", &[summary("a.png", "")]), "");
    }

    #[test]
    fn context_from_images_only() {
        let ctx = assemble_context("  \n", &[summary("page_1_img_0.png", "Scanned table")]);
        assert_eq!(ctx, "Image (page_1_img_0.png): Scanned table");
    }

    #[test]
    fn default_output_paths() {
        assert_eq!(
            default_output_path("/data/aishe_2022.pdf"),
            PathBuf::from("/data/aishe_2022_output.json")
        );
        assert_eq!(
            default_output_path("report.pdf"),
            PathBuf::from("report_output.json")
        );
        assert_eq!(
            default_output_path("https://x.org/files/udise.pdf?dl=1"),
            PathBuf::from("udise_output.json")
        );
        assert_eq!(
            default_output_path("https://x.org/"),
            PathBuf::from("document_output.json")
        );
    }

    #[tokio::test]
    async fn atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        let record = StructuredRecord::from_value(serde_json::json!({"summary": "s"}));
        write_json_atomic(&path, &record).await.unwrap();

        let back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["summary"], "s");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
