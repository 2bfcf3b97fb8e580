//! Configuration types for document extraction.
//!
//! All run behaviour is controlled through [`ExtractionConfig`], built via
//! its [`ExtractionConfigBuilder`]. The config is created once at process
//! start and handed to the pipeline, which passes the parts each stage needs
//! down by value. Nothing reads API keys or model names from globals after
//! that point.

use crate::error::DocStructError;
use crate::model::{ModelClient, DEFAULT_MODEL};
use crate::progress::ProgressCallback;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound accepted by [`ExtractionConfigBuilder::max_rendered_pixels`].
pub const MAX_RENDERED_PIXELS: u32 = 16_384;

/// Configuration for one or more extraction runs.
///
/// # Example
/// ```rust
/// use edgequake_docstruct::{ExtractionConfig, EntityMode};
///
/// let config = ExtractionConfig::builder()
///     .text_model("gpt-4.1-mini")
///     .entity_mode(EntityMode::Chunked)
///     .concurrency(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Model used for entity extraction and structuring.
    pub text_model: String,

    /// Model used for image descriptions and layout Markdown.
    pub vision_model: String,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `client`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed model client. Takes precedence over `provider_name`.
    pub client: Option<Arc<dyn ModelClient>>,

    /// Sampling temperature for every model call. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Characters of context sent in single-call entity extraction. Default: 8000.
    pub entity_char_budget: usize,

    /// Characters of context sent to the structurer. Default: 15000.
    ///
    /// Larger than the entity budget: the structurer has to see tables and
    /// statistics that may sit deep in the document.
    pub structure_char_budget: usize,

    /// Chunk size for chunked entity extraction. Default: 8000.
    pub chunk_chars: usize,

    /// Single truncated call or chunked extraction over the whole context.
    pub entity_mode: EntityMode,

    /// What chunked extraction does when one chunk fails for good.
    pub chunk_failure: ChunkFailurePolicy,

    /// Drop repeated `(text, label)` pairs from the entity list. Default: false.
    pub dedup_entities: bool,

    /// Concurrent model calls within one stage (images, chunks). Default: 4.
    pub concurrency: usize,

    /// Rate-limit backoff for entity extraction.
    pub retry: RetryPolicy,

    /// A document is digital when its sampled pages hold more than this
    /// many characters. Default: 50.
    pub digital_threshold_chars: usize,

    /// Leading pages sampled for the digital/scanned decision. Default: 3.
    pub detection_pages: usize,

    /// How digital documents are turned into Markdown.
    pub markdown: MarkdownStrategy,

    /// Longest edge of rasterised pages and images sent to models. Default: 2000,
    /// builder range 100..=[`MAX_RENDERED_PIXELS`].
    pub max_rendered_pixels: u32,

    /// OCR executable looked up on `PATH`. Default: "tesseract".
    pub ocr_command: String,

    /// OCR language pack. Default: "eng".
    pub ocr_language: String,

    /// Where extracted images are written. None: a per-run temp directory
    /// removed when the run ends.
    pub image_dir: Option<PathBuf>,

    /// Schema description for the structurer. None: built-in schema.
    pub schema: Option<String>,

    /// Overall run timeout propagated to retry loops. Default: none.
    pub run_timeout_secs: Option<u64>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional progress callback for run and stage events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            text_model: DEFAULT_MODEL.to_string(),
            vision_model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            client: None,
            temperature: 0.1,
            max_tokens: 4096,
            entity_char_budget: 8000,
            structure_char_budget: 15000,
            chunk_chars: 8000,
            entity_mode: EntityMode::default(),
            chunk_failure: ChunkFailurePolicy::default(),
            dedup_entities: false,
            concurrency: 4,
            retry: RetryPolicy::default(),
            digital_threshold_chars: 50,
            detection_pages: 3,
            markdown: MarkdownStrategy::default(),
            max_rendered_pixels: 2000,
            ocr_command: "tesseract".to_string(),
            ocr_language: "eng".to_string(),
            image_dir: None,
            schema: None,
            run_timeout_secs: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("text_model", &self.text_model)
            .field("vision_model", &self.vision_model)
            .field("provider_name", &self.provider_name)
            .field("client", &self.client.as_ref().map(|_| "<dyn ModelClient>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("entity_char_budget", &self.entity_char_budget)
            .field("structure_char_budget", &self.structure_char_budget)
            .field("chunk_chars", &self.chunk_chars)
            .field("entity_mode", &self.entity_mode)
            .field("chunk_failure", &self.chunk_failure)
            .field("dedup_entities", &self.dedup_entities)
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("markdown", &self.markdown)
            .field("ocr_command", &self.ocr_command)
            .field("image_dir", &self.image_dir)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The schema description handed to the structurer.
    pub fn schema_description(&self) -> &str {
        self.schema
            .as_deref()
            .unwrap_or(crate::prompts::DEFAULT_SCHEMA)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.config.text_model = model.into();
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn entity_char_budget(mut self, n: usize) -> Self {
        self.config.entity_char_budget = n;
        self
    }

    pub fn structure_char_budget(mut self, n: usize) -> Self {
        self.config.structure_char_budget = n;
        self
    }

    pub fn chunk_chars(mut self, n: usize) -> Self {
        self.config.chunk_chars = n;
        self
    }

    pub fn entity_mode(mut self, mode: EntityMode) -> Self {
        self.config.entity_mode = mode;
        self
    }

    pub fn chunk_failure(mut self, policy: ChunkFailurePolicy) -> Self {
        self.config.chunk_failure = policy;
        self
    }

    pub fn dedup_entities(mut self, v: bool) -> Self {
        self.config.dedup_entities = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn digital_threshold_chars(mut self, n: usize) -> Self {
        self.config.digital_threshold_chars = n;
        self
    }

    pub fn detection_pages(mut self, n: usize) -> Self {
        self.config.detection_pages = n.max(1);
        self
    }

    pub fn markdown(mut self, strategy: MarkdownStrategy) -> Self {
        self.config.markdown = strategy;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.clamp(100, MAX_RENDERED_PIXELS);
        self
    }

    pub fn ocr_command(mut self, cmd: impl Into<String>) -> Self {
        self.config.ocr_command = cmd.into();
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_dir = Some(dir.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.schema = Some(schema.into());
        self
    }

    pub fn run_timeout_secs(mut self, secs: u64) -> Self {
        self.config.run_timeout_secs = Some(secs);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, DocStructError> {
        let c = &self.config;
        if c.text_model.trim().is_empty() || c.vision_model.trim().is_empty() {
            return Err(DocStructError::InvalidConfig(
                "Model identifiers must not be empty".into(),
            ));
        }
        if c.entity_char_budget == 0 || c.structure_char_budget == 0 {
            return Err(DocStructError::InvalidConfig(
                "Character budgets must be ≥ 1".into(),
            ));
        }
        if c.chunk_chars == 0 {
            return Err(DocStructError::InvalidConfig(
                "Chunk size must be ≥ 1 character".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(DocStructError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.ocr_command.trim().is_empty() {
            return Err(DocStructError::InvalidConfig(
                "OCR command must not be empty".into(),
            ));
        }
        if let Some(ref schema) = c.schema {
            if schema.trim().is_empty() {
                return Err(DocStructError::InvalidConfig(
                    "Schema description must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How entity extraction covers the assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityMode {
    /// One call over the first `entity_char_budget` characters. (default)
    #[default]
    Single,
    /// Split the whole context into `chunk_chars` pieces, one call each,
    /// results concatenated in chunk order.
    Chunked,
}

/// What chunked extraction does when a chunk fails for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFailurePolicy {
    /// Log, record a stage error, and continue with no entities for that
    /// chunk. (default; what long-running services want)
    #[default]
    Skip,
    /// Fail the whole extraction. What a one-shot CLI batch wants.
    Abort,
}

/// How digital documents become Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkdownStrategy {
    /// Embedded page text, cleaned up. No model calls. (default)
    #[default]
    Text,
    /// Rasterise each page and ask the vision model for layout-preserving
    /// Markdown (tables, headings). Pages whose call fails fall back to
    /// their embedded text.
    Vision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ExtractionConfig::default();
        assert_eq!(c.entity_char_budget, 8000);
        assert_eq!(c.structure_char_budget, 15000);
        assert_eq!(c.digital_threshold_chars, 50);
        assert_eq!(c.detection_pages, 3);
        assert_eq!(c.entity_mode, EntityMode::Single);
        assert_eq!(c.chunk_failure, ChunkFailurePolicy::Skip);
        assert_eq!(c.retry.fallback_wait, Duration::from_secs(5));
        assert!(!c.dedup_entities);
    }

    #[test]
    fn builder_clamps_and_sets() {
        let c = ExtractionConfig::builder()
            .temperature(5.0)
            .concurrency(0)
            .chunk_chars(1000)
            .markdown(MarkdownStrategy::Vision)
            .run_timeout_secs(30)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.chunk_chars, 1000);
        assert_eq!(c.markdown, MarkdownStrategy::Vision);
        assert_eq!(c.run_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn builder_bounds_rendered_pixels() {
        let c = ExtractionConfig::builder().max_rendered_pixels(u32::MAX).build().unwrap();
        assert_eq!(c.max_rendered_pixels, MAX_RENDERED_PIXELS);
        let c = ExtractionConfig::builder().max_rendered_pixels(10).build().unwrap();
        assert_eq!(c.max_rendered_pixels, 100);
    }

    #[test]
    fn builder_rejects_zero_chunk() {
        let err = ExtractionConfig::builder().chunk_chars(0).build().unwrap_err();
        assert!(matches!(err, DocStructError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_blank_schema() {
        let err = ExtractionConfig::builder().schema("  ").build().unwrap_err();
        assert!(err.to_string().contains("Schema"));
    }

    #[test]
    fn schema_falls_back_to_builtin() {
        let c = ExtractionConfig::default();
        assert!(c.schema_description().contains("key_statistics"));
        let c = ExtractionConfig::builder()
            .schema("{\"title\": \"...\"}")
            .build()
            .unwrap();
        assert_eq!(c.schema_description(), "{\"title\": \"...\"}");
    }
}
