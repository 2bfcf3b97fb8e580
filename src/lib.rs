//! # edgequake-docstruct
//!
//! Turn PDF documents into schema-conformant JSON records.
//!
//! ## Why this crate?
//!
//! Reports, circulars and statistical bulletins carry their facts in prose,
//! tables and figures. This crate reads the text (embedded, OCR or
//! layout-aware Markdown), describes embedded images with a vision model,
//! extracts named entities, and asks a model to fill a JSON schema. The
//! result is one merged record per document that downstream code can query
//! without touching the PDF again.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Ingest     digital → embedded text, scanned → OCR; embedded images
//!  ├─ 3. Vision     one description per image
//!  ├─ 4. Context    text + "Image (<id>): <description>" lines
//!  ├─ 5. Entities   NER with rate-limit backoff (single call or chunked)
//!  ├─ 6. Structure  schema-conformant JSON record
//!  └─ 7. Merge      named_entities + entities_by_type attached to the record
//! ```
//!
//! Stage failures degrade the result instead of aborting it; see
//! [`RunReport::stage_errors`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docstruct::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let output = extract("aishe_report.pdf", &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.record)?);
//!     for err in &output.report.stage_errors {
//!         eprintln!("degraded: {err}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docstruct` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docstruct = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! * pdfium is loaded at runtime (`PDFIUM_LIB_PATH`, the working directory,
//!   then the system library). Without it, runs produce an empty record and a
//!   `toolchain_missing` stage error.
//! * Scanned documents are OCR'd with `tesseract` from `PATH`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod retry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ChunkFailurePolicy, EntityMode, ExtractionConfig, ExtractionConfigBuilder, MarkdownStrategy,
};
pub use error::{DocStructError, StageError};
pub use extract::{
    assemble_context, default_output_path, extract, extract_entities, extract_from_bytes,
    extract_sync, extract_to_file, inspect, ExtractionOutput, Pipeline, RunReport, StageTimings,
};
pub use model::{
    EdgequakeClient, ImagePayload, ModelClient, ModelError, ModelRequest, ModelResponse,
};
pub use pipeline::ingest::{DocumentInfo, DocumentIngestor, IngestedDocument, PdfIngestor};
pub use pipeline::render::DocumentMetadata;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use record::{
    BudgetFinancials, BudgetLine, Document, DocumentKind, Entity, EntityBuckets, EntityLabel,
    ExtractedImage, PolicyEntry, StatisticEntry, StructuredRecord, TableData, TableEntry,
    TextChunk,
};
pub use retry::{Deadline, RetryPolicy};
