//! Error types for the edgequake-docstruct library.
//!
//! Two error types reflect the two ways a run can go wrong:
//!
//! * [`DocStructError`]: **Fatal**, the run cannot proceed at all (file
//!   missing, not a PDF, provider not configured). Returned as
//!   `Err(DocStructError)` from the top-level `extract*` functions.
//!
//! * [`StageError`]: **Non-fatal**, one stage degraded (OCR binary missing,
//!   a model call failed, the model answered with junk). Collected in
//!   [`crate::extract::RunReport::stage_errors`]; the run still returns a
//!   well-formed [`crate::record::StructuredRecord`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docstruct library.
///
/// Stage-level degradation uses [`StageError`] and never surfaces here.
#[derive(Debug, Error)]
pub enum DocStructError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// File type, extension or content is not something the pipeline handles.
    #[error("Unsupported input '{input}': {reason}")]
    UnsupportedInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// pdfium could not be loaded. Only [`crate::extract::inspect`] treats
    /// this as fatal; extraction runs degrade to a stage error instead.
    #[error("PDF engine unavailable: {detail}")]
    PdfEngineUnavailable { detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Chunked entity extraction hit a non-recoverable chunk failure and the
    /// chunk policy is [`crate::config::ChunkFailurePolicy::Abort`].
    #[error("Entity extraction aborted at chunk {chunk}/{total}: {detail}")]
    EntityExtractionAborted {
        chunk: usize,
        total: usize,
        detail: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of one pipeline stage.
///
/// Stored in the run report so callers can tell a genuinely empty document
/// from one whose model calls failed.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    /// An external binary or shared library (tesseract, pdfium) is missing.
    #[error("{stage}: toolchain missing: {detail}")]
    ToolchainMissing { stage: String, detail: String },

    /// The model service could not be reached or returned an error status.
    #[error("{stage}: transport error: {detail}")]
    Transport { stage: String, detail: String },

    /// Rate-limit retries were exhausted.
    #[error("{stage}: still rate limited after {attempts} attempts")]
    RateLimitExhausted { stage: String, attempts: u32 },

    /// The caller's run deadline expired while waiting out a rate limit.
    #[error("{stage}: run deadline exceeded")]
    DeadlineExceeded { stage: String },

    /// The model answered, but not with the expected JSON shape.
    #[error("{stage}: malformed response: {detail}")]
    MalformedResponse { stage: String, detail: String },

    /// Reading text or images out of the document failed.
    #[error("{stage}: {detail}")]
    Ingest { stage: String, detail: String },
}

impl StageError {
    /// Name of the stage that degraded.
    pub fn stage(&self) -> &str {
        match self {
            StageError::ToolchainMissing { stage, .. }
            | StageError::Transport { stage, .. }
            | StageError::RateLimitExhausted { stage, .. }
            | StageError::DeadlineExceeded { stage }
            | StageError::MalformedResponse { stage, .. }
            | StageError::Ingest { stage, .. } => stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_input_display() {
        let e = DocStructError::UnsupportedInput {
            input: "notes.docx".into(),
            reason: "expected a .pdf file".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("notes.docx"), "got: {msg}");
        assert!(msg.contains(".pdf"), "got: {msg}");
    }

    #[test]
    fn aborted_extraction_display() {
        let e = DocStructError::EntityExtractionAborted {
            chunk: 2,
            total: 5,
            detail: "status 500".into(),
        };
        assert!(e.to_string().contains("2/5"));
    }

    #[test]
    fn stage_error_reports_stage() {
        let e = StageError::RateLimitExhausted {
            stage: "entities".into(),
            attempts: 10,
        };
        assert_eq!(e.stage(), "entities");
        assert!(e.to_string().contains("10 attempts"));
    }

    #[test]
    fn stage_error_serialises_with_tag() {
        let e = StageError::ToolchainMissing {
            stage: "ocr".into(),
            detail: "tesseract not found".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "toolchain_missing");
        assert_eq!(json["stage"], "ocr");
    }
}
