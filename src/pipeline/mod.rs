//! Pipeline stages for document extraction.
//!
//! Each submodule implements one step; the orchestrator in
//! [`crate::extract`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ingest ──▶ vision ──▶ (context) ──▶ entities ──▶ structure ──▶ categorize
//! (URL/path) (pdfium,   (image       │           (NER,        (schema      (label
//!            OCR)       summaries)   │            backoff)     JSON)        buckets)
//!                                    └──────────────────────────────▶ merged record
//! ```
//!
//! 1. [`input`]     : canonicalise the path or URL to a local PDF
//! 2. [`ingest`]    : text (embedded, OCR or layout Markdown) and images;
//!    pdfium work in `spawn_blocking` via [`render`]
//! 3. [`vision`]    : one description per image, never retried
//! 4. [`entities`]  : single-call or chunked NER with rate-limit backoff
//! 5. [`structure`] : schema-conformant JSON record
//! 6. [`categorize`]: entity texts bucketed by label keywords
//!
//! [`encode`], [`ocr`] and [`postprocess`] are helpers shared by the stages.

pub mod categorize;
pub mod encode;
pub mod entities;
pub mod ingest;
pub mod input;
pub mod ocr;
pub mod postprocess;
pub mod render;
pub mod structure;
pub mod vision;

use crate::error::StageError;
use crate::model::ModelError;
use crate::progress::Stage;
use crate::retry::RetryError;

/// Stage error for a model call that was not retried.
pub(crate) fn model_failure(stage: Stage, err: &ModelError) -> StageError {
    StageError::Transport {
        stage: stage.to_string(),
        detail: err.to_string(),
    }
}

/// Stage error for a call that went through the retry loop.
pub(crate) fn retry_failure(stage: Stage, err: &RetryError) -> StageError {
    match err {
        RetryError::Model(e) => model_failure(stage, e),
        RetryError::Exhausted { attempts, .. } => StageError::RateLimitExhausted {
            stage: stage.to_string(),
            attempts: *attempts,
        },
        RetryError::DeadlineExceeded { .. } => StageError::DeadlineExceeded {
            stage: stage.to_string(),
        },
    }
}

pub(crate) fn malformed(stage: Stage, detail: impl Into<String>) -> StageError {
    StageError::MalformedResponse {
        stage: stage.to_string(),
        detail: detail.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_failures_map_to_stage_errors() {
        let e = retry_failure(
            Stage::Entities,
            &RetryError::Exhausted {
                attempts: 3,
                last: "429".into(),
            },
        );
        assert_eq!(
            e,
            StageError::RateLimitExhausted {
                stage: "entities".into(),
                attempts: 3
            }
        );

        let e = retry_failure(
            Stage::Entities,
            &RetryError::Model(ModelError::Transport("reset".into())),
        );
        assert!(matches!(e, StageError::Transport { .. }));
        assert_eq!(e.stage(), "entities");
    }
}
