//! Progress-callback trait for run and stage events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docstruct::{ExtractionProgressCallback, ExtractionConfig, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: Stage, items: usize) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done ({items} items)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { finished: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// Pipeline stage named in progress events and stage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Text, OCR and image extraction from the PDF.
    Ingest,
    /// One description per extracted image.
    Vision,
    /// Named-entity extraction over the assembled context.
    Entities,
    /// Schema-conformant structuring over the assembled context.
    Structure,
    /// Bucketing entities by label.
    Categorize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Vision => "vision",
            Stage::Entities => "entities",
            Stage::Structure => "structure",
            Stage::Categorize => "categorize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called by the pipeline as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_item_complete` and `on_stage_error` may be called concurrently from
/// several tasks while images or chunks are processed in parallel.
/// Implementations must protect shared mutable state accordingly.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after the input has been resolved.
    fn on_run_start(&self, source: &str) {
        let _ = source;
    }

    /// Called when a stage begins.
    ///
    /// # Arguments
    /// * `stage`: the stage starting
    /// * `items`: units of work in the stage (images, chunks), 1 for
    ///   single-call stages
    fn on_stage_start(&self, stage: Stage, items: usize) {
        let _ = (stage, items);
    }

    /// Called when one unit of work inside a stage finishes, whether or not
    /// it succeeded.
    fn on_item_complete(&self, stage: Stage, index: usize, items: usize) {
        let _ = (stage, index, items);
    }

    /// Called when a stage degrades. The run continues.
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called when a stage ends.
    ///
    /// `produced` is the number of results the stage yielded (descriptions,
    /// entities, record keys).
    fn on_stage_complete(&self, stage: Stage, produced: usize) {
        let _ = (stage, produced);
    }

    /// Called once after the record has been assembled.
    fn on_run_complete(&self, stage_errors: usize) {
        let _ = stage_errors;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
