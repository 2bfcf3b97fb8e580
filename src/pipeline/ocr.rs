//! OCR for scanned documents via an external `tesseract` binary.
//!
//! Rendered pages are piped to `tesseract stdin stdout -l <lang>` one at a
//! time, in page order. A missing binary is a [`StageError::ToolchainMissing`]
//! carrying an install hint; the run carries on without OCR text.

use crate::error::StageError;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const STAGE: &str = "ocr";

/// An OCR engine reachable on `PATH`.
#[derive(Debug, Clone)]
pub struct OcrEngine {
    command: String,
    language: String,
}

impl OcrEngine {
    pub fn new(command: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
        }
    }

    /// Recognise the text in one PNG-encoded page.
    pub async fn recognize(&self, png: &[u8]) -> Result<String, StageError> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", self.language.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => StageError::ToolchainMissing {
                    stage: STAGE.to_string(),
                    detail: format!(
                        "'{}' not found on PATH; install tesseract-ocr to read scanned documents",
                        self.command
                    ),
                },
                _ => StageError::Ingest {
                    stage: STAGE.to_string(),
                    detail: format!("failed to start '{}': {}", self.command, e),
                },
            })?;

        // Feed stdin from its own task so a chatty child cannot block on a
        // full stdout pipe while we are still writing.
        let writer = child.stdin.take().map(|mut stdin| {
            let data = png.to_vec();
            tokio::spawn(async move {
                let _ = stdin.write_all(&data).await;
            })
        });

        let output = child.wait_with_output().await.map_err(|e| StageError::Ingest {
            stage: STAGE.to_string(),
            detail: format!("'{}' did not finish: {}", self.command, e),
        })?;
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::Ingest {
                stage: STAGE.to_string(),
                detail: format!("'{}' exited with {}: {}", self.command, output.status, stderr.trim()),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("OCR produced {} chars", text.len());
        Ok(text)
    }

    /// OCR rendered pages in page order.
    ///
    /// Returns `(page_index, text)` for pages that succeeded plus the errors
    /// for those that did not. Stops at the first missing-toolchain error,
    /// since every later page would fail the same way.
    pub async fn recognize_pages(&self, pages: &[(usize, Vec<u8>)]) -> (Vec<(usize, String)>, Vec<StageError>) {
        let mut texts = Vec::with_capacity(pages.len());
        let mut errors = Vec::new();

        for (page_index, png) in pages {
            match self.recognize(png).await {
                Ok(text) => texts.push((*page_index, text)),
                Err(err @ StageError::ToolchainMissing { .. }) => {
                    warn!("{}", err);
                    errors.push(err);
                    break;
                }
                Err(err) => {
                    warn!("Page {}: {}", page_index + 1, err);
                    errors.push(err);
                }
            }
        }

        (texts, errors)
    }
}
