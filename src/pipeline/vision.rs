//! Vision calls: image descriptions and page layout Markdown.
//!
//! Neither call is retried. A failed image description becomes an empty
//! string and a failed page conversion falls back to the page's embedded
//! text; neither ever aborts a run.

use crate::error::StageError;
use crate::model::{ModelClient, ModelRequest};
use crate::pipeline::encode::png_payload;
use crate::pipeline::postprocess::clean_markdown;
use crate::pipeline::model_failure;
use crate::progress::{ExtractionProgressCallback, Stage};
use crate::prompts::{IMAGE_DESCRIPTION_PROMPT, LAYOUT_SYSTEM_PROMPT, LAYOUT_USER_PROMPT};
use crate::record::ExtractedImage;
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tracing::{debug, warn};

/// Description of one extracted image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    /// Identifier shown in the assembled context (the image file name).
    pub identifier: String,
    /// Model description; empty when the call failed.
    pub description: String,
}

/// Describe one PNG image. Errors are returned, not swallowed; see
/// [`describe_image`] for the never-failing form.
pub async fn try_describe_image(
    client: &dyn ModelClient,
    model: &str,
    png: &[u8],
) -> Result<String, StageError> {
    let request = ModelRequest::vision(model, IMAGE_DESCRIPTION_PROMPT, png_payload(png));
    let response = client
        .complete(request)
        .await
        .map_err(|e| model_failure(Stage::Vision, &e))?;
    Ok(response.content.trim().to_string())
}

/// Describe one PNG image, returning an empty string on any failure.
pub async fn describe_image(client: &dyn ModelClient, model: &str, png: &[u8]) -> String {
    try_describe_image(client, model, png)
        .await
        .unwrap_or_else(|e| {
            warn!("{}", e);
            String::new()
        })
}

/// Describe every image with at most `concurrency` calls in flight.
///
/// Summaries come back in image order, one per image.
pub async fn describe_images(
    client: &dyn ModelClient,
    model: &str,
    images: &[ExtractedImage],
    concurrency: usize,
    progress: &dyn ExtractionProgressCallback,
) -> (Vec<ImageSummary>, Vec<StageError>) {
    let total = images.len();

    let results: Vec<(ImageSummary, Option<StageError>)> = stream::iter(images.iter().enumerate())
        .map(|(idx, image)| async move {
            let start = Instant::now();
            let outcome = try_describe_image(client, model, &image.data).await;
            progress.on_item_complete(Stage::Vision, idx, total);

            let identifier = image.identifier();
            match outcome {
                Ok(description) => {
                    debug!("{}: {} chars in {:?}", identifier, description.len(), start.elapsed());
                    (ImageSummary { identifier, description }, None)
                }
                Err(err) => {
                    warn!("{}: {}", identifier, err);
                    progress.on_stage_error(Stage::Vision, &err.to_string());
                    (
                        ImageSummary {
                            identifier,
                            description: String::new(),
                        },
                        Some(err),
                    )
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut summaries = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for (summary, err) in results {
        summaries.push(summary);
        errors.extend(err);
    }
    (summaries, errors)
}

/// Convert one rendered page into layout-preserving Markdown.
pub async fn page_markdown(
    client: &dyn ModelClient,
    model: &str,
    page_png: &[u8],
) -> Result<String, StageError> {
    let request = ModelRequest::vision(model, LAYOUT_USER_PROMPT, png_payload(page_png))
        .with_system(LAYOUT_SYSTEM_PROMPT);
    let response = client
        .complete(request)
        .await
        .map_err(|e| model_failure(Stage::Ingest, &e))?;

    let markdown = clean_markdown(&response.content);
    if markdown.trim().is_empty() {
        return Err(StageError::MalformedResponse {
            stage: Stage::Ingest.to_string(),
            detail: "vision model returned an empty page".to_string(),
        });
    }
    Ok(markdown)
}
