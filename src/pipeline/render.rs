//! pdfium access: binding, page text, page rasterisation, embedded images
//! and metadata.
//!
//! Everything here is blocking. Callers run it inside
//! `tokio::task::spawn_blocking`, since pdfium is CPU-bound and keeps
//! thread-local state.
//!
//! Page rasterisation caps the longest edge (`max_rendered_pixels`) rather
//! than fixing a DPI, so an A0 poster and a receipt both land in the size
//! range vision models and OCR handle well.

use crate::error::DocStructError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bind the pdfium shared library.
///
/// `PDFIUM_LIB_PATH` (a library file or the directory holding it) wins;
/// otherwise the working directory and then the system library path are
/// tried.
pub fn bind_pdfium() -> Result<Pdfium, String> {
    if let Some(configured) = std::env::var_os("PDFIUM_LIB_PATH") {
        let configured = PathBuf::from(configured);
        let lib = if configured.is_dir() {
            PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(&configured))
        } else {
            configured
        };
        return Pdfium::bind_to_library(&lib)
            .map(Pdfium::new)
            .map_err(|e| format!("failed to load pdfium from '{}': {:?}", lib.display(), e));
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| {
            format!(
                "pdfium library not found ({:?}); install libpdfium or set PDFIUM_LIB_PATH",
                e
            )
        })
}

/// Open a PDF. A file pdfium cannot parse is an unsupported input.
pub fn open_document<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, DocStructError> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| DocStructError::UnsupportedInput {
            input: path.display().to_string(),
            reason: format!("not a readable PDF: {:?}", e),
        })?;
    info!("PDF loaded: {} pages", document.pages().len());
    Ok(document)
}

/// Embedded text of every page, in page order. Pages whose text layer
/// cannot be read yield an empty string.
pub fn page_texts(document: &PdfDocument<'_>) -> Vec<String> {
    document
        .pages()
        .iter()
        .enumerate()
        .map(|(idx, page)| match page.text() {
            Ok(text) => text.all(),
            Err(e) => {
                warn!("Page {}: text layer unreadable: {:?}", idx + 1, e);
                String::new()
            }
        })
        .collect()
}

/// Characters found on the first `pages` pages.
pub fn sampled_chars(texts: &[String], pages: usize) -> usize {
    texts.iter().take(pages).map(|t| t.chars().count()).sum()
}

/// Rasterise one page so its longest edge is at most `max_pixels`.
pub fn render_page(page: &PdfPage<'_>, max_pixels: u32) -> Result<DynamicImage, String> {
    let edge = render_edge(max_pixels);
    let config = PdfRenderConfig::new()
        .set_target_width(edge)
        .set_maximum_height(edge);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| format!("{:?}", e))?;
    let image = bitmap.as_image();
    debug!("Rendered page → {}x{} px", image.width(), image.height());
    Ok(image)
}

/// pdfium takes signed pixel sizes.
fn render_edge(max_pixels: u32) -> i32 {
    i32::try_from(max_pixels).unwrap_or(i32::MAX)
}

/// Decoded raster images embedded in a page, in object order.
///
/// Each entry is the image or the reason it could not be decoded.
pub fn embedded_images(page: &PdfPage<'_>) -> Vec<Result<DynamicImage, String>> {
    page.objects()
        .iter()
        .filter_map(|object| {
            object
                .as_image_object()
                .map(|img| img.get_raw_image().map_err(|e| format!("{:?}", e)))
        })
        .collect()
}

/// Document metadata read without touching any model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub producer: Option<String>,
}

pub fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let get = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(tag)
            .map(|t| t.value().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    DocumentMetadata {
        title: get(PdfDocumentMetadataTagType::Title),
        author: get(PdfDocumentMetadataTagType::Author),
        subject: get(PdfDocumentMetadataTagType::Subject),
        producer: get(PdfDocumentMetadataTagType::Producer),
    }
}
