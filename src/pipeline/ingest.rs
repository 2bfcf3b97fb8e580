//! Ingestion: PDF → text representation + embedded images.
//!
//! ## Routing
//!
//! The first `detection_pages` pages are sampled once. More than
//! `digital_threshold_chars` characters of embedded text means the document
//! is digital, otherwise it is scanned. The decision never changes
//! afterwards.
//!
//! | kind    | markdown strategy | text source                                   |
//! |---------|-------------------|-----------------------------------------------|
//! | digital | `Text`            | embedded page text                            |
//! | digital | `Vision`          | vision model per rendered page, text fallback |
//! | scanned | any               | rendered pages through OCR                    |
//!
//! Embedded images are extracted for every document, PNG-encoded, and
//! written as `page_{n}_img_{i}.png` into the run's image directory.
//!
//! Ingestion never fails once the file opens: unreadable pages, missing
//! OCR or a missing pdfium library become [`StageError`]s on the result.

use crate::config::{ExtractionConfig, MarkdownStrategy};
use crate::error::{DocStructError, StageError};
use crate::model::ModelClient;
use crate::pipeline::encode::encode_png;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::postprocess::clean_page_text;
use crate::pipeline::render::{
    bind_pdfium, embedded_images, open_document, page_texts, read_metadata, render_page,
    sampled_chars, DocumentMetadata,
};
use crate::pipeline::vision::page_markdown;
use crate::progress::Stage;
use crate::record::{Document, DocumentKind, ExtractedImage};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Text and images pulled out of one document.
#[derive(Debug)]
pub struct IngestedDocument {
    pub document: Document,
    /// Layout-preserving text; empty when nothing could be extracted.
    pub markdown: String,
    /// Images in page order, then object order within a page.
    pub images: Vec<ExtractedImage>,
    /// Degradations met during ingestion.
    pub warnings: Vec<StageError>,
    /// Per-run image directory, removed when the document is dropped.
    image_dir: Option<TempDir>,
}

impl IngestedDocument {
    pub fn new(document: Document, markdown: impl Into<String>) -> Self {
        Self {
            document,
            markdown: markdown.into(),
            images: Vec::new(),
            warnings: Vec::new(),
            image_dir: None,
        }
    }

    pub fn with_images(mut self, images: Vec<ExtractedImage>) -> Self {
        self.images = images;
        self
    }

    pub fn with_warning(mut self, warning: StageError) -> Self {
        self.warnings.push(warning);
        self
    }

    /// Directory the images were written to, when it is a temporary one.
    pub fn temp_image_dir(&self) -> Option<&Path> {
        self.image_dir.as_ref().map(TempDir::path)
    }
}

/// Anything that turns a document path into text and images.
#[async_trait]
pub trait DocumentIngestor: Send + Sync {
    async fn ingest(&self, path: &Path) -> Result<IngestedDocument, DocStructError>;
}

fn ingest_error(detail: impl Into<String>) -> StageError {
    StageError::Ingest {
        stage: Stage::Ingest.to_string(),
        detail: detail.into(),
    }
}

// ── pdfium pass ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ReadOptions {
    detection_pages: usize,
    threshold: usize,
    render_digital: bool,
    max_pixels: u32,
}

/// Everything read from the PDF in one blocking pass.
struct PdfContents {
    kind: DocumentKind,
    texts: Vec<String>,
    /// `(page_index, image_index, png)`
    images: Vec<(usize, usize, Vec<u8>)>,
    /// `(page_index, png)` for rendered pages.
    pages: Vec<(usize, Vec<u8>)>,
    warnings: Vec<StageError>,
}

enum PdfRead {
    Contents(PdfContents),
    NoEngine(String),
}

fn read_pdf_blocking(path: &Path, opts: ReadOptions) -> Result<PdfRead, DocStructError> {
    let pdfium = match bind_pdfium() {
        Ok(p) => p,
        Err(detail) => return Ok(PdfRead::NoEngine(detail)),
    };
    let document = open_document(&pdfium, path)?;

    let texts = page_texts(&document);
    let sampled = sampled_chars(&texts, opts.detection_pages);
    let kind = DocumentKind::classify(sampled, opts.threshold);
    info!(
        "{} pages, {} chars on the first {} → {}",
        texts.len(),
        sampled,
        opts.detection_pages.min(texts.len()),
        kind
    );

    let render = kind == DocumentKind::Scanned || opts.render_digital;
    let mut images = Vec::new();
    let mut pages = Vec::new();
    let mut warnings = Vec::new();

    for (page_index, page) in document.pages().iter().enumerate() {
        for (image_index, raw) in embedded_images(&page).into_iter().enumerate() {
            match raw.and_then(|img| encode_png(&img, opts.max_pixels).map_err(|e| e.to_string())) {
                Ok(png) => images.push((page_index, image_index, png)),
                Err(detail) => {
                    warn!("Page {} image {}: {}", page_index + 1, image_index, detail);
                    warnings.push(ingest_error(format!(
                        "page {} image {}: {}",
                        page_index + 1,
                        image_index,
                        detail
                    )));
                }
            }
        }

        if render {
            match render_page(&page, opts.max_pixels)
                .and_then(|img| encode_png(&img, opts.max_pixels).map_err(|e| e.to_string()))
            {
                Ok(png) => pages.push((page_index, png)),
                Err(detail) => {
                    warn!("Page {}: rasterisation failed: {}", page_index + 1, detail);
                    warnings.push(ingest_error(format!(
                        "page {} rasterisation failed: {}",
                        page_index + 1,
                        detail
                    )));
                }
            }
        }
    }

    Ok(PdfRead::Contents(PdfContents {
        kind,
        texts,
        images,
        pages,
        warnings,
    }))
}

// ── Ingestor ─────────────────────────────────────────────────────────────

/// pdfium-backed [`DocumentIngestor`].
#[derive(Clone)]
pub struct PdfIngestor {
    detection_pages: usize,
    threshold: usize,
    markdown: MarkdownStrategy,
    max_pixels: u32,
    image_dir: Option<PathBuf>,
    concurrency: usize,
    ocr: OcrEngine,
    layout_model: String,
    layout_client: Option<Arc<dyn ModelClient>>,
}

impl PdfIngestor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            detection_pages: config.detection_pages,
            threshold: config.digital_threshold_chars,
            markdown: config.markdown,
            max_pixels: config.max_rendered_pixels,
            image_dir: config.image_dir.clone(),
            concurrency: config.concurrency,
            ocr: OcrEngine::new(config.ocr_command.clone(), config.ocr_language.clone()),
            layout_model: config.vision_model.clone(),
            layout_client: None,
        }
    }

    /// Client used by the `Vision` markdown strategy. Without one, digital
    /// documents always use their embedded text.
    pub fn with_layout_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.layout_client = Some(client);
        self
    }

    fn layout_client(&self) -> Option<&Arc<dyn ModelClient>> {
        match self.markdown {
            MarkdownStrategy::Vision => self.layout_client.as_ref(),
            MarkdownStrategy::Text => None,
        }
    }

    /// Write PNGs into the image directory. Images that cannot be written
    /// are dropped with a warning.
    async fn store_images(
        &self,
        raw: Vec<(usize, usize, Vec<u8>)>,
        warnings: &mut Vec<StageError>,
    ) -> (Vec<ExtractedImage>, Option<TempDir>) {
        if raw.is_empty() {
            return (Vec::new(), None);
        }

        let (dir, guard) = match &self.image_dir {
            Some(dir) => (dir.clone(), None),
            None => match TempDir::new() {
                Ok(tmp) => (tmp.path().to_path_buf(), Some(tmp)),
                Err(e) => {
                    warnings.push(ingest_error(format!("cannot create image directory: {e}")));
                    return (Vec::new(), None);
                }
            },
        };
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warnings.push(ingest_error(format!(
                "cannot create image directory '{}': {e}",
                dir.display()
            )));
            return (Vec::new(), guard);
        }

        let mut images = Vec::with_capacity(raw.len());
        for (page_index, image_index, data) in raw {
            let path = dir.join(ExtractedImage::file_name(page_index, image_index));
            match tokio::fs::write(&path, &data).await {
                Ok(()) => images.push(ExtractedImage {
                    page_index,
                    image_index,
                    path,
                    data,
                }),
                Err(e) => {
                    warn!("Cannot write '{}': {}", path.display(), e);
                    warnings.push(ingest_error(format!("cannot write '{}': {e}", path.display())));
                }
            }
        }
        debug!("Wrote {} images to {}", images.len(), dir.display());
        (images, guard)
    }

    async fn ocr_markdown(&self, pages: &[(usize, Vec<u8>)], warnings: &mut Vec<StageError>) -> String {
        let (texts, errors) = self.ocr.recognize_pages(pages).await;
        warnings.extend(errors);
        join_pages(texts.iter().map(|(_, t)| t.as_str()))
    }

    async fn layout_markdown(
        &self,
        client: &dyn ModelClient,
        texts: &[String],
        pages: Vec<(usize, Vec<u8>)>,
        warnings: &mut Vec<StageError>,
    ) -> String {
        let mut rendered: Vec<Option<Vec<u8>>> = vec![None; texts.len()];
        for (idx, png) in pages {
            if let Some(slot) = rendered.get_mut(idx) {
                *slot = Some(png);
            }
        }

        let model = self.layout_model.as_str();
        let results: Vec<(usize, Result<String, StageError>)> = stream::iter(rendered.into_iter().enumerate())
            .map(|(idx, png)| async move {
                match png {
                    Some(png) => (idx, page_markdown(client, model, &png).await),
                    None => (idx, Err(ingest_error(format!("page {} was not rendered", idx + 1)))),
                }
            })
            .buffered(self.concurrency.max(1))
            .collect()
            .await;

        let mut out = Vec::with_capacity(results.len());
        for (idx, result) in results {
            match result {
                Ok(md) => out.push(md),
                Err(err) => {
                    warn!("Page {}: layout conversion failed, using text layer: {}", idx + 1, err);
                    warnings.push(err);
                    out.push(clean_page_text(&texts[idx]));
                }
            }
        }
        join_pages(out.iter().map(String::as_str))
    }
}

/// Join cleaned page texts with blank-line separators, skipping empty pages.
fn join_pages<'a>(pages: impl Iterator<Item = &'a str>) -> String {
    pages
        .map(clean_page_text)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl DocumentIngestor for PdfIngestor {
    async fn ingest(&self, path: &Path) -> Result<IngestedDocument, DocStructError> {
        let opts = ReadOptions {
            detection_pages: self.detection_pages,
            threshold: self.threshold,
            render_digital: self.layout_client().is_some(),
            max_pixels: self.max_pixels,
        };
        let owned = path.to_path_buf();
        let read = tokio::task::spawn_blocking(move || read_pdf_blocking(&owned, opts))
            .await
            .map_err(|e| DocStructError::Internal(format!("PDF read task panicked: {e}")))??;

        let contents = match read {
            PdfRead::Contents(c) => c,
            PdfRead::NoEngine(detail) => {
                warn!("{}", detail);
                let document = Document {
                    path: path.to_path_buf(),
                    kind: DocumentKind::Scanned,
                    page_count: 0,
                };
                return Ok(IngestedDocument::new(document, String::new()).with_warning(
                    StageError::ToolchainMissing {
                        stage: Stage::Ingest.to_string(),
                        detail,
                    },
                ));
            }
        };

        let PdfContents {
            kind,
            texts,
            images,
            pages,
            mut warnings,
        } = contents;

        let markdown = match (kind, self.layout_client()) {
            (DocumentKind::Scanned, _) => self.ocr_markdown(&pages, &mut warnings).await,
            (DocumentKind::Digital, Some(client)) => {
                self.layout_markdown(client.as_ref(), &texts, pages, &mut warnings)
                    .await
            }
            (DocumentKind::Digital, None) => join_pages(texts.iter().map(String::as_str)),
        };

        let (images, image_dir) = self.store_images(images, &mut warnings).await;

        info!(
            "Ingested {}: {} chars of text, {} images, {} warnings",
            path.display(),
            markdown.len(),
            images.len(),
            warnings.len()
        );

        Ok(IngestedDocument {
            document: Document {
                path: path.to_path_buf(),
                kind,
                page_count: texts.len(),
            },
            markdown,
            images,
            warnings,
            image_dir,
        })
    }
}

// ── Inspection ───────────────────────────────────────────────────────────

/// Facts about a PDF gathered without any model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub page_count: usize,
    pub kind: DocumentKind,
    /// Characters of embedded text on the sampled pages.
    pub sampled_chars: usize,
    pub image_count: usize,
    pub metadata: DocumentMetadata,
}

/// Open the PDF, classify it and count its images.
pub async fn inspect_pdf(
    path: &Path,
    detection_pages: usize,
    threshold: usize,
) -> Result<DocumentInfo, DocStructError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<DocumentInfo, DocStructError> {
        let pdfium = bind_pdfium().map_err(|detail| DocStructError::PdfEngineUnavailable { detail })?;
        let document = open_document(&pdfium, &owned)?;
        let texts = page_texts(&document);
        let sampled = sampled_chars(&texts, detection_pages);
        let image_count: usize = document
            .pages()
            .iter()
            .map(|page| embedded_images(&page).len())
            .sum();

        Ok(DocumentInfo {
            page_count: texts.len(),
            kind: DocumentKind::classify(sampled, threshold),
            sampled_chars: sampled,
            image_count,
            metadata: read_metadata(&document),
            path: owned,
        })
    })
    .await
    .map_err(|e| DocStructError::Internal(format!("Inspect task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelError, ModelRequest, ModelResponse};
    use crate::pipeline::encode::png_payload;

    #[test]
    fn join_pages_skips_blank_pages() {
        let pages = ["First page  ", "   ", "\u{FEFF}Third\r\npage"];
        assert_eq!(join_pages(pages.into_iter()), "First page\n\nThird\npage");
    }

    #[test]
    fn text_strategy_never_uses_layout_client() {
        let config = ExtractionConfig::default();
        let ingestor = PdfIngestor::new(&config);
        assert!(ingestor.layout_client().is_none());
    }

    #[test]
    fn builder_style_document() {
        let doc = Document {
            path: PathBuf::from("a.pdf"),
            kind: DocumentKind::Digital,
            page_count: 1,
        };
        let ingested = IngestedDocument::new(doc, "text").with_warning(ingest_error("x"));
        assert_eq!(ingested.markdown, "text");
        assert_eq!(ingested.warnings.len(), 1);
        assert!(ingested.temp_image_dir().is_none());
    }

    /// Answers layout requests per rendered page; `p1` fails.
    struct PageScript;

    #[async_trait]
    impl ModelClient for PageScript {
        async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
            let image = request.image.expect("layout requests carry a page image");
            if image.data == png_payload(b"p0").data {
                Ok(ModelResponse::new("```markdown\n# Admissions\n\nOpen till March.\n```"))
            } else {
                Err(ModelError::Status {
                    status: 500,
                    message: "upstream failure".into(),
                })
            }
        }
    }

    #[tokio::test]
    async fn layout_pages_fall_back_to_text_in_order() {
        let ingestor = PdfIngestor::new(
            &ExtractionConfig::builder()
                .markdown(MarkdownStrategy::Vision)
                .concurrency(3)
                .build()
                .unwrap(),
        );
        let texts = vec![
            "page zero text".to_string(),
            "page one text  ".to_string(),
            "\u{FEFF}page two text".to_string(),
        ];
        let pages = vec![(0, b"p0".to_vec()), (1, b"p1".to_vec())];

        let mut warnings = Vec::new();
        let md = ingestor
            .layout_markdown(&PageScript, &texts, pages, &mut warnings)
            .await;

        assert_eq!(md, "# Admissions\n\nOpen till March.\n\npage one text\n\npage two text");
        assert_eq!(warnings.len(), 2);
        assert!(matches!(warnings[0], StageError::Transport { .. }));
        assert!(warnings[1].to_string().contains("page 3 was not rendered"));
        assert!(warnings.iter().all(|w| w.stage() == "ingest"));
    }

    #[tokio::test]
    async fn images_are_written_with_indexed_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExtractionConfig::builder().image_dir(dir.path()).build().unwrap();
        let ingestor = PdfIngestor::new(&config);

        let mut warnings = Vec::new();
        let (images, guard) = ingestor
            .store_images(vec![(0, 0, vec![1, 2, 3]), (2, 1, vec![4])], &mut warnings)
            .await;

        assert!(guard.is_none());
        assert!(warnings.is_empty());
        assert_eq!(images[1].identifier(), "page_3_img_1.png");
        assert_eq!(std::fs::read(dir.path().join("page_1_img_0.png")).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn temp_image_dir_lives_with_guard() {
        let ingestor = PdfIngestor::new(&ExtractionConfig::default());
        let mut warnings = Vec::new();
        let (images, guard) = ingestor
            .store_images(vec![(0, 0, vec![9])], &mut warnings)
            .await;
        let guard = guard.expect("temp dir");
        assert!(images[0].path.starts_with(guard.path()));
        assert!(images[0].path.exists());
        let path = images[0].path.clone();
        drop(guard);
        assert!(!path.exists());
    }
}
