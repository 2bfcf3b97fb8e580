//! Input resolution: normalise a user-supplied path, URL or byte buffer to a
//! local PDF file.
//!
//! pdfium opens documents by path, so URLs and in-memory buffers are written
//! to a `TempDir` that lives as long as the [`ResolvedInput`]. Both the `.pdf`
//! extension and the `%PDF` magic bytes are checked here; anything else is an
//! [`DocStructError::UnsupportedInput`] before any stage runs.

use crate::error::DocStructError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// The resolved input: a local path, or a temp copy of remote/in-memory data.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was downloaded or written from bytes into a temp directory,
    /// kept alive until processing completes.
    Temporary { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the PDF regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Temporary { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// `true` when the name ends in `.pdf`, case-insensitively.
pub fn has_pdf_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Resolve the input string to a local PDF path, downloading URLs.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, DocStructError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Write an in-memory PDF to a temp file named `name`.
pub async fn resolve_bytes(bytes: &[u8], name: &str) -> Result<ResolvedInput, DocStructError> {
    if !has_pdf_extension(name) {
        return Err(unsupported(name, "expected a .pdf file name"));
    }
    check_magic(name, bytes)?;

    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "document.pdf".into());

    let temp_dir = TempDir::new().map_err(|e| DocStructError::Internal(e.to_string()))?;
    let path = temp_dir.path().join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| DocStructError::Internal(format!("Failed to write temp file: {e}")))?;

    Ok(ResolvedInput::Temporary {
        path,
        _temp_dir: temp_dir,
    })
}

fn unsupported(input: &str, reason: impl Into<String>) -> DocStructError {
    DocStructError::UnsupportedInput {
        input: input.to_string(),
        reason: reason.into(),
    }
}

fn check_magic(input: &str, bytes: &[u8]) -> Result<(), DocStructError> {
    if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        let shown = bytes
            .iter()
            .take(4)
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        return Err(unsupported(
            input,
            format!("content does not start with %PDF (found: {shown})"),
        ));
    }
    Ok(())
}

/// Resolve a local file path, validating existence, extension and magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, DocStructError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(DocStructError::FileNotFound { path });
    }
    if path.is_dir() {
        return Err(unsupported(path_str, "is a directory"));
    }
    if !has_pdf_extension(path_str) {
        return Err(unsupported(path_str, "expected a .pdf file"));
    }

    let mut magic = Vec::with_capacity(4);
    match std::fs::File::open(&path) {
        Ok(f) => {
            f.take(4)
                .read_to_end(&mut magic)
                .map_err(|e| DocStructError::Internal(format!("Failed to read '{path_str}': {e}")))?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DocStructError::PermissionDenied { path });
        }
        Err(_) => return Err(DocStructError::FileNotFound { path }),
    }
    check_magic(path_str, &magic)?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, DocStructError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| DocStructError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            DocStructError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    check_magic(url, &bytes)?;

    let filename = filename_from_url(url);
    let temp_dir = TempDir::new().map_err(|e| DocStructError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| DocStructError::Internal(format!("Failed to write temp file: {e}")))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Temporary {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment when it names a PDF, otherwise `downloaded.pdf`.
/// Remote content is validated by magic bytes, so the name only needs the
/// right extension.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| has_pdf_extension(last))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(has_pdf_extension("report.pdf"));
        assert!(has_pdf_extension("REPORT.PDF"));
        assert!(!has_pdf_extension("report.docx"));
        assert!(!has_pdf_extension("pdf"));
    }

    #[test]
    fn filename_from_url_falls_back() {
        assert_eq!(filename_from_url("https://x.org/files/aishe.pdf"), "aishe.pdf");
        assert_eq!(filename_from_url("https://x.org/download?id=3"), "downloaded.pdf");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = resolve_local("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, DocStructError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.docx");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        let err = resolve_local(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, DocStructError::UnsupportedInput { .. }));
    }

    #[test]
    fn wrong_magic_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"PK\x03\x04 zip archive").unwrap();
        let err = resolve_local(path.to_str().unwrap()).unwrap_err();
        match err {
            DocStructError::UnsupportedInput { reason, .. } => {
                assert!(reason.contains("50 4b 03 04"), "got: {reason}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn valid_header_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.PDF");
        std::fs::write(&path, b"%PDF-1.4\n%...").unwrap();
        let resolved = resolve_local(path.to_str().unwrap()).unwrap();
        assert_eq!(resolved.path(), path.as_path());
    }

    #[tokio::test]
    async fn bytes_are_written_to_temp_file() {
        let resolved = resolve_bytes(b"%PDF-1.4\n", "upload.pdf").await.unwrap();
        assert!(resolved.path().ends_with("upload.pdf"));
        assert_eq!(std::fs::read(resolved.path()).unwrap(), b"%PDF-1.4\n");

        let err = resolve_bytes(b"hello", "upload.pdf").await.unwrap_err();
        assert!(matches!(err, DocStructError::UnsupportedInput { .. }));
    }
}
