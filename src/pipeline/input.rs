//! Input resolution: normalise a user-supplied path or URL to a local file
//! and work out what kind of document it is.
//!
//! URLs are downloaded into a `TempDir` that lives as long as the
//! [`ResolvedInput`], since pdfium needs a file-system path. Google Drive
//! share links are rewritten to their direct-download form first.

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// File extensions picked up when a directory is given as input.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp", "txt",
];

/// Container format of an input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Image,
    Text,
}

/// The resolved input: either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL. The `TempDir` is kept alive until processing completes.
    Downloaded {
        path: PathBuf,
        name: String,
        _temp_dir: TempDir,
    },
}

impl ResolvedInput {
    /// Path to the document regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    /// Base name used for the persisted record.
    pub fn document_name(&self) -> String {
        match self {
            ResolvedInput::Local(p) => document_name(p),
            ResolvedInput::Downloaded { name, .. } => name.clone(),
        }
    }
}

/// File stem of `path`, or `"document"` when it has none.
pub fn document_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// `true` when `path` has one of the [`SUPPORTED_EXTENSIONS`].
pub fn has_supported_extension(path: &Path) -> bool {
    extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

static RE_DRIVE_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://drive\.google\.com/(?:file/d/|open\?id=)([A-Za-z0-9_-]+)").unwrap());

/// Rewrite a Google Drive share link to its direct-download URL.
///
/// Returns the input unchanged for every other URL.
pub fn direct_download_url(url: &str) -> String {
    match RE_DRIVE_FILE.captures(url) {
        Some(caps) => format!("https://drive.google.com/uc?export=download&id={}", &caps[1]),
        None => url.to_string(),
    }
}

/// Detect the document kind from its leading bytes, then its extension.
pub fn detect_kind(path: &Path, head: &[u8]) -> Option<DocumentKind> {
    if head.starts_with(b"%PDF") {
        return Some(DocumentKind::Pdf);
    }
    if head.starts_with(b"PK\x03\x04") {
        return Some(DocumentKind::Docx);
    }
    if image::guess_format(head).is_ok() {
        return Some(DocumentKind::Image);
    }
    match extension(path).as_deref() {
        Some("pdf") => Some(DocumentKind::Pdf),
        Some("docx") => Some(DocumentKind::Docx),
        Some("txt" | "text" | "md") => Some(DocumentKind::Text),
        _ => None,
    }
}

/// Read the first bytes of `path` for kind detection.
pub fn read_head(path: &Path) -> Result<Vec<u8>, ExtractError> {
    let mut file = open_readable(path)?;
    let mut head = Vec::with_capacity(32);
    file.by_ref()
        .take(32)
        .read_to_end(&mut head)
        .map_err(|e| ExtractError::CorruptDocument {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    Ok(head)
}

fn open_readable(path: &Path) -> Result<std::fs::File, ExtractError> {
    match std::fs::File::open(path) {
        Ok(f) => Ok(f),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(ExtractError::PermissionDenied {
            path: path.to_path_buf(),
        }),
        Err(_) => Err(ExtractError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Resolve the input string to a local file path.
///
/// URLs are downloaded to a temporary directory; local files must exist and
/// be readable.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ExtractError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.trim().is_empty() {
        Err(ExtractError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, ExtractError> {
    let path = PathBuf::from(path_str);

    if !path.is_file() {
        return Err(ExtractError::FileNotFound { path });
    }
    open_readable(&path)?;

    debug!("Resolved local document: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ExtractError> {
    let fetch_url = direct_download_url(url);
    info!("Downloading document from: {}", fetch_url);

    let download_failed = |reason: String| ExtractError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| download_failed(e.to_string()))?;

    let response = client.get(&fetch_url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            download_failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(download_failed(format!("HTTP {}", response.status())));
    }

    let filename = filename_from_url(url);
    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            download_failed(e.to_string())
        }
    })?;

    let temp_dir = TempDir::new().map_err(|e| ExtractError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ExtractError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        name: document_name(Path::new(&filename)),
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// A reasonable file name for a downloaded document.
///
/// Drive links yield their file id; other URLs their last path segment.
fn filename_from_url(url: &str) -> String {
    if let Some(caps) = RE_DRIVE_FILE.captures(url) {
        return caps[1].to_string();
    }
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(last) = parsed.path_segments().and_then(|mut s| s.next_back()) {
            if !last.is_empty() {
                return last.to_string();
            }
        }
    }
    "downloaded".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/cv.pdf"));
        assert!(is_url("http://example.com/cv.pdf"));
        assert!(!is_url("/tmp/cv.pdf"));
        assert!(!is_url("cv.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn drive_links_are_rewritten() {
        assert_eq!(
            direct_download_url("https://drive.google.com/file/d/1AbC_d-9/view?usp=sharing"),
            "https://drive.google.com/uc?export=download&id=1AbC_d-9"
        );
        assert_eq!(
            direct_download_url("https://drive.google.com/open?id=XYZ"),
            "https://drive.google.com/uc?export=download&id=XYZ"
        );
        assert_eq!(
            direct_download_url("https://example.com/file/d/123"),
            "https://example.com/file/d/123"
        );
    }

    #[test]
    fn filenames_from_urls() {
        assert_eq!(filename_from_url("https://x.com/a/cv_ana.pdf"), "cv_ana.pdf");
        assert_eq!(filename_from_url("https://drive.google.com/file/d/ID42/view"), "ID42");
        assert_eq!(filename_from_url("https://x.com/"), "downloaded");
    }

    #[test]
    fn kind_from_magic_bytes_wins_over_extension() {
        assert_eq!(detect_kind(Path::new("cv.txt"), b"%PDF-1.7"), Some(DocumentKind::Pdf));
        assert_eq!(detect_kind(Path::new("cv"), b"PK\x03\x04rest"), Some(DocumentKind::Docx));
        assert_eq!(
            detect_kind(Path::new("cv.pdf"), b"\x89PNG\r\n\x1a\n0000"),
            Some(DocumentKind::Image)
        );
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(detect_kind(Path::new("cv.TXT"), b"Ana Paula"), Some(DocumentKind::Text));
        assert_eq!(detect_kind(Path::new("cv.odt"), b"garbage"), None);
    }

    #[test]
    fn document_name_is_stem() {
        assert_eq!(document_name(Path::new("/tmp/cv_ana.pdf")), "cv_ana");
        assert_eq!(document_name(Path::new("/")), "document");
    }

    #[test]
    fn supported_extensions() {
        assert!(has_supported_extension(Path::new("a/CV.PDF")));
        assert!(has_supported_extension(Path::new("cv.jpeg")));
        assert!(!has_supported_extension(Path::new("cv.odt")));
        assert!(!has_supported_extension(Path::new("README")));
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.err().unwrap();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }
}
