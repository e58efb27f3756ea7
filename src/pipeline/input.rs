//! Input handling: the upload batch and CLI input resolution.
//!
//! The HTTP server builds an [`UploadBatch`] straight from multipart fields.
//! The `sort` command instead receives paths or URLs; [`resolve_input`] turns
//! each into the same [`UploadedFile`] so both front ends share one pipeline.

use crate::category::sanitize_file_name;
use crate::error::SortError;
use bytes::Bytes;
use std::path::PathBuf;
use tracing::{debug, info};

/// One uploaded file, as received.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Name supplied by the client; may be empty or path-like.
    pub file_name: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    /// Name the file is stored under inside its category folder.
    ///
    /// `index` is the 1-based position in the batch, used when the client
    /// name has nothing usable left after sanitising.
    pub fn stored_name(&self, index: usize) -> String {
        sanitize_file_name(&self.file_name).unwrap_or_else(|| format!("upload-{index}"))
    }

    /// Name used in messages: the client name, or the stored name if blank.
    pub fn display_name(&self, index: usize) -> String {
        if self.file_name.trim().is_empty() {
            self.stored_name(index)
        } else {
            self.file_name.clone()
        }
    }
}

/// Files and caller categories of one request.
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    pub files: Vec<UploadedFile>,
    pub categories: Vec<String>,
}

impl UploadBatch {
    pub fn new(files: Vec<UploadedFile>, categories: Vec<String>) -> Self {
        Self { files, categories }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a CLI input (local path or HTTP/HTTPS URL) to an [`UploadedFile`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<UploadedFile, SortError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<UploadedFile, SortError> {
    let path = PathBuf::from(path_str);
    let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            SortError::InputNotFound { path: path.clone() }
        }
        _ => SortError::workspace(&path, e),
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    debug!("Read local input: {} ({} bytes)", path.display(), data.len());
    Ok(UploadedFile::new(file_name, data))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<UploadedFile, SortError> {
    info!("Downloading image from: {}", url);

    let failed = |reason: String| SortError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    info!("Downloaded {} bytes", bytes.len());

    Ok(UploadedFile::new(filename_from_url(url), bytes))
}

/// Last non-empty URL path segment, or a generic name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded-image".to_string()
}
