//! Error types for the notesort library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SortError`]: **Fatal**: the batch cannot produce an archive at all
//!   (workspace not writable, zip step failed, malformed upload). Returned as
//!   `Err(SortError)` from the top-level entry points and mapped to an HTTP
//!   status by [`crate::server`].
//!
//! * [`FileError`]: **Non-fatal**: a single upload failed (not an image, no
//!   text, model unreachable) but the rest of the batch is fine. Stored inside
//!   [`crate::output::FileOutcome`] so the caller can see exactly which files
//!   were skipped and why.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the notesort library.
///
/// Per-file failures use [`FileError`] and are stored in
/// [`crate::output::FileOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum SortError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The multipart body could not be parsed.
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// A local input path given to `sort` does not exist or cannot be read.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// An input URL given to `sort` could not be downloaded.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    // ── Filesystem errors ─────────────────────────────────────────────────
    /// The batch working directory could not be created or written.
    #[error("Workspace error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The finished archive could not be copied to its destination.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Compressing the category tree failed.
    #[error("Error creating ZIP file '{path}': {detail}")]
    Archive { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SortError {
    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SortError::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single uploaded file.
///
/// The batch always continues with the next file.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileError {
    /// The bytes are not a decodable image.
    #[error("Error processing {file}: {detail}")]
    Decode { file: String, detail: String },

    /// OCR ran but produced nothing after trimming.
    #[error("No text detected in {file}.")]
    EmptyText { file: String },

    /// The OCR engine itself failed (missing binary, crash, timeout).
    #[error("OCR failed for {file}: {detail}")]
    Ocr { file: String, detail: String },

    /// The remote categorisation call failed.
    #[error("Error in AI processing for {file}: {detail}")]
    RemoteService { file: String, detail: String },

    /// Staging or moving the file failed.
    #[error("I/O error for {file}: {detail}")]
    Io { file: String, detail: String },
}

impl FileError {
    /// Name of the upload this error belongs to.
    pub fn file(&self) -> &str {
        match self {
            FileError::Decode { file, .. }
            | FileError::EmptyText { file }
            | FileError::Ocr { file, .. }
            | FileError::RemoteService { file, .. }
            | FileError::Io { file, .. } => file,
        }
    }
}
