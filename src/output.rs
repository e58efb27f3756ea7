//! Result types produced by a batch.
//!
//! [`BatchManifest`] is what a caller gets back besides the archive itself:
//! one [`FileOutcome`] per upload, in upload order, plus the category list as
//! it stood at the end of the batch. It is serialised into the archive as
//! [`MANIFEST_FILE_NAME`] and printed by `notesort sort --json`.

use crate::error::FileError;
use serde::{Deserialize, Serialize};

/// Archive entry holding the JSON manifest.
///
/// Starts with a dot, which sanitised category names never do, so it cannot
/// collide with a category folder.
pub const MANIFEST_FILE_NAME: &str = ".notesort-manifest.json";

/// Outcome of one upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    /// 1-based position in the upload.
    pub index: usize,
    /// File name as received.
    pub file_name: String,
    /// Name the file was stored under (after sanitising or collision renaming).
    pub stored_name: Option<String>,
    /// Canonical category folder the file was moved to.
    pub category: Option<String>,
    /// The category did not exist before this file.
    pub new_category: bool,
    /// An earlier file with the same name in the same folder was replaced.
    pub replaced_existing: bool,
    /// Set when the file was skipped.
    pub error: Option<FileError>,
}

impl FileOutcome {
    pub(crate) fn failed(index: usize, file_name: &str, error: FileError) -> Self {
        Self {
            index,
            file_name: file_name.to_string(),
            stored_name: None,
            category: None,
            new_category: false,
            replaced_existing: false,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Path of the file inside the archive, e.g. `Study/a.png`.
    pub fn archive_path(&self) -> Option<String> {
        match (&self.category, &self.stored_name) {
            (Some(c), Some(n)) if self.error.is_none() => Some(format!("{c}/{n}")),
            _ => None,
        }
    }
}

/// Aggregate numbers for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_files: usize,
    pub organized_files: usize,
    pub failed_files: usize,
    pub new_categories: usize,
    pub total_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub llm_duration_ms: u64,
}

/// Everything the caller can learn about a processed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchManifest {
    pub batch_id: String,
    /// Final category list, caller-supplied names first.
    pub categories: Vec<String>,
    /// Categories introduced by the model during this batch.
    pub new_categories: Vec<String>,
    pub files: Vec<FileOutcome>,
    pub stats: BatchStats,
}

impl BatchManifest {
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| !f.is_success())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
