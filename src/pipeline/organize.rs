//! The per-batch workspace and the move of each upload into its folder.
//!
//! Every batch gets its own directory under the configured work root:
//!
//! ```text
//! <work_dir>/batch-<uuid>/
//!     .staging/               raw uploads and OCR PNGs while in flight
//!     Organized Notes/        one folder per category
//!     organized_notes.zip     written last, streamed to the client
//! ```
//!
//! Concurrent batches therefore never see each other's files, and cleanup
//! removes exactly one directory.

use crate::config::{CollisionPolicy, SortConfig};
use crate::error::{FileError, SortError};
use bytes::Bytes;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

/// Prefix of every batch directory name; also what the startup sweep looks for.
pub const BATCH_DIR_PREFIX: &str = "batch-";

const STAGING_DIR_NAME: &str = ".staging";

/// Paths of one batch. Cheap to clone; owns nothing on disk by itself.
#[derive(Debug, Clone)]
pub struct BatchWorkspace {
    id: Uuid,
    work_root: PathBuf,
    dir: PathBuf,
    tree: PathBuf,
    staging: PathBuf,
    archive: PathBuf,
}

/// Where an upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub stored_name: String,
    pub path: PathBuf,
    pub replaced_existing: bool,
}

impl BatchWorkspace {
    /// Create a fresh batch directory with an empty tree and staging area.
    pub async fn create(config: &SortConfig) -> Result<Self, SortError> {
        let id = Uuid::new_v4();
        let work_root = config.work_dir.clone();
        let dir = work_root.join(format!("{BATCH_DIR_PREFIX}{id}"));
        let ws = Self {
            id,
            tree: dir.join(&config.tree_name),
            staging: dir.join(STAGING_DIR_NAME),
            archive: dir.join(&config.archive_name),
            work_root,
            dir,
        };

        for path in [&ws.tree, &ws.staging] {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| SortError::workspace(path, e))?;
        }
        debug!("Created batch workspace {}", ws.dir.display());
        Ok(ws)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// The `batch-<uuid>` directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Root of the category tree.
    pub fn tree(&self) -> &Path {
        &self.tree
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    /// Write an upload into the staging area.
    ///
    /// The staged file is deleted on drop unless [`BatchWorkspace::place`]
    /// moves it into the tree.
    pub async fn stage(&self, data: Bytes, file_name: &str) -> Result<NamedTempFile, FileError> {
        let staging = self.staging.clone();
        let name = file_name.to_string();
        tokio::task::spawn_blocking(move || {
            let io_err = |e: std::io::Error| FileError::Io {
                file: name.clone(),
                detail: e.to_string(),
            };
            let mut file = tempfile::Builder::new()
                .prefix("upload-")
                .tempfile_in(&staging)
                .map_err(io_err)?;
            file.write_all(&data).map_err(io_err)?;
            file.flush().map_err(io_err)?;
            Ok(file)
        })
        .await
        .map_err(|e| FileError::Io {
            file: file_name.to_string(),
            detail: format!("staging task panicked: {e}"),
        })?
    }

    /// Move a staged upload to `<tree>/<category>/<stored_name>`.
    ///
    /// `category` and `stored_name` must already be sanitised.
    pub async fn place(
        &self,
        staged: NamedTempFile,
        category: &str,
        stored_name: &str,
        policy: CollisionPolicy,
    ) -> Result<Placement, FileError> {
        let folder = self.tree.join(category);
        let name = stored_name.to_string();
        tokio::task::spawn_blocking(move || place_blocking(staged, &folder, &name, policy))
            .await
            .map_err(|e| FileError::Io {
                file: stored_name.to_string(),
                detail: format!("move task panicked: {e}"),
            })?
    }
}

fn place_blocking(
    staged: NamedTempFile,
    folder: &Path,
    stored_name: &str,
    policy: CollisionPolicy,
) -> Result<Placement, FileError> {
    let io_err = |detail: String| FileError::Io {
        file: stored_name.to_string(),
        detail,
    };
    std::fs::create_dir_all(folder).map_err(|e| io_err(e.to_string()))?;

    let target = folder.join(stored_name);
    let placement = match policy {
        CollisionPolicy::Overwrite => {
            let replaced_existing = target.exists();
            staged
                .persist(&target)
                .map_err(|e| io_err(e.error.to_string()))?;
            Placement {
                stored_name: stored_name.to_string(),
                path: target,
                replaced_existing,
            }
        }
        CollisionPolicy::Rename => {
            let name = unique_name(folder, stored_name);
            let path = folder.join(&name);
            staged
                .persist_noclobber(&path)
                .map_err(|e| io_err(e.error.to_string()))?;
            Placement {
                stored_name: name,
                path,
                replaced_existing: false,
            }
        }
    };
    debug!("Placed {}", placement.path.display());
    Ok(placement)
}

/// First of `name`, `stem (1).ext`, `stem (2).ext`, … not present in `folder`.
fn unique_name(folder: &Path, name: &str) -> String {
    if !folder.join(name).exists() {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };
    (1..)
        .map(|n| format!("{stem} ({n}){ext}"))
        .find(|candidate| !folder.join(candidate).exists())
        .unwrap_or_else(|| name.to_string())
}
