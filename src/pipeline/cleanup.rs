//! Removal of batch directories.
//!
//! A batch is deleted once its archive has been delivered. The HTTP handler
//! moves a [`CleanupGuard`] into the response body stream; the guard runs
//! [`cleanup_batch`] when the stream is dropped, whether the client read the
//! whole body or went away early. Errors are logged and never surfaced.

use crate::pipeline::organize::{BatchWorkspace, BATCH_DIR_PREFIX};
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

/// Delete the archive and the batch directory, then make sure the work root
/// still exists. Safe to call any number of times.
pub async fn cleanup_batch(ws: &BatchWorkspace) {
    let ws = ws.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || cleanup_batch_blocking(&ws)).await {
        warn!("Cleanup task failed: {}", e);
    }
}

/// Blocking form of [`cleanup_batch`].
pub fn cleanup_batch_blocking(ws: &BatchWorkspace) {
    match std::fs::remove_file(ws.archive_path()) {
        Ok(()) => debug!("Removed {}", ws.archive_path().display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Error deleting ZIP file {}: {}", ws.archive_path().display(), e),
    }

    match std::fs::remove_dir_all(ws.dir()) {
        Ok(()) => info!("Cleaned up batch {}", ws.id()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Error deleting folder {}: {}", ws.dir().display(), e),
    }

    if let Err(e) = std::fs::create_dir_all(ws.work_root()) {
        warn!("Could not recreate work root {}: {}", ws.work_root().display(), e);
    }
}

/// Runs [`cleanup_batch`] when dropped, unless disarmed.
#[derive(Debug)]
pub struct CleanupGuard {
    ws: Option<BatchWorkspace>,
}

impl CleanupGuard {
    pub fn new(ws: BatchWorkspace) -> Self {
        Self { ws: Some(ws) }
    }

    /// Keep the batch on disk. Returns the workspace for the caller to manage.
    pub fn disarm(mut self) -> Option<BatchWorkspace> {
        self.ws.take()
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(ws) = self.ws.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || cleanup_batch_blocking(&ws));
            }
            Err(_) => cleanup_batch_blocking(&ws),
        }
    }
}

/// Remove `batch-*` directories left by an earlier process.
///
/// Returns how many were removed. A missing work root is created.
pub async fn sweep_stale_batches(work_root: &Path) -> std::io::Result<usize> {
    let root = work_root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&root)?;
        let mut removed = 0;
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            let is_batch = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(BATCH_DIR_PREFIX));
            if !is_batch || !entry.file_type()?.is_dir() {
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove stale batch {}: {}", entry.path().display(), e),
            }
        }
        if removed > 0 {
            info!("Removed {} stale batch director(ies) from {}", removed, root.display());
        }
        Ok(removed)
    })
    .await
    .map_err(std::io::Error::other)?
}
