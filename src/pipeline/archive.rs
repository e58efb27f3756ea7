//! Zip the category tree of a batch.
//!
//! Entry names are relative to the tree root (`Study/a.png`), so unpacking
//! the archive recreates the category folders directly. Directory entries
//! are written too, which keeps a category visible even when every file
//! routed to it was later replaced.

use crate::error::SortError;
use crate::output::{BatchManifest, MANIFEST_FILE_NAME};
use crate::pipeline::organize::BatchWorkspace;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Write the batch archive, replacing any previous one.
///
/// Returns the archive path.
pub async fn write_archive(
    ws: &BatchWorkspace,
    manifest: Option<&BatchManifest>,
) -> Result<PathBuf, SortError> {
    let tree = ws.tree().to_path_buf();
    let archive = ws.archive_path().to_path_buf();
    let manifest_json = manifest
        .map(|m| m.to_json_pretty())
        .transpose()
        .map_err(|e| SortError::Archive {
            path: archive.clone(),
            detail: format!("manifest serialisation failed: {e}"),
        })?;

    let out = archive.clone();
    let entries = tokio::task::spawn_blocking(move || {
        write_blocking(&tree, &out, manifest_json.as_deref())
    })
    .await
    .map_err(|e| SortError::Internal(format!("archive task panicked: {e}")))??;

    info!("Archive {} written ({} entries)", archive.display(), entries);
    Ok(archive)
}

fn write_blocking(tree: &Path, archive: &Path, manifest: Option<&str>) -> Result<usize, SortError> {
    let fail = |detail: String| SortError::Archive {
        path: archive.to_path_buf(),
        detail,
    };

    let (dirs, files) = collect_tree(tree).map_err(|e| fail(e.to_string()))?;

    let file = File::create(archive).map_err(|e| fail(e.to_string()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0usize;

    for dir in &dirs {
        zip.add_directory(format!("{dir}/"), options)
            .map_err(|e| fail(format!("Failed to create ZIP entry: {e}")))?;
        entries += 1;
    }

    for (name, path) in &files {
        zip.start_file(name.as_str(), options)
            .map_err(|e| fail(format!("Failed to create ZIP entry: {e}")))?;
        let mut src = BufReader::new(File::open(path).map_err(|e| fail(e.to_string()))?);
        std::io::copy(&mut src, &mut zip)
            .map_err(|e| fail(format!("Failed to write ZIP entry: {e}")))?;
        debug!("zipped {}", name);
        entries += 1;
    }

    if let Some(json) = manifest {
        zip.start_file(MANIFEST_FILE_NAME, options)
            .map_err(|e| fail(format!("Failed to create ZIP entry: {e}")))?;
        zip.write_all(json.as_bytes())
            .map_err(|e| fail(format!("Failed to write ZIP entry: {e}")))?;
        entries += 1;
    }

    let mut writer = zip
        .finish()
        .map_err(|e| fail(format!("Failed to finalize ZIP: {e}")))?;
    writer.flush().map_err(|e| fail(e.to_string()))?;
    Ok(entries)
}

/// Directories and files under `root`, as `/`-joined relative names in
/// sorted order.
fn collect_tree(root: &Path) -> std::io::Result<(Vec<String>, Vec<(String, PathBuf)>)> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                dirs.push(rel.clone());
                pending.push((entry.path(), rel));
            } else if file_type.is_file() {
                files.push((rel, entry.path()));
            }
        }
    }

    dirs.sort();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok((dirs, files))
}

/// Entry names of an archive, in stored order.
pub fn archive_entries(path: &Path) -> Result<Vec<String>, SortError> {
    let fail = |detail: String| SortError::Archive {
        path: path.to_path_buf(),
        detail,
    };
    let file = File::open(path).map_err(|e| fail(e.to_string()))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| fail(e.to_string()))?;
    (0..zip.len())
        .map(|i| {
            zip.by_index(i)
                .map(|f| f.name().to_string())
                .map_err(|e| fail(e.to_string()))
        })
        .collect()
}
