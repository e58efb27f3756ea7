//! Batch entry points.
//!
//! [`sort_batch`] is what the HTTP handler calls: it creates a batch
//! workspace, runs every upload through stage → OCR → categorise → place,
//! writes the archive and hands back a [`SortedBatch`] whose guard deletes
//! the workspace when dropped. [`sort_files`] is the same flow for local
//! paths and URLs, copying the archive to a destination file.
//!
//! Files in a batch are processed one after another, in upload order. A
//! category created by the model for file *n* is offered to the model for
//! file *n + 1*.

use crate::category::CategorySet;
use crate::config::SortConfig;
use crate::error::{FileError, SortError};
use crate::output::{BatchManifest, BatchStats, FileOutcome};
use crate::pipeline::archive::write_archive;
use crate::pipeline::cleanup::{cleanup_batch, CleanupGuard};
use crate::pipeline::input::{self, UploadBatch, UploadedFile};
use crate::pipeline::llm::{resolve_categorizer, Categorizer};
use crate::pipeline::ocr::{self, resolve_engine, OcrEngine};
use crate::pipeline::organize::BatchWorkspace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Configuration plus resolved collaborators, shared by every batch.
#[derive(Clone)]
pub struct Pipeline {
    config: SortConfig,
    ocr: Arc<dyn OcrEngine>,
    categorizer: Arc<dyn Categorizer>,
}

impl Pipeline {
    pub fn new(config: SortConfig) -> Self {
        Self {
            ocr: resolve_engine(&config),
            categorizer: resolve_categorizer(&config),
            config,
        }
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }
}

/// A processed batch whose archive is ready to send.
///
/// Dropping it deletes the batch directory, archive included.
#[derive(Debug)]
pub struct SortedBatch {
    pub manifest: BatchManifest,
    pub archive: PathBuf,
    guard: CleanupGuard,
}

impl SortedBatch {
    /// Split into parts; the guard keeps the batch alive until it is dropped.
    pub fn into_parts(self) -> (BatchManifest, PathBuf, CleanupGuard) {
        (self.manifest, self.archive, self.guard)
    }

    /// Delete the batch now and return the manifest.
    pub async fn finish(self) -> BatchManifest {
        if let Some(ws) = self.guard.disarm() {
            cleanup_batch(&ws).await;
        }
        self.manifest
    }
}

#[derive(Default)]
struct Timings {
    ocr_ms: u64,
    llm_ms: u64,
}

/// Process an upload batch and write its archive.
///
/// Per-file failures are recorded in the manifest. Only workspace and
/// archive failures are returned as errors; the batch directory is removed
/// on those paths too.
pub async fn sort_batch(pipeline: &Pipeline, batch: UploadBatch) -> Result<SortedBatch, SortError> {
    let ws = BatchWorkspace::create(&pipeline.config).await?;
    let guard = CleanupGuard::new(ws.clone());

    let manifest = process_batch(pipeline, &ws, batch).await;
    let archive = write_archive(&ws, pipeline.config.include_manifest.then_some(&manifest)).await?;

    Ok(SortedBatch {
        manifest,
        archive,
        guard,
    })
}

/// Run every upload through the pipeline inside an existing workspace.
///
/// Never fails as a whole: each file gets a [`FileOutcome`], successful or
/// not.
pub async fn process_batch(
    pipeline: &Pipeline,
    ws: &BatchWorkspace,
    batch: UploadBatch,
) -> BatchManifest {
    let config = &pipeline.config;
    let start = Instant::now();
    let total = batch.files.len();
    info!("Batch {}: {} file(s), {} category(ies) given", ws.id(), total, batch.categories.len());

    let mut categories = CategorySet::new(config.max_categories, config.max_label_chars);
    categories.seed(&batch.categories);

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let mut timings = Timings::default();
    let mut files = Vec::with_capacity(total);

    for (i, upload) in batch.files.into_iter().enumerate() {
        let index = i + 1;
        let name = upload.display_name(index);
        if let Some(ref cb) = config.progress_callback {
            cb.on_file_start(index, total, &name);
        }

        let outcome = match process_file(pipeline, ws, &mut categories, &mut timings, index, upload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{}", e);
                FileOutcome::failed(index, &name, e)
            }
        };

        if let Some(ref cb) = config.progress_callback {
            match (&outcome.error, &outcome.category) {
                (None, Some(category)) => cb.on_file_complete(index, total, &name, category),
                (Some(e), _) => cb.on_file_error(index, total, &e.to_string()),
                (None, None) => {}
            }
        }
        files.push(outcome);
    }

    let organized = files.iter().filter(|f| f.is_success()).count();
    let stats = BatchStats {
        total_files: total,
        organized_files: organized,
        failed_files: total - organized,
        new_categories: categories.introduced().len(),
        total_duration_ms: start.elapsed().as_millis() as u64,
        ocr_duration_ms: timings.ocr_ms,
        llm_duration_ms: timings.llm_ms,
    };

    info!(
        "Batch {} complete: {}/{} organized, {}ms total",
        ws.id(),
        organized,
        total,
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, organized);
    }

    BatchManifest {
        batch_id: ws.id().to_string(),
        categories: categories.names().to_vec(),
        new_categories: categories.introduced().to_vec(),
        files,
        stats,
    }
}

async fn process_file(
    pipeline: &Pipeline,
    ws: &BatchWorkspace,
    categories: &mut CategorySet,
    timings: &mut Timings,
    index: usize,
    upload: UploadedFile,
) -> Result<FileOutcome, FileError> {
    let config = &pipeline.config;
    let name = upload.display_name(index);
    let stored_name = upload.stored_name(index);

    let staged = ws.stage(upload.data.clone(), &name).await?;

    let ocr_start = Instant::now();
    let text = ocr::extract_text(pipeline.ocr.as_ref(), upload.data, ws.staging(), &name).await;
    timings.ocr_ms += ocr_start.elapsed().as_millis() as u64;
    let text = text?;

    let llm_start = Instant::now();
    let label = pipeline.categorizer.categorize(&text, categories.names()).await;
    timings.llm_ms += llm_start.elapsed().as_millis() as u64;
    let label = label.map_err(|e| FileError::RemoteService {
        file: name.clone(),
        detail: e.to_string(),
    })?;

    let resolution = categories.resolve(&label, &config.fallback_category);
    if resolution.fell_back {
        warn!("{}: label {:?} routed to '{}'", name, label, resolution.name);
    }

    let placement = ws
        .place(staged, &resolution.name, &stored_name, config.collision)
        .await?;
    info!("Moved {} to {}", name, resolution.name);

    Ok(FileOutcome {
        index,
        file_name: name,
        stored_name: Some(placement.stored_name),
        category: Some(resolution.name),
        new_category: resolution.is_new,
        replaced_existing: placement.replaced_existing,
        error: None,
    })
}

/// Sort local files or URLs and write the archive to `output_path`.
///
/// Any input that cannot be read or downloaded fails the call before the
/// batch starts. The archive is written atomically (temp file + rename).
pub async fn sort_files<S: AsRef<str>>(
    inputs: &[S],
    categories: &[String],
    output_path: impl AsRef<Path>,
    config: &SortConfig,
) -> Result<BatchManifest, SortError> {
    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        files.push(input::resolve_input(input.as_ref(), config.download_timeout_secs).await?);
    }

    let pipeline = Pipeline::new(config.clone());
    let sorted = sort_batch(&pipeline, UploadBatch::new(files, categories.to_vec())).await?;

    let path = output_path.as_ref();
    let write_err = |e: std::io::Error| SortError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("zip.tmp");
    tokio::fs::copy(&sorted.archive, &tmp_path).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(sorted.finish().await)
}

/// Synchronous wrapper around [`sort_files`].
///
/// Creates a temporary tokio runtime internally.
pub fn sort_files_sync<S: AsRef<str>>(
    inputs: &[S],
    categories: &[String],
    output_path: impl AsRef<Path>,
    config: &SortConfig,
) -> Result<BatchManifest, SortError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| SortError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(sort_files(inputs, categories, output_path, config))
}
