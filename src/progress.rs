//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::SortConfigBuilder::progress_callback`] to receive events
//! as the pipeline processes each upload. The `sort` command renders these as
//! a terminal progress bar; the HTTP server runs without one.
//!
//! # Example
//!
//! ```rust
//! use notesort::{BatchProgressCallback, SortConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     sorted: Arc<AtomicUsize>,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, total: usize, file_name: &str, category: &str) {
//!         self.sorted.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} -> {}", index, total, file_name, category);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     sorted: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = SortConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each upload.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Indices are 1-based.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first file.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called before a file is staged.
    fn on_file_start(&self, index: usize, total_files: usize, file_name: &str) {
        let _ = (index, total_files, file_name);
    }

    /// Called when a file has been moved into its category folder.
    fn on_file_complete(&self, index: usize, total_files: usize, file_name: &str, category: &str) {
        let _ = (index, total_files, file_name, category);
    }

    /// Called when a file is skipped.
    ///
    /// * `error`: human-readable error description
    fn on_file_error(&self, index: usize, total_files: usize, error: &str) {
        let _ = (index, total_files, error);
    }

    /// Called once after every file has been attempted.
    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SortConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
