//! # notesort
//!
//! Sort photographed notes into category folders using OCR and an LLM.
//!
//! A batch of images goes in, a zip of category folders comes out. Each image
//! is read with Tesseract, the text is handed to a language model together
//! with the current category list, and the image is moved into the folder the
//! model names. Labels the caller did not supply become new folders (up to a
//! cap), and later files in the same batch can be sorted into them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (multipart / paths / URLs)
//!  │
//!  ├─ 1. Stage     write bytes into a per-batch directory
//!  ├─ 2. OCR       decode → PNG → tesseract (spawn_blocking + child process)
//!  ├─ 3. Classify  one chat call per image via edgequake-llm
//!  ├─ 4. Place     move into <tree>/<category>/
//!  ├─ 5. Archive   zip the tree + JSON manifest
//!  └─ 6. Cleanup   delete the batch once the archive is delivered
//! ```
//!
//! A file that fails (not an image, no text, model error) is skipped and
//! recorded in the manifest; the rest of the batch carries on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notesort::{sort_files, SortConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = SortConfig::default();
//!     let categories = vec!["Study".to_string(), "Planning".to_string()];
//!     let manifest = sort_files(&["page1.jpg", "page2.jpg"], &categories, "notes.zip", &config).await?;
//!     for file in &manifest.files {
//!         println!("{} -> {:?}", file.file_name, file.category);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `notesort` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! notesort = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod category;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{process_batch, sort_batch, sort_files, sort_files_sync, Pipeline, SortedBatch};
pub use category::{CategorySet, Resolution};
pub use config::{CollisionPolicy, SortConfig, SortConfigBuilder};
pub use error::{FileError, SortError};
pub use output::{BatchManifest, BatchStats, FileOutcome, MANIFEST_FILE_NAME};
pub use pipeline::cleanup::{cleanup_batch, sweep_stale_batches, CleanupGuard};
pub use pipeline::input::{UploadBatch, UploadedFile};
pub use pipeline::llm::{CategorizeError, Categorizer, LlmCategorizer};
pub use pipeline::ocr::{OcrEngine, OcrError, TesseractEngine};
pub use pipeline::organize::BatchWorkspace;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use server::{router, serve, AppState, ServerConfig};
