//! Pipeline stages for sorting a batch of note images.
//!
//! Each submodule implements one step. [`crate::batch`] drives them in order
//! for every upload and owns the per-batch bookkeeping.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ organize::stage ──▶ ocr ──▶ llm ──▶ organize::place ──▶ archive ──▶ cleanup
//! (upload)  (batch dir)         (text)  (label) (category folder)   (zip)       (after send)
//! ```
//!
//! 1. [`input`]: the upload model; CLI paths and URLs resolved to bytes
//! 2. [`organize`]: the per-batch workspace, staging and the final move
//! 3. [`ocr`]: decode, normalise to PNG and run Tesseract
//! 4. [`llm`]: ask the model for one category label
//! 5. [`archive`]: zip the category tree; runs in `spawn_blocking`
//! 6. [`cleanup`]: remove the batch directory once the archive is sent

pub mod archive;
pub mod cleanup;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod organize;
