//! Shared fakes for the integration tests.
//!
//! OCR and categorisation are scripted: the OCR fake returns text keyed by
//! upload name, the categoriser returns a label keyed by that text. Images
//! are real PNGs so decoding runs for real.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use notesort::{CategorizeError, Categorizer, OcrEngine, OcrError, SortConfig};
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Route library logs to the test harness; `RUST_LOG=notesort=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn png_bytes() -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

/// Returns the scripted text for an upload name, or nothing.
#[derive(Default)]
pub struct ScriptedOcr {
    texts: HashMap<String, String>,
}

impl ScriptedOcr {
    pub fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            texts: pairs
                .iter()
                .map(|(name, text)| (name.to_string(), text.to_string()))
                .collect(),
        })
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    async fn extract_text(&self, image_path: &Path, file_name: &str) -> Result<String, OcrError> {
        assert!(image_path.exists());
        Ok(self.texts.get(file_name).cloned().unwrap_or_default())
    }
}

/// Puts a directory where the batch archive will be written, so zipping
/// fails after every file has been sorted. Returns `text` for every upload.
pub struct ArchiveBlockingOcr {
    pub text: &'static str,
}

#[async_trait]
impl OcrEngine for ArchiveBlockingOcr {
    async fn extract_text(&self, image_path: &Path, _file_name: &str) -> Result<String, OcrError> {
        // <batch>/.staging/<image>
        let batch_dir = image_path.parent().and_then(Path::parent).unwrap();
        std::fs::create_dir_all(batch_dir.join("organized_notes.zip")).unwrap();
        Ok(self.text.to_string())
    }
}

/// Returns the scripted label for a text; unknown text is an API error.
/// Records the category list offered on every call.
#[derive(Default)]
pub struct ScriptedCategorizer {
    labels: HashMap<String, String>,
    pub offered: Mutex<Vec<Vec<String>>>,
}

impl ScriptedCategorizer {
    pub fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            labels: pairs
                .iter()
                .map(|(text, label)| (text.to_string(), label.to_string()))
                .collect(),
            offered: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.offered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Categorizer for ScriptedCategorizer {
    async fn categorize(&self, text: &str, categories: &[String]) -> Result<String, CategorizeError> {
        self.offered.lock().unwrap().push(categories.to_vec());
        self.labels
            .get(text)
            .cloned()
            .ok_or_else(|| CategorizeError::Api {
                attempts: 1,
                message: "429 quota exceeded".to_string(),
            })
    }
}

pub fn config(
    work_dir: &Path,
    ocr: Arc<dyn OcrEngine>,
    categorizer: Arc<ScriptedCategorizer>,
) -> SortConfig {
    init_tracing();
    SortConfig::builder()
        .work_dir(work_dir)
        .ocr_engine(ocr)
        .categorizer(categorizer)
        .build()
        .unwrap()
}

/// Entry names of a zip, in stored order.
pub fn zip_entries<R: Read + Seek>(reader: R) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(reader).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

/// `batch-*` directories currently under the work root.
pub fn batch_dirs(work_dir: &Path) -> Vec<String> {
    std::fs::read_dir(work_dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.starts_with("batch-"))
                .collect()
        })
        .unwrap_or_default()
}

/// Wait up to two seconds for background cleanup to empty the work root.
pub async fn wait_for_cleanup(work_dir: &Path) -> bool {
    for _ in 0..100 {
        if batch_dirs(work_dir).is_empty() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}
