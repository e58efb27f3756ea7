//! Text extraction: decode an upload, normalise it to PNG, run OCR.
//!
//! Decoding happens here rather than in the OCR engine so a file that is not
//! an image is reported as [`FileError::Decode`] no matter which engine is
//! configured. The decoded image is re-encoded as PNG into the batch staging
//! directory because Tesseract only reads files, and not every build of it
//! understands every format the `image` crate accepts.
//!
//! Both decode and encode are CPU-bound and run on `spawn_blocking`; the
//! Tesseract child process is awaited asynchronously.

use crate::config::SortConfig;
use crate::error::FileError;
use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Failure inside an OCR engine.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine binary could not be started.
    #[error("could not run '{command}': {source}\nIs Tesseract installed and on PATH?")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine exited with a failure status.
    #[error("'{command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The engine did not finish in time.
    #[error("OCR timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Any other engine-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Something that turns an image file into text.
///
/// `image_path` always points to a PNG. `file_name` is the upload's original
/// name, for logging.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, image_path: &Path, file_name: &str) -> Result<String, OcrError>;
}

/// OCR through the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    command: String,
    language: Option<String>,
    psm: Option<u8>,
    timeout: Duration,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TesseractEngine {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: None,
            psm: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &SortConfig) -> Self {
        Self {
            command: config.tesseract_cmd.clone(),
            language: config.ocr_language.clone(),
            psm: config.ocr_psm,
            timeout: Duration::from_secs(config.ocr_timeout_secs),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments passed to the binary for one image.
    fn args(&self, image_path: &Path) -> Vec<String> {
        let mut args = vec![image_path.to_string_lossy().into_owned(), "stdout".to_string()];
        if let Some(ref lang) = self.language {
            args.push("-l".to_string());
            args.push(lang.clone());
        }
        if let Some(psm) = self.psm {
            args.push("--psm".to_string());
            args.push(psm.to_string());
        }
        args
    }

    /// First line of `tesseract --version`, used as a startup check.
    pub async fn version(&self) -> Result<String, OcrError> {
        let output = self.run(&["--version".to_string()]).await?;
        // Older releases print the version banner on stderr.
        let text = if output.0.trim().is_empty() { output.1 } else { output.0 };
        Ok(text.lines().next().unwrap_or("").trim().to_string())
    }

    async fn run(&self, args: &[String]) -> Result<(String, String), OcrError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| OcrError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| OcrError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(OcrError::Failed {
                command: self.command.clone(),
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok((stdout, stderr))
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn extract_text(&self, image_path: &Path, file_name: &str) -> Result<String, OcrError> {
        debug!("tesseract {:?} ({})", self.args(image_path), file_name);
        let (stdout, _) = self.run(&self.args(image_path)).await?;
        Ok(stdout)
    }
}

/// The configured engine, or Tesseract built from the config.
pub fn resolve_engine(config: &SortConfig) -> Arc<dyn OcrEngine> {
    match config.ocr_engine {
        Some(ref engine) => Arc::clone(engine),
        None => Arc::new(TesseractEngine::from_config(config)),
    }
}

/// A decoded upload re-encoded as PNG in the staging directory.
///
/// The temp file is removed when this value is dropped.
pub struct NormalizedImage {
    pub file: NamedTempFile,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Decode `data` as an image and write it to `staging_dir` as PNG.
pub async fn normalize_image(
    data: Bytes,
    staging_dir: &Path,
    file_name: &str,
) -> Result<NormalizedImage, FileError> {
    let dir: PathBuf = staging_dir.to_path_buf();
    let name = file_name.to_string();

    tokio::task::spawn_blocking(move || normalize_blocking(&data, &dir, &name))
        .await
        .map_err(|e| FileError::Io {
            file: file_name.to_string(),
            detail: format!("decode task panicked: {e}"),
        })?
}

fn normalize_blocking(data: &[u8], dir: &Path, file_name: &str) -> Result<NormalizedImage, FileError> {
    let img = image::load_from_memory(data).map_err(|e| FileError::Decode {
        file: file_name.to_string(),
        detail: e.to_string(),
    })?;
    // PNG has no float sample formats.
    let img = if matches!(img, DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_)) {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        img
    };

    let io_err = |e: std::io::Error| FileError::Io {
        file: file_name.to_string(),
        detail: e.to_string(),
    };
    let file = tempfile::Builder::new()
        .prefix("ocr-")
        .suffix(".png")
        .tempfile_in(dir)
        .map_err(io_err)?;
    {
        let mut writer = BufWriter::new(file.as_file());
        img.write_to(&mut writer, ImageFormat::Png)
            .map_err(|e| FileError::Io {
                file: file_name.to_string(),
                detail: format!("PNG encoding failed: {e}"),
            })?;
        writer.flush().map_err(io_err)?;
    }

    debug!(
        "Decoded {} → {}x{} PNG at {}",
        file_name,
        img.width(),
        img.height(),
        file.path().display()
    );
    Ok(NormalizedImage {
        width: img.width(),
        height: img.height(),
        file,
    })
}

/// Decode, OCR and trim one upload.
///
/// Returns non-empty text, or the per-file error to record. All temp files
/// created here are gone by the time this returns.
pub async fn extract_text(
    engine: &dyn OcrEngine,
    data: Bytes,
    staging_dir: &Path,
    file_name: &str,
) -> Result<String, FileError> {
    let image = normalize_image(data, staging_dir, file_name).await?;

    let raw = engine
        .extract_text(image.path(), file_name)
        .await
        .map_err(|e| FileError::Ocr {
            file: file_name.to_string(),
            detail: e.to_string(),
        })?;

    let text = raw.trim();
    if text.is_empty() {
        return Err(FileError::EmptyText {
            file: file_name.to_string(),
        });
    }
    debug!("{}: {} chars of text ({}x{})", file_name, text.len(), image.width, image.height);
    Ok(text.to_string())
}
