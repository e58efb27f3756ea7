//! Configuration types for sorting a batch of note images.
//!
//! All pipeline behaviour is controlled through [`SortConfig`], built via its
//! [`SortConfigBuilder`]. Collaborators (the OCR engine, the categoriser, a
//! progress sink) are injected here too, so tests and embedders can swap any
//! of them without touching the pipeline.

use crate::category::{sanitize_segment, DEFAULT_MAX_CATEGORIES, DEFAULT_MAX_LABEL_CHARS};
use crate::error::SortError;
use crate::pipeline::llm::Categorizer;
use crate::pipeline::ocr::OcrEngine;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Folder name of the category tree inside each batch directory.
pub const DEFAULT_TREE_NAME: &str = "Organized Notes";

/// File name of the archive, also used as the download file name.
pub const DEFAULT_ARCHIVE_NAME: &str = "organized_notes.zip";

/// Label the model is told to use when nothing fits.
pub const DEFAULT_FALLBACK_CATEGORY: &str = "Other";

/// Configuration for sorting one batch.
///
/// Built via [`SortConfig::builder()`] or using [`SortConfig::default()`].
///
/// # Example
/// ```rust
/// use notesort::{CollisionPolicy, SortConfig};
///
/// let config = SortConfig::builder()
///     .work_dir("/tmp/notesort")
///     .model("gemini-2.0-flash")
///     .collision(CollisionPolicy::Rename)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct SortConfig {
    /// Root holding one `batch-<uuid>` directory per batch in flight.
    /// Default: `$TMPDIR/notesort`.
    pub work_dir: PathBuf,

    /// Name of the category tree folder inside a batch. Default: "Organized Notes".
    pub tree_name: String,

    /// Name of the archive file inside a batch. Default: "organized_notes.zip".
    pub archive_name: String,

    /// Category used when the model's answer is unusable or the set is full.
    /// Default: "Other".
    pub fallback_category: String,

    /// Upper bound on categories per batch, caller-supplied ones included.
    /// Default: 64.
    ///
    /// Once reached, unknown labels from the model are routed to
    /// `fallback_category` instead of creating more folders.
    pub max_categories: usize,

    /// Maximum length (chars) of a category folder name. Default: 64.
    pub max_label_chars: usize,

    /// What to do when two uploads with the same name land in one folder.
    /// Default: [`CollisionPolicy::Overwrite`].
    pub collision: CollisionPolicy,

    /// Add a JSON manifest of per-file outcomes to the archive. Default: true.
    pub include_manifest: bool,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-nano".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed categoriser. Takes precedence over every LLM setting.
    pub categorizer: Option<Arc<dyn Categorizer>>,

    /// Pre-constructed OCR engine. Takes precedence over the Tesseract settings.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Sampling temperature for classification. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may answer with. Default: 32.
    pub max_tokens: usize,

    /// Retry attempts on a failed categorisation call. Default: 0 (single shot).
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for the categorisation request in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Tesseract executable. Default: "tesseract".
    pub tesseract_cmd: String,

    /// Tesseract language pack(s), e.g. "eng" or "eng+deu". Default: None
    /// (Tesseract's own default).
    pub ocr_language: Option<String>,

    /// Tesseract page segmentation mode. Default: None.
    pub ocr_psm: Option<u8>,

    /// Per-image OCR timeout in seconds. Default: 60.
    pub ocr_timeout_secs: u64,

    /// Timeout for fetching URL inputs in `notesort sort`. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-file progress sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("notesort"),
            tree_name: DEFAULT_TREE_NAME.to_string(),
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            fallback_category: DEFAULT_FALLBACK_CATEGORY.to_string(),
            max_categories: DEFAULT_MAX_CATEGORIES,
            max_label_chars: DEFAULT_MAX_LABEL_CHARS,
            collision: CollisionPolicy::default(),
            include_manifest: true,
            model: None,
            provider_name: None,
            provider: None,
            categorizer: None,
            ocr_engine: None,
            temperature: 0.0,
            max_tokens: 32,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
            tesseract_cmd: "tesseract".to_string(),
            ocr_language: None,
            ocr_psm: None,
            ocr_timeout_secs: 60,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortConfig")
            .field("work_dir", &self.work_dir)
            .field("tree_name", &self.tree_name)
            .field("archive_name", &self.archive_name)
            .field("fallback_category", &self.fallback_category)
            .field("max_categories", &self.max_categories)
            .field("collision", &self.collision)
            .field("include_manifest", &self.include_manifest)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("categorizer", &self.categorizer.as_ref().map(|_| "<dyn Categorizer>"))
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("tesseract_cmd", &self.tesseract_cmd)
            .field("ocr_language", &self.ocr_language)
            .finish()
    }
}

impl SortConfig {
    /// Create a new builder for `SortConfig`.
    pub fn builder() -> SortConfigBuilder {
        SortConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`SortConfig`].
#[derive(Debug)]
pub struct SortConfigBuilder {
    config: SortConfig,
}

impl SortConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn tree_name(mut self, name: impl Into<String>) -> Self {
        self.config.tree_name = name.into();
        self
    }

    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.config.archive_name = name.into();
        self
    }

    pub fn fallback_category(mut self, name: impl Into<String>) -> Self {
        self.config.fallback_category = name.into();
        self
    }

    pub fn max_categories(mut self, n: usize) -> Self {
        self.config.max_categories = n;
        self
    }

    pub fn max_label_chars(mut self, n: usize) -> Self {
        self.config.max_label_chars = n;
        self
    }

    pub fn collision(mut self, policy: CollisionPolicy) -> Self {
        self.config.collision = policy;
        self
    }

    pub fn include_manifest(mut self, v: bool) -> Self {
        self.config.include_manifest = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn categorizer(mut self, categorizer: Arc<dyn Categorizer>) -> Self {
        self.config.categorizer = Some(categorizer);
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn tesseract_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.config.tesseract_cmd = cmd.into();
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = Some(lang.into());
        self
    }

    pub fn ocr_psm(mut self, psm: u8) -> Self {
        self.config.ocr_psm = Some(psm);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SortConfig, SortError> {
        let c = &self.config;
        if c.max_categories == 0 {
            return Err(SortError::InvalidConfig(
                "max_categories must be ≥ 1".into(),
            ));
        }
        if c.max_label_chars == 0 {
            return Err(SortError::InvalidConfig(
                "max_label_chars must be ≥ 1".into(),
            ));
        }
        for (field, value) in [
            ("tree_name", &c.tree_name),
            ("archive_name", &c.archive_name),
            ("fallback_category", &c.fallback_category),
        ] {
            if sanitize_segment(value, usize::MAX) != *value || value.is_empty() {
                return Err(SortError::InvalidConfig(format!(
                    "{field} must be a plain file name, got {value:?}"
                )));
            }
        }
        if c.tree_name == c.archive_name {
            return Err(SortError::InvalidConfig(
                "tree_name and archive_name must differ".into(),
            ));
        }
        if c.ocr_timeout_secs == 0 || c.api_timeout_secs == 0 || c.download_timeout_secs == 0 {
            return Err(SortError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Behaviour when an upload's name already exists in its category folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Replace the existing file. (default)
    #[default]
    Overwrite,
    /// Keep both: store the newcomer as `name (1).ext`, `name (2).ext`, …
    Rename,
}
