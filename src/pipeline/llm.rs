//! Categorisation: ask a language model which folder a note belongs in.
//!
//! The pipeline only sees the [`Categorizer`] trait. [`LlmCategorizer`] is the
//! production implementation on top of an `edgequake_llm` provider; prompt
//! wording lives in [`crate::prompts`].
//!
//! ## Provider resolution
//!
//! The provider is resolved lazily on the first call, not at construction.
//! A missing API key therefore shows up as a per-file
//! [`crate::error::FileError::RemoteService`] instead of preventing the
//! server from starting.
//!
//! ## Retry Strategy
//!
//! `max_retries` defaults to 0: one request per file. When raised, failed
//! attempts back off exponentially (`retry_backoff_ms * 2^attempt`).

use crate::config::SortConfig;
use crate::prompts::{categorize_prompt, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, GeminiProvider, LLMProvider, ProviderFactory};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Default model when only a Gemini key is present.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Default model when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Variables holding a Gemini key, in lookup order.
pub const GEMINI_KEY_VARS: [&str; 3] = ["GEMINI_API_KEY", "GOOGLE_API_KEY", "GENAI_API_KEY"];

const NO_CREDENTIALS_HINT: &str = "No LLM credentials found. Set GEMINI_API_KEY (or GENAI_API_KEY), \
    OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.";

/// Failure of a categorisation request.
#[derive(Debug, Error)]
pub enum CategorizeError {
    /// No provider could be set up (missing key, unknown provider name).
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    NotConfigured { provider: String, hint: String },

    /// The provider returned an error on every attempt.
    #[error("LLM API error after {attempts} attempt(s): {message}")]
    Api { attempts: u32, message: String },

    /// The call did not finish within the per-call timeout.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Something that picks one label for a piece of text.
///
/// `categories` is the current category list in display form. The returned
/// label is raw model output; the caller cleans and resolves it.
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, text: &str, categories: &[String]) -> Result<String, CategorizeError>;
}

/// Settings copied out of [`SortConfig`] so the categoriser owns no trait
/// objects besides its provider.
#[derive(Debug, Clone)]
struct LlmSettings {
    model: Option<String>,
    provider_name: Option<String>,
    system_prompt: Option<String>,
    fallback: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

/// [`Categorizer`] backed by an `edgequake_llm` chat provider.
pub struct LlmCategorizer {
    provider: OnceCell<Arc<dyn LLMProvider>>,
    settings: LlmSettings,
}

impl LlmCategorizer {
    pub fn from_config(config: &SortConfig) -> Self {
        Self {
            provider: OnceCell::new_with(config.provider.clone()),
            settings: LlmSettings {
                model: config.model.clone(),
                provider_name: config.provider_name.clone(),
                system_prompt: config.system_prompt.clone(),
                fallback: config.fallback_category.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                max_retries: config.max_retries,
                retry_backoff_ms: config.retry_backoff_ms,
                api_timeout_secs: config.api_timeout_secs,
            },
        }
    }

    async fn provider(&self) -> Result<&Arc<dyn LLMProvider>, CategorizeError> {
        self.provider
            .get_or_try_init(|| async { resolve_provider(&self.settings) })
            .await
    }

    fn build_messages(&self, text: &str, categories: &[String]) -> Vec<ChatMessage> {
        let system_prompt = self
            .settings
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(categorize_prompt(text, categories, &self.settings.fallback)),
        ]
    }
}

#[async_trait]
impl Categorizer for LlmCategorizer {
    async fn categorize(&self, text: &str, categories: &[String]) -> Result<String, CategorizeError> {
        let provider = self.provider().await?;
        let messages = self.build_messages(text, categories);
        let options = build_options(&self.settings);
        let call_timeout = Duration::from_secs(self.settings.api_timeout_secs);

        let mut last_err: Option<CategorizeError> = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let backoff = self.settings.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Categorisation retry {}/{} after {}ms",
                    attempt, self.settings.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(call_timeout, provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "Categorised: {:?} ({} input tokens, {} output tokens)",
                        response.content, response.prompt_tokens, response.completion_tokens
                    );
                    return Ok(response.content.trim().to_string());
                }
                Ok(Err(e)) => {
                    warn!("Categorisation attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(CategorizeError::Api {
                        attempts: attempt + 1,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!("Categorisation attempt {} timed out", attempt + 1);
                    last_err = Some(CategorizeError::Timeout {
                        secs: self.settings.api_timeout_secs,
                    });
                }
            }
        }

        Err(last_err.unwrap_or(CategorizeError::Api {
            attempts: 0,
            message: "Unknown error".to_string(),
        }))
    }
}

/// The configured categoriser, or an [`LlmCategorizer`] built from the config.
pub fn resolve_categorizer(config: &SortConfig) -> Arc<dyn Categorizer> {
    match config.categorizer {
        Some(ref c) => Arc::clone(c),
        None => Arc::new(LlmCategorizer::from_config(config)),
    }
}

/// Build `CompletionOptions` from the categoriser settings.
fn build_options(settings: &LlmSettings) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, CategorizeError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        CategorizeError::NotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Named provider + model** (`provider_name`): API key read by the
///    factory from the provider's usual variable.
/// 2. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 3. **Gemini key** (first of [`GEMINI_KEY_VARS`] that is set): gemini with
///    [`DEFAULT_GEMINI_MODEL`] unless a model is set.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Auto-detection answers with the `mock` provider when it finds nothing;
/// that is refused unless `EDGEQUAKE_LLM_PROVIDER=mock` asked for it.
/// A pre-built provider in the config never reaches this function; it
/// seeds the `OnceCell` directly.
fn resolve_provider(settings: &LlmSettings) -> Result<Arc<dyn LLMProvider>, CategorizeError> {
    if let Some(ref name) = settings.provider_name {
        let model = settings.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Some(key) = gemini_key(|k| std::env::var(k).ok()) {
        let model = settings.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
        debug!("Using gemini provider with model {}", model);
        return Ok(Arc::new(GeminiProvider::new(key).with_model(model)));
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| CategorizeError::NotConfigured {
            provider: "auto".to_string(),
            hint: format!("{NO_CREDENTIALS_HINT} Error: {e}"),
        })?;

    let mock_requested = std::env::var("EDGEQUAKE_LLM_PROVIDER")
        .map(|p| p.trim().eq_ignore_ascii_case("mock"))
        .unwrap_or(false);
    refuse_implicit_mock(llm_provider, mock_requested)
}

/// First non-empty Gemini key according to `lookup`.
fn gemini_key(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    GEMINI_KEY_VARS
        .iter()
        .filter_map(|k| lookup(*k))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn refuse_implicit_mock(
    provider: Arc<dyn LLMProvider>,
    mock_requested: bool,
) -> Result<Arc<dyn LLMProvider>, CategorizeError> {
    if provider.name() == "mock" && !mock_requested {
        return Err(CategorizeError::NotConfigured {
            provider: "auto".to_string(),
            hint: NO_CREDENTIALS_HINT.to_string(),
        });
    }
    Ok(provider)
}
