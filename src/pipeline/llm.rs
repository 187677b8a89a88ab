//! Model interaction: the [`InferenceClient`] seam and its implementations.
//!
//! All prompt engineering lives in [`crate::prompts`]; this module only turns
//! (prompt, page images) into raw text and classifies failures.
//!
//! ## Retry strategy
//!
//! [`LlmInferenceClient`] never retries. Retries belong to the caller and are
//! layered on with [`RetryingClient`]: exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`), and only for errors where a retry can
//! help. A rejected API key or an oversized payload fails identically on
//! every attempt, so those surface immediately.

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, InferenceError};
use crate::output::PageImage;
use crate::prompts::{JSON_MODE_HINT, SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Raw model reply plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceResponse {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Sends one prompt with an ordered set of page images to a generative model.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        pages: &[PageImage],
    ) -> Result<InferenceResponse, InferenceError>;

    /// Label used in configuration errors.
    fn provider_label(&self) -> &str {
        "llm"
    }
}

/// [`InferenceClient`] backed by an edgequake-llm provider.
pub struct LlmInferenceClient {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
    json_mode: bool,
    timeout_secs: u64,
}

impl LlmInferenceClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AnalysisConfig) -> Self {
        Self {
            provider,
            label: config
                .provider_name
                .clone()
                .unwrap_or_else(|| "auto".to_string()),
            options: build_options(config),
            json_mode: config.json_mode,
            timeout_secs: config.api_timeout_secs,
        }
    }

    /// Message layout: system prompt, optional JSON-mode hint, then one user
    /// turn carrying the instructions and every page image in order.
    fn build_messages(&self, prompt: &str, pages: &[PageImage]) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        if self.json_mode {
            messages.push(ChatMessage::system(JSON_MODE_HINT));
        }
        let images = pages.iter().map(|p| p.image.clone()).collect();
        messages.push(ChatMessage::user_with_images(prompt, images));
        messages
    }
}

#[async_trait]
impl InferenceClient for LlmInferenceClient {
    async fn generate(
        &self,
        prompt: &str,
        pages: &[PageImage],
    ) -> Result<InferenceResponse, InferenceError> {
        let start = Instant::now();
        let messages = self.build_messages(prompt, pages);

        let response = match timeout(
            Duration::from_secs(self.timeout_secs),
            self.provider.chat(&messages, Some(&self.options)),
        )
        .await
        {
            Err(_) => {
                return Err(InferenceError::Timeout {
                    secs: self.timeout_secs,
                })
            }
            Ok(Err(e)) => return Err(InferenceError::classify(e.to_string())),
            Ok(Ok(response)) => response,
        };

        debug!(
            "{} images: {} input tokens, {} output tokens, {:?}",
            pages.len(),
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if response.content.trim().is_empty() {
            return Err(InferenceError::EmptyResponse);
        }

        Ok(InferenceResponse {
            text: response.content,
            input_tokens: response.prompt_tokens as usize,
            output_tokens: response.completion_tokens as usize,
        })
    }

    fn provider_label(&self) -> &str {
        &self.label
    }
}

/// Caller-side retry wrapper around any [`InferenceClient`].
pub struct RetryingClient {
    inner: Arc<dyn InferenceClient>,
    max_retries: u32,
    backoff_ms: u64,
}

impl RetryingClient {
    pub fn new(inner: Arc<dyn InferenceClient>, max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            inner,
            max_retries,
            backoff_ms,
        }
    }
}

/// `base_ms * 2^(attempt-1)`, saturating.
fn backoff_delay(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt.saturating_sub(1))
        .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor))
}

#[async_trait]
impl InferenceClient for RetryingClient {
    async fn generate(
        &self,
        prompt: &str,
        pages: &[PageImage],
    ) -> Result<InferenceResponse, InferenceError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate(prompt, pages).await {
                Ok(r) => return Ok(r),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = backoff_delay(self.backoff_ms, attempt);
                    warn!(
                        "Inference attempt {} failed ({}); retry {}/{} after {}ms",
                        attempt, e, attempt, self.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn provider_label(&self) -> &str {
        self.inner.provider_label()
    }
}

/// Build `CompletionOptions` from the analysis config.
fn build_options(config: &AnalysisConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, AnalysisError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        AnalysisError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. pre-built `config.provider`;
/// 2. `config.provider_name` (+ `config.model`);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. `ProviderFactory::from_env()` auto-detection.
pub async fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, AnalysisError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(default_model("openai"));
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| AnalysisError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Vision-capable default per provider; long-context models for whole bundles.
fn default_model(provider: &str) -> &'static str {
    match provider {
        "gemini" | "google" => "gemini-2.0-flash",
        "anthropic" => "claude-sonnet-4-20250514",
        _ => "gpt-4.1-mini",
    }
}

/// Resolve the provider and wrap it with the configured retry policy.
pub async fn build_client(config: &AnalysisConfig) -> Result<Arc<dyn InferenceClient>, AnalysisError> {
    let provider = resolve_provider(config).await?;
    let base: Arc<dyn InferenceClient> = Arc::new(LlmInferenceClient::new(provider, config));
    Ok(Arc::new(RetryingClient::new(
        base,
        config.max_retries,
        config.retry_backoff_ms,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Flaky {
        calls: AtomicUsize,
        script: Mutex<Vec<Result<InferenceResponse, InferenceError>>>,
    }

    impl Flaky {
        fn new(mut script: Vec<Result<InferenceResponse, InferenceError>>) -> Self {
            script.reverse();
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl InferenceClient for Flaky {
        async fn generate(
            &self,
            _prompt: &str,
            _pages: &[PageImage],
        ) -> Result<InferenceResponse, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(InferenceError::EmptyResponse))
        }
    }

    fn ok(text: &str) -> Result<InferenceResponse, InferenceError> {
        Ok(InferenceResponse {
            text: text.into(),
            ..Default::default()
        })
    }

    #[test]
    fn build_options_defaults() {
        let config = AnalysisConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let inner = Arc::new(Flaky::new(vec![
            Err(InferenceError::RateLimited { detail: "429".into() }),
            Err(InferenceError::Timeout { secs: 1 }),
            ok("{}"),
        ]));
        let client = RetryingClient::new(inner.clone(), 2, 1);
        let r = client.generate("p", &[]).await.unwrap();
        assert_eq!(r.text, "{}");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay(500, 1), 500);
        assert_eq!(backoff_delay(500, 3), 2000);
        assert_eq!(backoff_delay(500, 64), u64::MAX);
        assert_eq!(backoff_delay(u64::MAX, 2), u64::MAX);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(Flaky::new(vec![
            Err(InferenceError::Transport { detail: "reset".into() }),
            Err(InferenceError::Transport { detail: "reset".into() }),
            ok("{}"),
        ]));
        let client = RetryingClient::new(inner.clone(), 1, 1);
        assert!(client.generate("p", &[]).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn credentials_are_never_retried() {
        let inner = Arc::new(Flaky::new(vec![
            Err(InferenceError::InvalidCredentials { detail: "401".into() }),
            ok("{}"),
        ]));
        let client = RetryingClient::new(inner.clone(), 3, 1);
        let err = client.generate("p", &[]).await.unwrap_err();
        assert!(matches!(err, InferenceError::InvalidCredentials { .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_models() {
        assert_eq!(default_model("gemini"), "gemini-2.0-flash");
        assert_eq!(default_model("openai"), "gpt-4.1-mini");
    }
}
