//! Model access: the one seam between the pipeline and the external LLM service.
//!
//! Every stage that talks to a model (vision summaries, entity extraction,
//! structuring, layout Markdown) does so through [`ModelClient`]. The
//! production implementation, [`EdgequakeClient`], forwards to
//! `edgequake_llm` providers; tests plug in scripted clients.
//!
//! Provider errors arrive as opaque messages. [`ModelError::classify`]
//! turns them into the shape the retry loop understands: rate limited,
//! failed with a status, or a transport failure.

use crate::config::ExtractionConfig;
use crate::error::DocStructError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default model when neither config nor environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Base64 image attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Base64-encoded bytes (no data-URI prefix).
    pub data: String,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
}

/// One request to the external model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Model identifier, e.g. `gpt-4.1-nano`.
    pub model: String,
    /// Optional system instruction.
    pub system: Option<String>,
    /// User prompt text.
    pub prompt: String,
    /// Optional image for vision requests.
    pub image: Option<ImagePayload>,
    /// Ask the model to answer with a single JSON object.
    pub json: bool,
}

impl ModelRequest {
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            image: None,
            json: false,
        }
    }

    pub fn vision(model: impl Into<String>, prompt: impl Into<String>, image: ImagePayload) -> Self {
        Self {
            image: Some(image),
            ..Self::text(model, prompt)
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Text content returned by the model plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelResponse {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl ModelResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Failure of a single model call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// HTTP 429 or an equivalent "slow down" signal.
    ///
    /// `retry_after` is set when the service supplied a structured delay;
    /// otherwise the retry policy parses `message`.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// The service answered with a non-success status.
    #[error("model API returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Network failure, decode failure, or an unclassified provider error.
    #[error("transport error: {0}")]
    Transport(String),
}

static RE_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^\s*|(?:status|http|code|error)[^0-9a-z]{0,12})([1-5]\d{2})\b").unwrap()
});

impl ModelError {
    /// Classify a provider error message.
    ///
    /// A `429` status (leading, or after status/HTTP/code/error wording),
    /// "rate limit" and "too many requests" mean rate limited; any other
    /// recognisable HTTP status becomes [`ModelError::Status`]; everything
    /// else is a transport failure. Bare numbers elsewhere in the message
    /// are ignored.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let status = RE_STATUS
            .captures(&message)
            .and_then(|c| c[1].parse::<u16>().ok());

        if status == Some(429)
            || lower.contains("rate limit")
            || lower.contains("ratelimit")
            || lower.contains("too many requests")
        {
            return ModelError::RateLimited {
                retry_after: None,
                message,
            };
        }

        match status {
            Some(status) if status >= 400 => ModelError::Status { status, message },
            _ => ModelError::Transport(message),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelError::RateLimited { .. })
    }
}

/// Anything that can answer a [`ModelRequest`].
///
/// Implementations must be cheap to share across concurrent stage tasks.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Instruction prepended when a request asks for JSON output.
const JSON_ONLY_INSTRUCTION: &str =
    "Respond with a single valid JSON value and nothing else. Do not wrap it in code fences.";

/// [`ModelClient`] backed by `edgequake_llm` providers.
///
/// Holds one provider per model identifier; requests for an unknown model
/// go to the fallback provider.
pub struct EdgequakeClient {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    fallback: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl EdgequakeClient {
    /// Wrap a single provider used for every model.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            providers: HashMap::new(),
            fallback: provider,
            temperature: 0.1,
            max_tokens: 4096,
        }
    }

    /// Route `model` to a dedicated provider.
    pub fn with_model(mut self, model: impl Into<String>, provider: Arc<dyn LLMProvider>) -> Self {
        self.providers.insert(model.into(), provider);
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn provider_for(&self, model: &str) -> &Arc<dyn LLMProvider> {
        self.providers.get(model).unwrap_or(&self.fallback)
    }
}

#[async_trait]
impl ModelClient for EdgequakeClient {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let mut messages = Vec::with_capacity(3);
        if request.json {
            messages.push(ChatMessage::system(JSON_ONLY_INSTRUCTION));
        }
        if let Some(ref system) = request.system {
            messages.push(ChatMessage::system(system.as_str()));
        }
        match request.image {
            Some(image) => {
                let data = ImageData::new(image.data, image.mime_type).with_detail("high");
                messages.push(ChatMessage::user_with_images(request.prompt.as_str(), vec![data]));
            }
            None => messages.push(ChatMessage::user(request.prompt.as_str())),
        }

        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider_for(&request.model)
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ModelError::classify(e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            request.model, response.prompt_tokens, response.completion_tokens
        );

        Ok(ModelResponse {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Resolve the model client, from most-specific to least-specific.
///
/// 1. **Pre-built client** (`config.client`): used as-is.
/// 2. **Named provider** (`config.provider_name`): one provider per
///    configured model via [`ProviderFactory::create_llm_provider`].
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key** (`OPENAI_API_KEY`) with the configured models.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Failing every step is a configuration error and halts the run before any
/// document is touched.
pub fn resolve_client(config: &ExtractionConfig) -> Result<Arc<dyn ModelClient>, DocStructError> {
    if let Some(ref client) = config.client {
        return Ok(Arc::clone(client));
    }

    if let Some(ref name) = config.provider_name {
        return named_client(name, config);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let provider = create_provider(&prov, &model)?;
            let client = EdgequakeClient::new(provider)
                .with_sampling(config.temperature, config.max_tokens);
            return Ok(Arc::new(client));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return named_client("openai", config);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DocStructError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(Arc::new(
        EdgequakeClient::new(llm_provider).with_sampling(config.temperature, config.max_tokens),
    ))
}

/// One provider per distinct configured model.
fn named_client(
    provider_name: &str,
    config: &ExtractionConfig,
) -> Result<Arc<dyn ModelClient>, DocStructError> {
    let text = create_provider(provider_name, &config.text_model)?;
    let mut client = EdgequakeClient::new(Arc::clone(&text))
        .with_model(config.text_model.clone(), text)
        .with_sampling(config.temperature, config.max_tokens);

    if config.vision_model != config.text_model {
        let vision = create_provider(provider_name, &config.vision_model)?;
        client = client.with_model(config.vision_model.clone(), vision);
    }

    Ok(Arc::new(client))
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DocStructError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DocStructError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_429_status() {
        let e = ModelError::classify("HTTP status 429: Too Many Requests");
        assert!(e.is_rate_limited());
    }

    #[test]
    fn classify_rate_limit_wording() {
        let e = ModelError::classify(
            "Rate limit reached for model llama-3.3-70b. Please try again in 7.66s.",
        );
        assert!(e.is_rate_limited());
    }

    #[test]
    fn classify_server_error() {
        match ModelError::classify("API error: status 503 service unavailable") {
            ModelError::Status { status, .. } => assert_eq!(status, 503),
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn classify_ignores_429_inside_other_numbers() {
        match ModelError::classify("invalid request: max_tokens 4290 exceeds limit (status 400)") {
            ModelError::Status { status, .. } => assert_eq!(status, 400),
            other => panic!("expected status error, got {other:?}"),
        }
        let e = ModelError::classify("request req_8f429c failed: connection closed");
        assert!(matches!(e, ModelError::Transport(_)));
    }

    #[test]
    fn classify_leading_429() {
        assert!(ModelError::classify("429: slow down").is_rate_limited());
    }

    #[test]
    fn classify_network_failure() {
        let e = ModelError::classify("connection reset by peer");
        assert!(matches!(e, ModelError::Transport(_)));
    }

    #[test]
    fn request_builders() {
        let req = ModelRequest::text("m", "hello").with_system("be brief").json();
        assert!(req.json);
        assert_eq!(req.system.as_deref(), Some("be brief"));
        assert!(req.image.is_none());

        let img = ImagePayload {
            data: "AAAA".into(),
            mime_type: "image/png".into(),
        };
        let req = ModelRequest::vision("v", "describe", img.clone());
        assert_eq!(req.image, Some(img));
        assert!(!req.json);
    }
}
