//! Completion service abstraction and implementations.
//!
//! Defines the [`CompletionService`] trait and concrete implementations:
//! - **[`DisabledCompletion`]**: fails every request; used when no provider
//!   is configured.
//! - **[`OpenAiCompletion`]**: streams from an OpenAI-compatible
//!   `/chat/completions` endpoint using server-sent events.
//!
//! A generation is a finite, non-restartable stream of text fragments
//! delivered over a [`tokio::sync::mpsc`] channel. Dropping the receiver
//! stops the producer task, which in turn drops the HTTP response.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use ragchat::config::CompletionConfig;
//! # use ragchat::completion::create_provider;
//! let config = CompletionConfig::default(); // provider = "disabled"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.name(), "disabled");
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use futures_util::StreamExt;
use ragchat_core::error::RagError;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::CompletionConfig;

/// Per-request generation parameters, opaque to the retrieval core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub model: String,
}

impl From<&CompletionConfig> for GenerationSettings {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            model: config.model.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Receiver side of a generation.
pub type TokenStream = mpsc::Receiver<Result<String, RagError>>;

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Provider identifier (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Start generating a reply to `prompt`.
    ///
    /// Errors before the first token are returned directly; errors after
    /// streaming has begun arrive as the final item of the stream.
    async fn generate(
        &self,
        prompt: &[Message],
        settings: &GenerationSettings,
    ) -> Result<TokenStream, RagError>;
}

// ============ Disabled Provider ============

pub struct DisabledCompletion;

#[async_trait]
impl CompletionService for DisabledCompletion {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _prompt: &[Message],
        _settings: &GenerationSettings,
    ) -> Result<TokenStream, RagError> {
        Err(RagError::GenerationFailure(
            "completion provider is disabled; set completion.provider in the config".to_string(),
        ))
    }
}

// ============ OpenAI-compatible Provider ============

/// Streams chat completions from an OpenAI-compatible API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiCompletion {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompletion {
    pub fn new(config: &CompletionConfig) -> anyhow::Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(30)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        prompt: &[Message],
        settings: &GenerationSettings,
    ) -> Result<TokenStream, RagError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": settings.model,
            "messages": prompt,
            "max_tokens": settings.max_tokens,
            "temperature": settings.temperature,
            "stream": true,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(RagError::generation)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::GenerationFailure(format!(
                "completion API error {}: {}",
                status, text
            )));
        }
        debug!(model = %settings.model, "completion stream opened");

        let (tx, rx) = mpsc::channel(32);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(RagError::generation(e))).await;
                        return;
                    }
                };
                for event in decoder.push(&bytes) {
                    match event {
                        SseEvent::Done => return,
                        SseEvent::Data(data) => match delta_content(&data) {
                            Ok(Some(content)) => {
                                if tx.send(Ok(content)).await.is_err() {
                                    debug!("completion receiver dropped; stopping stream");
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(error = %e, "completion stream reported an error");
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        },
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Incremental `data:` line decoder; network chunks may split lines.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }
        events
    }
}

/// Pull `choices[0].delta.content` out of one stream payload.
fn delta_content(data: &str) -> Result<Option<String>, RagError> {
    let json: Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(_) => return Ok(None),
    };
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(RagError::GenerationFailure(message.to_string()));
    }
    Ok(json["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}

/// Create the appropriate [`CompletionService`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledCompletion`] |
/// | `"openai"` | [`OpenAiCompletion`] |
pub fn create_provider(config: &CompletionConfig) -> anyhow::Result<Arc<dyn CompletionService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAiCompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
