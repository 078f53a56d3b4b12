//! OpenAI-compatible provider client
//!
//! Model identifiers are routed to an endpoint by their `provider/` prefix
//! (or inferred from a bare model name) and called over the chat completions
//! API, streaming with server-sent events when latency is being measured.

use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Error as SseError, Event, EventSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ProviderConfig;

pub fn build_http_client(concurrency: usize) -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(concurrency.max(1) * 2)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_nodelay(true)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum ApiKey {
    Literal(String),
    Env(String),
    None,
}

#[derive(Debug, Clone, PartialEq)]
struct Provider {
    base_url: String,
    api_key: ApiKey,
}

/// A resolved call target for one model identifier
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub provider: String,
    pub base_url: String,
    /// Model name as the provider expects it (prefix stripped)
    pub model: String,
    api_key: ApiKey,
}

impl Endpoint {
    /// Reads the key when the call is made, so a missing key fails only that call
    pub fn api_key(&self) -> Result<Option<String>> {
        match &self.api_key {
            ApiKey::Literal(key) => Ok(Some(key.clone())),
            ApiKey::Env(var) => std::env::var(var).map(Some).map_err(|_| {
                anyhow!(
                    "API key for provider '{}' not found: environment variable {} is not set",
                    self.provider,
                    var
                )
            }),
            ApiKey::None => Ok(None),
        }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

const BUILTIN_PROVIDERS: &[(&str, &str, &str)] = &[
    ("openai", "https://api.openai.com/v1", "OPENAI_API_KEY"),
    ("anthropic", "https://api.anthropic.com/v1", "ANTHROPIC_API_KEY"),
    (
        "gemini",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        "GEMINI_API_KEY",
    ),
    ("groq", "https://api.groq.com/openai/v1", "GROQ_API_KEY"),
    ("mistral", "https://api.mistral.ai/v1", "MISTRAL_API_KEY"),
    ("together", "https://api.together.xyz/v1", "TOGETHER_API_KEY"),
    ("deepseek", "https://api.deepseek.com/v1", "DEEPSEEK_API_KEY"),
    ("openrouter", "https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
];

/// Maps provider names to endpoints
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Provider>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let providers = BUILTIN_PROVIDERS
            .iter()
            .map(|(name, base_url, key_env)| {
                (
                    name.to_string(),
                    Provider {
                        base_url: base_url.to_string(),
                        api_key: ApiKey::Env(key_env.to_string()),
                    },
                )
            })
            .collect();
        ProviderRegistry { providers }
    }
}

impl ProviderRegistry {
    /// Built-in providers overlaid with the configured ones
    pub fn with_overrides(overrides: &[ProviderConfig]) -> Self {
        let mut registry = ProviderRegistry::default();
        for p in overrides {
            let api_key = match (&p.api_key, &p.api_key_env) {
                (Some(key), _) if !key.is_empty() => ApiKey::Literal(key.clone()),
                (_, Some(var)) => ApiKey::Env(var.clone()),
                _ => ApiKey::None,
            };
            registry.providers.insert(
                p.name.clone(),
                Provider {
                    base_url: p.base_url.clone(),
                    api_key,
                },
            );
        }
        registry
    }

    pub fn resolve(&self, model_id: &str) -> Result<Endpoint> {
        let (provider_name, model) = match model_id.split_once('/') {
            Some((prefix, rest)) if self.providers.contains_key(prefix) => (prefix, rest),
            Some((prefix, _)) => {
                return Err(anyhow!(
                    "Unknown provider '{}' for model '{}'",
                    prefix,
                    model_id
                ))
            }
            None => (infer_provider(model_id), model_id),
        };

        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| anyhow!("Provider '{}' is not configured", provider_name))?;

        Ok(Endpoint {
            provider: provider_name.to_string(),
            base_url: provider.base_url.clone(),
            model: model.to_string(),
            api_key: provider.api_key.clone(),
        })
    }
}

fn infer_provider(model: &str) -> &'static str {
    if model.starts_with("claude") {
        "anthropic"
    } else if model.starts_with("gemini") {
        "gemini"
    } else {
        "openai"
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    // Usage in the final chunk, for providers that only send it on request
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    // Absent on some providers' closing chunk
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// ============================================================================
// Calls
// ============================================================================

/// What one streaming call produced
#[derive(Debug, Clone)]
pub struct StreamedCompletion {
    pub content: String,
    /// Time to the first non-empty content delta
    pub ttft: Option<Duration>,
    pub total_time: Duration,
    pub chunk_count: u32,
    /// Provider-reported token counts, when sent
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct ProviderClient {
    client: Client,
    registry: ProviderRegistry,
    timeout: Option<Duration>,
}

impl ProviderClient {
    pub fn new(client: Client, registry: ProviderRegistry, timeout: Option<Duration>) -> Self {
        ProviderClient {
            client,
            registry,
            timeout,
        }
    }

    fn request_builder(
        &self,
        endpoint: &Endpoint,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::RequestBuilder> {
        let mut req_builder = self
            .client
            .post(endpoint.completions_url())
            .header("Content-Type", "application/json");

        if let Some(timeout) = self.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        if let Some(api_key) = endpoint.api_key()? {
            if !api_key.is_empty() {
                req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
            }
        }

        Ok(req_builder.json(request))
    }

    /// One streaming chat completion with a single user message
    pub async fn stream_completion(
        &self,
        model_id: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<StreamedCompletion> {
        let endpoint = self.registry.resolve(model_id)?;
        let request = ChatCompletionRequest {
            model: endpoint.model.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens,
            stream: true,
            temperature: None,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };

        let start_time = Instant::now();
        let req_builder = self.request_builder(&endpoint, &request)?;
        let mut es = EventSource::new(req_builder)?;

        let mut first_token_time: Option<Instant> = None;
        let mut content = String::new();
        let mut chunk_count: u32 = 0;
        let mut usage: Option<Usage> = None;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("SSE connection opened for {}", model_id);
                }
                Ok(Event::Message(msg)) => {
                    let now = Instant::now();
                    chunk_count += 1;

                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<ChatCompletionChunk>(&msg.data) {
                        Ok(chunk) => {
                            // Usage may arrive in a final chunk with empty choices
                            if let Some(u) = chunk.usage {
                                usage = Some(u);
                            }

                            if let Some(choice) = chunk.choices.first() {
                                if let Some(delta) = &choice.delta.content {
                                    if !delta.is_empty() {
                                        if first_token_time.is_none() {
                                            first_token_time = Some(now);
                                        }
                                        content.push_str(delta);
                                    }
                                }

                                if choice.finish_reason.is_some() && usage.is_some() {
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            debug!("Failed to parse chunk: {} - {}", e, msg.data);
                        }
                    }
                }
                Err(SseError::StreamEnded) => break,
                Err(SseError::InvalidStatusCode(status, response)) => {
                    es.close();
                    let body = response.text().await.unwrap_or_default();
                    return Err(anyhow!("{} returned HTTP {}: {}", model_id, status, body));
                }
                Err(e) => {
                    es.close();
                    return Err(anyhow!("SSE error: {}", e));
                }
            }
        }
        es.close();

        if usage.is_none() {
            warn!(
                "No usage stats received for model '{}'; token counts fall back to word counts",
                model_id
            );
        }

        Ok(StreamedCompletion {
            content,
            ttft: first_token_time.map(|t| t.duration_since(start_time)),
            total_time: start_time.elapsed(),
            chunk_count,
            usage,
        })
    }

    /// Non-streaming chat completion returning the first choice's text
    pub async fn complete(
        &self,
        model_id: &str,
        messages: Vec<Message>,
        max_tokens: u32,
    ) -> Result<String> {
        let endpoint = self.registry.resolve(model_id)?;
        let request = ChatCompletionRequest {
            model: endpoint.model.clone(),
            messages,
            max_tokens,
            stream: false,
            temperature: Some(0.0),
            stream_options: None,
        };

        let response = self
            .request_builder(&endpoint, &request)?
            .send()
            .await
            .with_context(|| format!("request to {} failed", endpoint.completions_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned HTTP {}: {}", model_id, status, body));
        }

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .context("malformed chat completion response")?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("{} returned no content", model_id))
    }
}
