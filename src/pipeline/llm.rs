//! Remote model calls: chat completion, connection test, model listing.
//!
//! All network I/O for the remote API lives here. The session talks to the
//! model through the [`ChatBackend`] trait so tests can substitute a canned
//! reply; [`HttpChatBackend`] is the real OpenAI-compatible implementation.
//!
//! There is no retry loop. A failed call surfaces to the reviewer, who
//! decides whether to trigger the analysis again.

use crate::capability::CapabilityMap;
use crate::config::ApiConfig;
use crate::error::AideError;
use crate::pipeline::request::ExtractionRequest;
use crate::prompts::CONNECTION_TEST_MESSAGE;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sends a built request and returns the raw reply text.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ExtractionRequest) -> Result<String, AideError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    config: ApiConfig,
}

impl HttpChatBackend {
    pub fn new(config: ApiConfig) -> Result<Self, AideError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| AideError::Internal(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    async fn post_json(&self, body: &impl Serialize) -> Result<Value, AideError> {
        let endpoint = &self.config.endpoint;
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AideError::Network {
                endpoint: endpoint.clone(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| AideError::Network {
            endpoint: endpoint.clone(),
            detail: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(AideError::RemoteStatus {
                status: status.as_u16(),
                message: remote_error_message(status.as_u16(), &text),
            });
        }

        serde_json::from_str(&text).map_err(|e| AideError::Network {
            endpoint: endpoint.clone(),
            detail: format!("response body is not JSON: {e}"),
        })
    }

    /// Minimal completion to check endpoint, key and model. Never errors.
    pub async fn test_connection(&self) -> bool {
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": CONNECTION_TEST_MESSAGE}],
            "max_tokens": 5,
        });
        match self.post_json(&body).await {
            Ok(_) => {
                info!("Connection test succeeded for model {}", self.config.model);
                true
            }
            Err(e) => {
                warn!("Connection test failed: {e}");
                false
            }
        }
    }

    /// Fetch the model listing from `<base>/models`.
    pub async fn list_models(&self) -> Result<ModelListing, AideError> {
        let url = models_url(&self.config.endpoint);
        debug!("Fetching model listing from {url}");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| AideError::Network {
                endpoint: url.clone(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AideError::RemoteStatus {
                status: status.as_u16(),
                message: format!("HTTP {}", status.as_u16()),
            });
        }
        let body: Value = response.json().await.map_err(|e| AideError::Network {
            endpoint: url.clone(),
            detail: e.to_string(),
        })?;

        let listing = parse_model_listing(&body, self.config.is_openrouter());
        info!("Found {} models", listing.models.len());
        Ok(listing)
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn complete(&self, request: &ExtractionRequest) -> Result<String, AideError> {
        debug!(
            "Sending request to {} (model {}, max_tokens {:?})",
            self.config.endpoint, request.model, request.max_tokens
        );
        let body = self.post_json(request).await?;
        completion_content(&body)
    }
}

/// Pull `choices[0].message.content` out of a completion body.
pub fn completion_content(body: &Value) -> Result<String, AideError> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(AideError::EmptyCompletion)
}

/// The remote `error.message` when present, otherwise a generic status line.
pub fn remote_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("API request failed with status {status}"))
}

/// Listing URL for an endpoint: drop a trailing `/chat/completions`, add `/models`.
pub fn models_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    let base = base.strip_suffix("/chat/completions").unwrap_or(base);
    format!("{}/models", base.trim_end_matches('/'))
}

/// Strip the stale `:free` suffix older sessions stored with model ids.
pub fn normalize_model_id(model: &str) -> &str {
    model.strip_suffix(":free").unwrap_or(model)
}

/// One entry in the model picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub label: String,
    pub is_free: bool,
    pub prompt_price: f64,
    pub completion_price: f64,
    pub input_modalities: Vec<String>,
}

impl ModelInfo {
    pub fn prompt_price_label(&self) -> String {
        format_price_per_million(self.prompt_price)
    }

    pub fn completion_price_label(&self) -> String {
        format_price_per_million(self.completion_price)
    }
}

/// Parsed model listing: capability map plus picker entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelListing {
    pub capabilities: CapabilityMap,
    /// Free models first, then the rest, each group sorted by id.
    pub models: Vec<ModelInfo>,
}

impl ModelListing {
    pub fn contains(&self, id: &str) -> bool {
        self.models.iter().any(|m| m.id == id)
    }
}

/// Build a [`ModelListing`] from a `/models` response body.
///
/// Models count as free only on OpenRouter, where a zero price means it.
pub fn parse_model_listing(body: &Value, is_openrouter: bool) -> ModelListing {
    let empty = Vec::new();
    let data = body.get("data").and_then(Value::as_array).unwrap_or(&empty);

    let mut capabilities = CapabilityMap::new();
    let mut models = Vec::with_capacity(data.len());
    for m in data {
        let Some(id) = m.get("id").and_then(Value::as_str) else {
            continue;
        };
        let modalities: Vec<String> = m
            .pointer("/architecture/input_modalities")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        capabilities.insert(id.to_string(), modalities.clone());

        let prompt_price = price(m.pointer("/pricing/prompt"));
        let completion_price = price(m.pointer("/pricing/completion"));
        models.push(ModelInfo {
            id: id.to_string(),
            label: m
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(id)
                .to_string(),
            is_free: is_openrouter && prompt_price == 0.0 && completion_price == 0.0,
            prompt_price,
            completion_price,
            input_modalities: modalities,
        });
    }

    models.sort_by(|a, b| b.is_free.cmp(&a.is_free).then_with(|| a.id.cmp(&b.id)));
    ModelListing {
        capabilities,
        models,
    }
}

fn price(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Per-token price rendered per million tokens, e.g. `$3.00/M`.
pub fn format_price_per_million(per_token: f64) -> String {
    if per_token == 0.0 {
        return "$0".to_string();
    }
    let per_m = per_token * 1_000_000.0;
    if per_m < 0.01 {
        format!("${per_m:.4}/M")
    } else {
        format!("${per_m:.2}/M")
    }
}
