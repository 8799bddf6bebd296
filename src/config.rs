//! Configuration types for extraction sessions.
//!
//! Two independent knobs exist:
//!
//! * [`ApiConfig`] — where and how the remote model is called. Owned by the
//!   surrounding shell and treated as an immutable value per analysis call.
//! * [`ViewerConfig`] — how documents are rasterised and zoomed for review.
//!
//! Both are built through builders that validate on `build()`, so an invalid
//! endpoint or an inverted zoom range is caught before any work starts.

use crate::error::AideError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection settings for the remote chat-completions API.
///
/// # Example
/// ```rust
/// use aide_extract::ApiConfig;
///
/// let api = ApiConfig::builder()
///     .endpoint("https://openrouter.ai/api/v1/chat/completions")
///     .api_key("sk-or-...")
///     .model("openai/gpt-4.1-mini")
///     .max_tokens(4096)
///     .build()
///     .unwrap();
/// assert_eq!(api.max_tokens, Some(4096));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Full chat-completions URL, e.g. `https://api.openai.com/v1/chat/completions`.
    pub endpoint: String,

    /// Bearer token sent in the `Authorization` header.
    pub api_key: String,

    /// Model identifier forwarded verbatim in the request body.
    pub model: String,

    /// Output-length cap forwarded as `max_tokens`. `None` omits the field.
    ///
    /// Never clamped here; the remote API decides what it accepts.
    pub max_tokens: Option<u32>,

    /// Optional HTTP timeout for the analysis call. Default: none.
    ///
    /// Without it a slow model keeps the analysis in progress until the
    /// remote side resolves or rejects.
    pub request_timeout_secs: Option<u64>,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ApiConfig {
    /// Create a new builder for `ApiConfig`.
    pub fn builder() -> ApiConfigBuilder {
        ApiConfigBuilder {
            config: ApiConfig {
                endpoint: String::new(),
                api_key: String::new(),
                model: String::new(),
                max_tokens: None,
                request_timeout_secs: None,
            },
        }
    }

    /// True when the endpoint points at OpenRouter, whose model listing
    /// distinguishes free from paid models.
    pub fn is_openrouter(&self) -> bool {
        self.endpoint.contains("openrouter.ai")
    }
}

/// Builder for [`ApiConfig`].
#[derive(Debug)]
pub struct ApiConfigBuilder {
    config: ApiConfig,
}

impl ApiConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into().trim().to_string();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into().trim().to_string();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into().trim().to_string();
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = Some(n);
        self
    }

    pub fn max_tokens_opt(mut self, n: Option<u32>) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ApiConfig, AideError> {
        let c = &self.config;
        if !(c.endpoint.starts_with("http://") || c.endpoint.starts_with("https://")) {
            return Err(AideError::InvalidConfig(format!(
                "API endpoint must be an http(s) URL, got '{}'",
                c.endpoint
            )));
        }
        if c.api_key.is_empty() {
            return Err(AideError::InvalidConfig("API key is empty".into()));
        }
        if c.model.is_empty() {
            return Err(AideError::InvalidConfig(
                "No model selected. Pick one from the model listing.".into(),
            ));
        }
        if c.max_tokens == Some(0) {
            return Err(AideError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

/// Rasterisation and zoom settings for the document preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Scale factor applied once when rasterising each page. Default: 2.0.
    ///
    /// Pages are decoded a single time at this resolution; zoom only rescales
    /// the stored raster, so this bounds the sharpest zoom level that still
    /// looks crisp.
    pub base_scale: f32,

    /// Cap on either rendered dimension in pixels. Default: 4000.
    pub max_rendered_pixels: u32,

    /// Zoom increment in percent. Default: 15.
    pub zoom_step_percent: u32,

    /// Lowest zoom in percent. Default: 30.
    pub zoom_min_percent: u32,

    /// Highest zoom in percent. Default: 250.
    pub zoom_max_percent: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_scale: 2.0,
            max_rendered_pixels: 4000,
            zoom_step_percent: 15,
            zoom_min_percent: 30,
            zoom_max_percent: 250,
        }
    }
}

impl ViewerConfig {
    /// Create a new builder for `ViewerConfig`.
    pub fn builder() -> ViewerConfigBuilder {
        ViewerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ViewerConfig`].
#[derive(Debug)]
pub struct ViewerConfigBuilder {
    config: ViewerConfig,
}

impl ViewerConfigBuilder {
    pub fn base_scale(mut self, scale: f32) -> Self {
        self.config.base_scale = scale.clamp(0.25, 8.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn zoom_step_percent(mut self, step: u32) -> Self {
        self.config.zoom_step_percent = step;
        self
    }

    pub fn zoom_range_percent(mut self, min: u32, max: u32) -> Self {
        self.config.zoom_min_percent = min;
        self.config.zoom_max_percent = max;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ViewerConfig, AideError> {
        let c = &self.config;
        if c.zoom_step_percent == 0 {
            return Err(AideError::InvalidConfig("Zoom step must be ≥ 1%".into()));
        }
        if c.zoom_min_percent == 0 || c.zoom_min_percent > 100 || c.zoom_max_percent < 100 {
            return Err(AideError::InvalidConfig(format!(
                "Zoom range must contain 100%, got {}–{}%",
                c.zoom_min_percent, c.zoom_max_percent
            )));
        }
        Ok(self.config)
    }
}
