//! Configuration types for product-photo extraction.
//!
//! All pipeline behaviour is controlled through [`AutofillConfig`], built via
//! its [`AutofillConfigBuilder`] or layered from the process environment with
//! [`AutofillConfig::from_env`]. The config is immutable once built and cheap
//! to clone, so concurrent requests each hold their own copy.

use crate::error::AutofillError;
use crate::schema::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Env var holding the inference service credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Env var overriding the model identifier.
pub const MODEL_ENV: &str = "AUTOFILL_MODEL";
/// Env var overriding the inference endpoint.
pub const ENDPOINT_ENV: &str = "AUTOFILL_ENDPOINT";

pub const DEFAULT_MODEL: &str = "gpt-4o-2024-08-06";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/responses";
pub const DEFAULT_MIME: &str = "image/png";

/// Configuration for an extraction.
///
/// # Example
/// ```rust
/// use autofill_gateway::{AutofillConfig, ErrorMode};
///
/// let config = AutofillConfig::builder()
///     .api_key("sk-test")
///     .model("gpt-4o-mini")
///     .error_mode(ErrorMode::Terse)
///     .build()
///     .unwrap();
/// assert_eq!(config.api_timeout_secs, 30);
/// ```
#[derive(Clone)]
pub struct AutofillConfig {
    /// Bearer credential for the inference service.
    ///
    /// `None` is allowed at build time; every extraction then fails with
    /// [`AutofillError::MissingCredential`] before touching the network.
    pub api_key: Option<String>,

    /// Inference model identifier. Default: `gpt-4o-2024-08-06`.
    pub model: String,

    /// Inference endpoint URL. Default: the OpenAI Responses API.
    pub endpoint: String,

    /// Custom instruction text. If None, uses [`crate::prompts::DEFAULT_INSTRUCTIONS`].
    pub instructions: Option<String>,

    /// MIME type used when neither the caller nor the image server declares one.
    /// Default: `image/png`.
    pub default_mime: String,

    /// Timeout for remote image downloads in seconds. Default: 20.
    pub download_timeout_secs: u64,

    /// Timeout for the inference call in seconds. Default: 30.
    pub api_timeout_secs: u64,

    /// Sampling temperature. Default: `Some(0.0)`; `None` omits the field.
    pub temperature: Option<f32>,

    /// How failures are rendered for callers. Default: [`ErrorMode::Diagnostic`].
    pub error_mode: ErrorMode,

    /// What to do with text values longer than their schema limit.
    /// Default: [`LengthPolicy::Truncate`].
    pub length_policy: LengthPolicy,

    /// Shape the inference service is asked to produce. Default: [`SchemaLayout::Nested`].
    pub schema_layout: SchemaLayout,

    /// Schema version requested from the registry. Default: `"1.0"`.
    pub schema_version: String,
}

impl Default for AutofillConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            instructions: None,
            default_mime: DEFAULT_MIME.to_string(),
            download_timeout_secs: 20,
            api_timeout_secs: 30,
            temperature: Some(0.0),
            error_mode: ErrorMode::default(),
            length_policy: LengthPolicy::default(),
            schema_layout: SchemaLayout::default(),
            schema_version: SCHEMA_VERSION.to_string(),
        }
    }
}

impl fmt::Debug for AutofillConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutofillConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("instructions", &self.instructions.as_ref().map(|s| s.len()))
            .field("default_mime", &self.default_mime)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("temperature", &self.temperature)
            .field("error_mode", &self.error_mode)
            .field("length_policy", &self.length_policy)
            .field("schema_layout", &self.schema_layout)
            .field("schema_version", &self.schema_version)
            .finish()
    }
}

impl AutofillConfig {
    /// Create a new builder for `AutofillConfig`.
    pub fn builder() -> AutofillConfigBuilder {
        AutofillConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overlaid with `OPENAI_API_KEY`, `AUTOFILL_MODEL` and
    /// `AUTOFILL_ENDPOINT`. Empty variables are treated as unset.
    pub fn from_env() -> Self {
        Self::builder().with_env().config
    }

    /// The credential, or the configuration error every request must fail with.
    pub fn require_api_key(&self) -> Result<&str, AutofillError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(AutofillError::MissingCredential {
                var: API_KEY_ENV.to_string(),
            }),
        }
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Builder for [`AutofillConfig`].
#[derive(Debug)]
pub struct AutofillConfigBuilder {
    config: AutofillConfig,
}

impl AutofillConfigBuilder {
    /// Fill credential, model and endpoint from the environment.
    pub fn with_env(mut self) -> Self {
        if let Some(key) = non_empty_env(API_KEY_ENV) {
            self.config.api_key = Some(key);
        }
        if let Some(model) = non_empty_env(MODEL_ENV) {
            self.config.model = model;
        }
        if let Some(endpoint) = non_empty_env(ENDPOINT_ENV) {
            self.config.endpoint = endpoint;
        }
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.config.instructions = Some(text.into());
        self
    }

    pub fn default_mime(mut self, mime: impl Into<String>) -> Self {
        self.config.default_mime = mime.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn temperature(mut self, t: Option<f32>) -> Self {
        self.config.temperature = t.map(|t| t.clamp(0.0, 2.0));
        self
    }

    pub fn error_mode(mut self, mode: ErrorMode) -> Self {
        self.config.error_mode = mode;
        self
    }

    pub fn length_policy(mut self, policy: LengthPolicy) -> Self {
        self.config.length_policy = policy;
        self
    }

    pub fn schema_layout(mut self, layout: SchemaLayout) -> Self {
        self.config.schema_layout = layout;
        self
    }

    pub fn schema_version(mut self, version: impl Into<String>) -> Self {
        self.config.schema_version = version.into();
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// A missing credential is not a build error: it is reported per request.
    pub fn build(self) -> Result<AutofillConfig, AutofillError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(AutofillError::InvalidConfig("model must not be empty".into()));
        }
        match reqwest::Url::parse(&c.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(AutofillError::InvalidConfig(format!(
                    "endpoint must be an absolute http(s) URL, got '{}'",
                    c.endpoint
                )))
            }
        }
        if c.default_mime.trim().is_empty() {
            return Err(AutofillError::InvalidConfig(
                "default MIME type must not be empty".into(),
            ));
        }
        if c.download_timeout_secs == 0 || c.api_timeout_secs == 0 {
            return Err(AutofillError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.schema_version != SCHEMA_VERSION {
            return Err(AutofillError::UnsupportedSchemaVersion {
                version: c.schema_version.clone(),
            });
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How stage failures are rendered in a [`crate::output::GatewayResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// JSON body `{"stage", "message", "status"}`. (default)
    #[default]
    Diagnostic,
    /// Plain-text body carrying only the message.
    Terse,
}

/// Local enforcement of per-field character limits on structured results.
///
/// The inference service is instructed to respect the limits but cannot
/// guarantee them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthPolicy {
    /// Return upstream values untouched.
    Trust,
    /// Cut overlong values to their limit and replace line breaks with spaces. (default)
    #[default]
    Truncate,
    /// Fail the request with a `response_parse` error naming the field.
    ///
    /// This widens `response_parse` beyond undecodable bodies: a decoded
    /// reply whose text breaks a limit is also a reply the gateway cannot
    /// use, and the status stays 502.
    Reject,
}

/// Shape of the structured object requested from the inference service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaLayout {
    /// `step2.productInformation.group1.productName` becomes nested objects. (default)
    #[default]
    Nested,
    /// `{ "schema_version", "fields": { "<dotted.path>": value } }`.
    Flat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = AutofillConfig::default();
        assert_eq!(c.model, DEFAULT_MODEL);
        assert_eq!(c.default_mime, "image/png");
        assert_eq!(c.download_timeout_secs, 20);
        assert_eq!(c.api_timeout_secs, 30);
        assert_eq!(c.error_mode, ErrorMode::Diagnostic);
        assert_eq!(c.length_policy, LengthPolicy::Truncate);
        assert_eq!(c.schema_layout, SchemaLayout::Nested);
    }

    #[test]
    fn missing_key_is_reported_per_request() {
        let c = AutofillConfig::builder().build().unwrap();
        let err = c.require_api_key().unwrap_err();
        assert!(matches!(err, AutofillError::MissingCredential { .. }));

        let c = AutofillConfig::builder().api_key("   ").build().unwrap();
        assert!(c.require_api_key().is_err());

        let c = AutofillConfig::builder().api_key("sk-x").build().unwrap();
        assert_eq!(c.require_api_key().unwrap(), "sk-x");
    }

    #[test]
    fn build_rejects_bad_endpoint() {
        let err = AutofillConfig::builder()
            .endpoint("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, AutofillError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_unknown_schema_version() {
        let err = AutofillConfig::builder()
            .schema_version("2.0")
            .build()
            .unwrap_err();
        assert!(matches!(err, AutofillError::UnsupportedSchemaVersion { .. }));
    }

    #[test]
    fn debug_redacts_key() {
        let c = AutofillConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn temperature_is_clamped() {
        let c = AutofillConfig::builder()
            .temperature(Some(5.0))
            .build()
            .unwrap();
        assert_eq!(c.temperature, Some(2.0));
    }
}
