use std::fmt::Debug;

use serde::Serialize;
use thiserror::Error;

/// The endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// The output format the model is asked to produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free-form text.
    #[default]
    Text,
    /// A JSON object.
    JsonObject,
}

/// Error returned when a configuration is incomplete.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field was not set, or was set to an empty string.
    #[error("missing required configuration field `{0}`")]
    Missing(&'static str),
}

/// Builder for [`OpenAIConfig`].
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct OpenAIConfigBuilder {
    api_key: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
    response_format: ResponseFormat,
}

impl OpenAIConfigBuilder {
    /// Creates an empty builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Required.
    #[inline]
    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the model to use. Required.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the full URL of the chat completion endpoint.
    ///
    /// Defaults to [`DEFAULT_ENDPOINT`].
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the response format, [`ResponseFormat::Text`] by default.
    #[inline]
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<OpenAIConfig, ConfigError> {
        let api_key =
            non_empty(self.api_key).ok_or(ConfigError::Missing("api_key"))?;
        let model =
            non_empty(self.model).ok_or(ConfigError::Missing("model"))?;
        let endpoint = match self.endpoint {
            Some(endpoint) => non_empty(Some(endpoint))
                .ok_or(ConfigError::Missing("endpoint"))?,
            None => DEFAULT_ENDPOINT.to_owned(),
        };
        Ok(OpenAIConfig {
            api_key,
            model,
            endpoint,
            response_format: self.response_format,
        })
    }
}

#[inline]
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Debug for OpenAIConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIConfigBuilder")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("response_format", &self.response_format)
            .finish()
    }
}

/// Configuration for the OpenAI-compatible provider.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OpenAIConfig {
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) endpoint: String,
    pub(crate) response_format: ResponseFormat,
}

impl OpenAIConfig {
    /// Returns the model name.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the endpoint URL.
    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Debug for OpenAIConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("response_format", &self.response_format)
            .finish()
    }
}
