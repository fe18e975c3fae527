//! A model provider for OpenAI-compatible chat completion APIs.
//!
//! Requests are always sent with `stream: true`. The response body is read
//! as newline-delimited `data: <json>` lines until a `data: [DONE]` line or
//! the end of the body, and tool-call fragments are assembled by their
//! stream index before being handed to the caller.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use chatloop_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
};
use mime::Mime;
use reqwest::{Client, StatusCode, header};

pub use config::{
    ConfigError, DEFAULT_ENDPOINT, OpenAIConfig, OpenAIConfigBuilder,
    ResponseFormat,
};
use io::{Chunks, Lines};
pub use response::OpenAIResponse;

/// Error type for [`OpenAIProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
    status: Option<u16>,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            status: None,
        }
    }

    fn from_status(status: StatusCode, body: &str) -> Self {
        let kind = if status == StatusCode::TOO_MANY_REQUESTS {
            ErrorKind::RateLimitExceeded
        } else if status.is_server_error() {
            ErrorKind::Unavailable
        } else {
            ErrorKind::Rejected
        };
        Self {
            message: format!(
                "API error: {} {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or_default(),
                body.trim()
            ),
            kind,
            status: Some(status.as_u16()),
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the HTTP status code, if the server responded at all.
    #[inline]
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// OpenAI-compatible model provider.
#[derive(Clone, Debug)]
pub struct OpenAIProvider {
    client: Client,
    config: Arc<OpenAIConfig>,
}

impl OpenAIProvider {
    /// Creates a new `OpenAIProvider` with the given configuration.
    #[inline]
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }

    /// Returns the configuration of this provider.
    #[inline]
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }
}

impl ModelProvider for OpenAIProvider {
    type Error = Error;
    type Response = OpenAIResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let openai_req = proto::create_request(req, &self.config);
        let resp_fut = self
            .client
            .post(&self.config.endpoint)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream")
            .json(&openai_req)
            .send();

        async move {
            let resp = resp_fut.await.map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::Unavailable)
            })?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                error!("request failed with status {status}: {body}");
                return Err(Error::from_status(status, &body));
            }

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_event_stream = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| m.subtype().as_str() == "event-stream")
                .unwrap_or(false);
            if !is_event_stream {
                // Some compatible servers mislabel the stream, so keep
                // reading anyway.
                warn!("unexpected content type: {content_type:?}");
            }

            // Here we got a successful response.
            let lines = Lines::new(Chunks::from_response(resp));
            Ok(OpenAIResponse::from_lines(lines))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_status() {
        let err = Error::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            "{\"error\":\"slow down\"}\n",
        );
        assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        assert_eq!(err.status(), Some(429));
        assert_eq!(
            err.message(),
            "API error: 429 Too Many Requests - {\"error\":\"slow down\"}"
        );

        let err = Error::from_status(StatusCode::BAD_GATEWAY, "");
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        let err = Error::from_status(StatusCode::UNAUTHORIZED, "bad key");
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert!(!err.kind().is_retryable());
    }
}
