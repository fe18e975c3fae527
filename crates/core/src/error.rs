use chatloop_model::ModelProviderError;
use thiserror::Error;

/// Error returned by [`Agent`](crate::Agent) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The model request failed, after any configured retries.
    #[error("model request failed: {0}")]
    Model(Box<dyn ModelProviderError>),
    /// A tool result message does not answer any tool call issued by the
    /// model, or answers one that has already been answered.
    #[error("tool result `{0}` does not match any pending tool call")]
    UnmatchedToolResult(String),
    /// A tool call issued by the model is left without a result, either
    /// at the end of the new messages or before another message.
    #[error("tool call `{0}` has no result")]
    UnansweredToolCall(String),
    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

/// Error returned when an [`AgentBuilder`](crate::AgentBuilder) holds an
/// invalid configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The round limit was set to zero.
    #[error("`max_rounds` must be at least 1")]
    ZeroMaxRounds,
}
