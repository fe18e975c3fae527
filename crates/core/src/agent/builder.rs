use std::sync::Arc;

use chatloop_model::{ModelProvider, ToolCallRequest};

use super::{Agent, ToolCallCallback, TranscriptCallback, TranscriptSource};
use crate::error::ConfigError;
use crate::model_client::ModelClient;
use crate::tool::{Registry, Tool};

/// The round limit used when none is configured.
pub const DEFAULT_MAX_ROUNDS: u32 = 16;

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) system_prompt: Option<String>,
    pub(crate) registry: Registry,
    pub(crate) auto_run_tools: bool,
    pub(crate) max_rounds: u32,
    pub(crate) max_retries: u32,
    pub(crate) on_transcript: Option<TranscriptCallback>,
    pub(crate) on_tool_call: Option<ToolCallCallback>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: None,
            registry: Registry::new(),
            auto_run_tools: true,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_retries: 0,
            on_transcript: None,
            on_tool_call: None,
        }
    }

    /// Sets the system prompt, which becomes the first message of the
    /// conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.registry.register(tool);
        self
    }

    /// Sets whether tool calls are executed automatically. Enabled by
    /// default.
    ///
    /// When disabled, the agent stops with
    /// [`Outcome::PendingToolCalls`](super::Outcome::PendingToolCalls)
    /// whenever the model requests tool calls.
    #[inline]
    pub fn with_auto_run_tools(mut self, auto_run_tools: bool) -> Self {
        self.auto_run_tools = auto_run_tools;
        self
    }

    /// Sets the maximum number of rounds per `start` call, which is
    /// [`DEFAULT_MAX_ROUNDS`] by default.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Sets how many times a failed model request is sent again when the
    /// error is retryable. No retries by default.
    #[inline]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attaches a callback to be invoked with streamed assistant content
    /// and tool results.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Arc::new(on_transcript));
        self
    }

    /// Attaches a callback to be invoked with every tool call the model
    /// requests, whether or not it is run automatically.
    #[inline]
    pub fn on_tool_call(
        mut self,
        on_tool_call: impl Fn(&ToolCallRequest) + Send + Sync + 'static,
    ) -> Self {
        self.on_tool_call = Some(Arc::new(on_tool_call));
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Result<Agent, ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::ZeroMaxRounds);
        }
        Ok(Agent::from_builder(self))
    }
}
