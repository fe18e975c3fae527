use chatloop_core::tool::Tool;
use chatloop_core::{
    Agent, AgentBuilder, CancellationToken, ConfigError, Error, Outcome,
    TranscriptSource,
};
use chatloop_model::{ModelMessage, ModelProvider, ToolCallRequest};

use crate::tools::*;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider);
        Self { agent_builder }
    }

    /// Sets the system prompt for the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Registers an extra tool besides the built-in ones.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.agent_builder = self.agent_builder.with_tool(tool);
        self
    }

    /// Sets whether tool calls run without confirmation.
    #[inline]
    pub fn with_auto_run_tools(mut self, auto_run_tools: bool) -> Self {
        self.agent_builder =
            self.agent_builder.with_auto_run_tools(auto_run_tools);
        self
    }

    /// Sets the maximum number of rounds per message.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.agent_builder = self.agent_builder.with_max_rounds(max_rounds);
        self
    }

    /// Sets how many times a failed model request is retried.
    #[inline]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.agent_builder = self.agent_builder.with_max_retries(max_retries);
        self
    }

    /// Attaches a callback to be invoked when a transcript is generated.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str, TranscriptSource) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_transcript(on_transcript);
        self
    }

    /// Attaches a callback to be invoked when the model requests a tool
    /// call.
    #[inline]
    pub fn on_tool_call(
        mut self,
        on_tool_call: impl Fn(&ToolCallRequest) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_tool_call(on_tool_call);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Result<Session, ConfigError> {
        let agent = self
            .agent_builder
            .with_tool(CurrentTimeTool::new())
            .build()?;

        Ok(Session { agent })
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and it
/// is basically a wrapper around [`Agent`].
pub struct Session {
    agent: Agent,
}

impl Session {
    /// Sends a user message and runs the conversation until the model
    /// answers, needs the caller to run tools, or `cancel` is triggered.
    pub async fn send_message(
        &mut self,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error> {
        debug!("sending a message of {} bytes", message.len());
        self.agent
            .start_with_cancellation(vec![ModelMessage::user(message)], cancel)
            .await
    }

    /// Runs tool calls from an [`Outcome::PendingToolCalls`], without
    /// submitting the results.
    #[inline]
    pub async fn run_tool_calls(
        &self,
        calls: &[ToolCallRequest],
    ) -> Vec<ModelMessage> {
        self.agent.execute_tool_calls(calls).await
    }

    /// Submits tool results for pending tool calls, and continues the
    /// conversation.
    ///
    /// Submitting no results continues a conversation that stopped at
    /// the round limit.
    pub async fn submit_tool_results(
        &mut self,
        results: Vec<ModelMessage>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error> {
        debug!("submitting {} tool results", results.len());
        self.agent.start_with_cancellation(results, cancel).await
    }

    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}
