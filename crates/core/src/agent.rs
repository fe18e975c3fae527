mod builder;
mod state;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use chatloop_model::{AssistantMessage, ModelMessage, ToolCallRequest};
use tokio_util::sync::CancellationToken;

use crate::conversation::Conversation;
use crate::error::Error;
use crate::model_client::ModelClient;
use crate::tool::Executor as ToolExecutor;
pub use builder::{AgentBuilder, DEFAULT_MAX_ROUNDS};
pub use state::Stage;

/// Where a piece of transcript comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TranscriptSource {
    /// A content delta streamed by the model.
    Assistant,
    /// The content of a tool result.
    Tool,
}

/// How a call to [`Agent::start`] ended.
///
/// Every variant carries the last assistant turn, which has already been
/// appended to the conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The model answered without requesting any tool call.
    Completed(AssistantMessage),
    /// The model requested tool calls and auto-run is disabled. The caller
    /// is expected to answer them with tool messages in the next `start`.
    PendingToolCalls(AssistantMessage),
    /// The round limit was reached after running tools. Calling `start`
    /// with no messages continues the conversation.
    RoundLimitExceeded(AssistantMessage),
}

impl Outcome {
    /// Returns the last assistant turn.
    #[inline]
    pub fn message(&self) -> &AssistantMessage {
        match self {
            Outcome::Completed(msg)
            | Outcome::PendingToolCalls(msg)
            | Outcome::RoundLimitExceeded(msg) => msg,
        }
    }

    /// Consumes the outcome, returning the last assistant turn.
    #[inline]
    pub fn into_message(self) -> AssistantMessage {
        match self {
            Outcome::Completed(msg)
            | Outcome::PendingToolCalls(msg)
            | Outcome::RoundLimitExceeded(msg) => msg,
        }
    }
}

pub(crate) type TranscriptCallback =
    Arc<dyn Fn(&str, TranscriptSource) + Send + Sync>;
pub(crate) type ToolCallCallback =
    Arc<dyn Fn(&ToolCallRequest) + Send + Sync>;

/// An agent instance, which maintains a conversation, a model provider,
/// and a set of tools.
///
/// The agent drives the conversation in rounds. Each round streams one
/// assistant turn from the model, and, if the turn requests tool calls
/// and auto-run is enabled, executes them and feeds the results back in
/// the next round.
///
/// An agent has a single writer: every operation that changes the
/// conversation takes `&mut self`.
pub struct Agent {
    model_client: ModelClient,
    tool_executor: ToolExecutor,
    conversation: Conversation,
    stage: Stage,
    auto_run_tools: bool,
    max_rounds: u32,
    max_retries: u32,
    on_transcript: Option<TranscriptCallback>,
    on_tool_call: Option<ToolCallCallback>,
}

impl Agent {
    /// Appends `messages` to the conversation and runs rounds until the
    /// model stops requesting tool calls.
    ///
    /// Tool messages in `messages` must answer tool calls issued by an
    /// earlier assistant turn. Otherwise [`Error::UnmatchedToolResult`] is
    /// returned and nothing is appended.
    ///
    /// After [`Outcome::PendingToolCalls`], `messages` must start with a
    /// result for every pending tool call. Leaving any of them unanswered
    /// returns [`Error::UnansweredToolCall`] and nothing is appended.
    #[inline]
    pub async fn start(
        &mut self,
        messages: Vec<ModelMessage>,
    ) -> Result<Outcome, Error> {
        self.start_with_cancellation(messages, &CancellationToken::new())
            .await
    }

    /// Like [`start`](Self::start), but stops with [`Error::Cancelled`]
    /// once `cancel` is triggered.
    ///
    /// A cancelled streaming turn is discarded. Tool calls that already
    /// finished keep their results, and the ones still running are answered
    /// with a placeholder result, so that every tool call in the
    /// conversation keeps a matching result.
    pub async fn start_with_cancellation(
        &mut self,
        messages: Vec<ModelMessage>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error> {
        self.conversation.check_tool_results(&messages)?;
        self.conversation.extend(messages);

        let result = self.run_rounds(cancel).await;
        if let Err(err) = &result {
            debug!("agent stopped with an error: {err}");
            self.stage = Stage::Idle;
        }
        result
    }

    /// Executes tool calls without touching the conversation, returning
    /// one tool message per call in the same order.
    ///
    /// This is intended for resuming after [`Outcome::PendingToolCalls`].
    pub async fn execute_tool_calls(
        &self,
        calls: &[ToolCallRequest],
    ) -> Vec<ModelMessage> {
        self.tool_executor
            .execute_all(calls)
            .await
            .into_iter()
            .map(ModelMessage::Tool)
            .collect()
    }

    /// Returns the conversation history.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Returns the current stage.
    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns `true` if tool calls are executed automatically.
    #[inline]
    pub fn auto_run_tools(&self) -> bool {
        self.auto_run_tools
    }

    /// Returns the maximum number of rounds per `start` call.
    #[inline]
    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            system_prompt,
            registry,
            auto_run_tools,
            max_rounds,
            max_retries,
            on_transcript,
            on_tool_call,
        } = builder;

        let mut conversation = Conversation::default();
        if let Some(system_prompt) = system_prompt {
            conversation.push(ModelMessage::System(system_prompt));
        }

        Self {
            model_client,
            tool_executor: ToolExecutor::new(Arc::new(registry)),
            conversation,
            stage: Default::default(),
            auto_run_tools,
            max_rounds,
            max_retries,
            on_transcript,
            on_tool_call,
        }
    }
}
