use std::sync::Arc;

use chatloop_model::{
    AssistantMessage, ModelMessage, ModelRequest, ToolCallRequest,
};
use tokio_util::sync::CancellationToken;

use super::{Agent, Outcome, TranscriptSource};
use crate::error::Error;
use crate::model_client::TranscriptFn;

/// The stage an [`Agent`] is in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Nothing is running. This is also the stage after an error, or after
    /// the round limit was reached.
    #[default]
    Idle,
    /// Waiting for the model to finish an assistant turn.
    Streaming,
    /// Running the tool calls of the last assistant turn.
    ExecutingTools,
    /// The model answered without requesting tool calls.
    Done,
    /// The model requested tool calls that the caller has to answer.
    AwaitingManualResume,
}

impl Agent {
    pub(super) async fn run_rounds(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error> {
        let mut round = 0;
        loop {
            round += 1;
            debug!("round {round}/{} started", self.max_rounds);
            self.stage = Stage::Streaming;

            let turn = self.stream_turn(cancel).await?;
            // Appended in every mode, so that tool results sent later
            // always follow the turn that issued them.
            self.conversation
                .push(ModelMessage::Assistant(turn.clone()));

            if !turn.has_tool_calls() {
                if turn.content.is_empty() {
                    warn!("model returned an empty turn");
                }
                debug!("round {round} finished without tool calls");
                self.stage = Stage::Done;
                return Ok(Outcome::Completed(turn));
            }

            if let Some(on_tool_call) = &self.on_tool_call {
                for call in &turn.tool_calls {
                    on_tool_call(call);
                }
            }

            if !self.auto_run_tools {
                debug!(
                    "round {round} requested {} tool calls, awaiting results",
                    turn.tool_calls.len()
                );
                self.stage = Stage::AwaitingManualResume;
                return Ok(Outcome::PendingToolCalls(turn));
            }

            self.stage = Stage::ExecutingTools;
            self.run_tools(&turn.tool_calls, cancel).await?;

            if round >= self.max_rounds {
                warn!("round limit ({}) reached", self.max_rounds);
                self.stage = Stage::Idle;
                return Ok(Outcome::RoundLimitExceeded(turn));
            }
        }
    }

    async fn stream_turn(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AssistantMessage, Error> {
        let request = ModelRequest {
            messages: self.conversation.messages().to_vec(),
            tools: self.tool_executor.registry().definitions(),
        };
        let on_transcript: TranscriptFn = match &self.on_transcript {
            Some(on_transcript) => {
                let on_transcript = Arc::clone(on_transcript);
                Arc::new(move |delta: &str| {
                    on_transcript(delta, TranscriptSource::Assistant)
                })
            }
            None => Arc::new(|_: &str| {}),
        };

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("streaming cancelled");
                return Err(Error::Cancelled);
            }
            resp = self.model_client.send_request_with_retries(
                request,
                self.max_retries,
                on_transcript,
            ) => resp.map_err(Error::Model)?,
        };
        if resp.finish_reason.is_none() {
            debug!("response ended without a finish reason");
        }
        Ok(resp.into_message())
    }

    async fn run_tools(
        &mut self,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let (results, cancelled) = self
            .tool_executor
            .execute_all_with_cancellation(calls, cancel)
            .await;

        for result in results {
            if let Some(on_transcript) = &self.on_transcript {
                on_transcript(&result.content, TranscriptSource::Tool);
            }
            self.conversation.push(ModelMessage::Tool(result));
        }

        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
