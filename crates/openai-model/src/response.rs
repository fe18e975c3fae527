use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use chatloop_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::{Lines, data_field};
use crate::proto::{ChatCompletionChunk, ToolCallDelta};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

struct PartialState {
    lines: Lines,
    // Keyed by the stream-provided index, since the id may arrive before
    // (or without) the rest of the call.
    tool_calls: BTreeMap<u32, PartialToolCall>,
    finish_reason: Option<String>,
    // Events that are decoded but not yet returned to the caller.
    pending_events: VecDeque<ModelResponseEvent>,
    finished: bool,
}

impl PartialState {
    #[inline]
    fn new(lines: Lines) -> Self {
        Self {
            lines,
            tool_calls: Default::default(),
            finish_reason: None,
            pending_events: Default::default(),
            finished: false,
        }
    }

    fn apply_data(&mut self, data: &str) {
        let chunk = match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!("skipping malformed chunk ({err}): {data}");
                return;
            }
        };
        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(finish_reason) = choice.finish_reason {
            self.finish_reason = Some(finish_reason);
        }
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            self.pending_events
                .push_back(ModelResponseEvent::MessageDelta(content));
        }
        for tool_call in choice.delta.tool_calls.into_iter().flatten() {
            self.merge_tool_call(tool_call);
        }
    }

    fn merge_tool_call(&mut self, delta: ToolCallDelta) {
        let index = delta.index.unwrap_or_else(|| {
            self.tool_calls.keys().next_back().map_or(0, |idx| idx + 1)
        });
        let partial = self.tool_calls.entry(index).or_default();
        if partial.id.is_none() {
            partial.id = delta.id.filter(|id| !id.is_empty());
        }
        let Some(function) = delta.function else {
            return;
        };
        if partial.name.is_none() {
            partial.name = function.name.filter(|name| !name.is_empty());
        }
        if let Some(arguments) = function.arguments {
            partial.arguments.push_str(&arguments);
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        debug!("stream finished with reason {:?}", self.finish_reason);

        let tool_calls = std::mem::take(&mut self.tool_calls);
        let reason = if tool_calls.is_empty() {
            ModelFinishReason::Stop
        } else {
            ModelFinishReason::ToolCalls
        };
        for (index, partial) in tool_calls {
            let name = partial.name.unwrap_or_default();
            if name.is_empty() {
                warn!("tool call at index {index} has no name");
            }
            self.pending_events.push_back(ModelResponseEvent::ToolCall(
                ToolCallRequest {
                    id: partial.id.unwrap_or_else(|| format!("call_{index}")),
                    index,
                    name,
                    arguments: partial.arguments,
                },
            ));
        }
        self.pending_events
            .push_back(ModelResponseEvent::Completed(reason));
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streaming response from [`crate::OpenAIProvider`].
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub(crate) fn from_lines(lines: Lines) -> Self {
        let partial_state = PartialState::new(lines);
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut partial_state: PartialState) -> NextEvent {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let line = match partial_state.lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                // The transport closed without a `[DONE]` sentinel.
                partial_state.finish();
                continue;
            }
            Err(err) => {
                return Err(Error::new(
                    format!("failed to read the response stream: {err:?}"),
                    ErrorKind::Unavailable,
                ));
            }
        };
        trace!("got line: {line}");

        let Some(data) = data_field(&line) else {
            continue;
        };
        if data.trim_end() == "[DONE]" {
            partial_state.finish();
            continue;
        }
        partial_state.apply_data(data);
    }
}
