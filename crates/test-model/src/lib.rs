//! A local fake model for testing purpose.

mod preset;

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use chatloop_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: Vec<PresetEvent>,
    delay: Duration,
    event_idx: usize,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TestModelResponse {
    fn make_event(&self, idx: usize) -> Result<ModelResponseEvent, Error> {
        match &self.events[idx] {
            PresetEvent::MessageDelta(msg) => {
                Ok(ModelResponseEvent::MessageDelta(msg.clone()))
            }
            PresetEvent::ToolCall(req) => {
                Ok(ModelResponseEvent::ToolCall(req.clone()))
            }
            PresetEvent::Disconnect => Err(Error {
                message: "connection reset",
                kind: ErrorKind::Unavailable,
            }),
        }
    }

    fn finish_reason(&self) -> ModelFinishReason {
        let has_tool_call = self
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)));
        if has_tool_call {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        }
    }
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();

        if this.event_idx > this.events.len() {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(sleep(this.delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let idx = this.event_idx;
        this.event_idx += 1;
        if idx < this.events.len() {
            match this.make_event(idx) {
                Ok(event) => Poll::Ready(Ok(Some(event))),
                Err(err) => {
                    // Nothing is delivered after a broken stream.
                    this.event_idx = this.events.len() + 1;
                    Poll::Ready(Err(err))
                }
            }
        } else {
            Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                this.finish_reason(),
            ))))
        }
    }
}

#[derive(Default)]
struct SharedState {
    attempts: Vec<u64>,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script,
/// which is how the model should respond to a request. A response is
/// selected by the number of assistant messages in the request history,
/// so the first request of a conversation gets the first response, the
/// request after one assistant turn gets the second, and so on. If there
/// are no enough responses in the script, an error will be returned.
///
/// Clones share the recorded requests and attempt counters.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<PresetResponse>,
    delay: Option<Duration>,
    state: Arc<Mutex<SharedState>>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_response(&mut self, preset: PresetResponse) {
        self.conversation_script.push(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all the requests received so far, including failed ones.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.state
            .lock()
            .map(|state| state.requests.clone())
            .unwrap_or_default()
    }

    fn next_response(
        &self,
        req: &ModelRequest,
    ) -> Result<TestModelResponse, Error> {
        let step_idx = req
            .messages
            .iter()
            .filter(|msg| matches!(msg, ModelMessage::Assistant(_)))
            .count();
        let Some(preset) = self.conversation_script.get(step_idx) else {
            return Err(Error {
                message: "no enough steps",
                kind: ErrorKind::Other,
            });
        };

        let attempts = {
            let mut state = self.state.lock().map_err(|_| Error {
                message: "state poisoned",
                kind: ErrorKind::Other,
            })?;
            state.requests.push(req.clone());
            if state.attempts.len() <= step_idx {
                state.attempts.resize(step_idx + 1, 0);
            }
            state.attempts[step_idx] += 1;
            state.attempts[step_idx]
        };

        match preset.failures {
            Some(failures) if failures == 0 || attempts <= failures => {
                Err(Error {
                    message: "service unavailable",
                    kind: ErrorKind::Unavailable,
                })
            }
            _ => Ok(TestModelResponse {
                events: preset.events.clone(),
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                event_idx: 0,
                sleep: None,
            }),
        }
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.next_response(req))
    }
}
