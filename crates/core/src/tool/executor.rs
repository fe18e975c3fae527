use std::sync::Arc;

use chatloop_model::{ToolCallRequest, ToolCallResult};
use futures_util::FutureExt as _;
use futures_util::stream::{FuturesUnordered, StreamExt as _};
use serde_json::Value;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{Error, Registry, ToolResult};

/// The content of a tool result whose call was cancelled before it
/// finished.
pub const CANCELLED_TOOL_RESULT: &str = "Tool call was cancelled";

/// An executor that runs the tool calls of one assistant turn.
///
/// Every call runs as its own task, so calls proceed concurrently and a
/// failing or panicking tool only affects its own result.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<Registry>,
}

impl Executor {
    /// Creates an executor that resolves tools from `registry`.
    #[inline]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Returns the registry of this executor.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Executes all the tool calls and returns one result per call, in
    /// the order of `requests`.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Dropping the returned future aborts
    /// every tool call that is still running.
    pub async fn execute_all(
        &self,
        requests: &[ToolCallRequest],
    ) -> Vec<ToolCallResult> {
        let never = CancellationToken::new();
        self.execute_all_with_cancellation(requests, &never).await.0
    }

    /// Same as [`Executor::execute_all`], but stops once `cancel` fires.
    ///
    /// Calls that finished before the cancellation keep their results.
    /// Calls still running are aborted and answered with
    /// [`CANCELLED_TOOL_RESULT`]. The returned flag is `true` if the
    /// execution was cancelled.
    pub async fn execute_all_with_cancellation(
        &self,
        requests: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> (Vec<ToolCallResult>, bool) {
        let handles: Vec<_> =
            requests.iter().map(|req| self.spawn(req)).collect();
        let _guard =
            AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

        let mut outputs: Vec<Option<ToolResult>> =
            requests.iter().map(|_| None).collect();
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .enumerate()
            .map(|(idx, handle)| async move { (idx, handle.await) })
            .collect();

        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = pending.next() => match next {
                    Some((idx, output)) => outputs[idx] = Some(flatten(output)),
                    None => break,
                },
            }
        }

        if cancelled {
            // Keep whatever finished before the cancellation was seen.
            while let Some(Some((idx, output))) = pending.next().now_or_never()
            {
                outputs[idx] = Some(flatten(output));
            }
            debug!(
                "tool execution cancelled with {} call(s) running",
                pending.len()
            );
        }

        let results = requests
            .iter()
            .zip(outputs)
            .map(|(req, output)| ToolCallResult {
                id: req.id.clone(),
                content: match output {
                    Some(result) => result_content(&req.name, result),
                    None => CANCELLED_TOOL_RESULT.to_owned(),
                },
            })
            .collect();
        (results, cancelled)
    }

    fn spawn(&self, req: &ToolCallRequest) -> JoinHandle<ToolResult> {
        let registry = Arc::clone(&self.registry);
        let name = req.name.clone();
        let arguments = req.arguments.clone();
        trace!("spawning a tool ({}) with args: {arguments}", req.id);
        tokio::spawn(
            async move {
                match parse_arguments(&arguments) {
                    Ok(arguments) => registry.call(&name, arguments).await,
                    Err(err) => Err(err),
                }
            }
            .instrument(debug_span!(
                "tool execute",
                id = %req.id,
                tool = %req.name
            )),
        )
    }
}

struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        // Aborting a finished task is a no-op.
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn parse_arguments(arguments: &str) -> Result<Value, Error> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments).map_err(|err| {
        Error::invalid_input()
            .with_reason(format!("arguments are not valid JSON: {err}"))
    })
}

fn flatten(output: Result<ToolResult, JoinError>) -> ToolResult {
    match output {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            Err(Error::execution_error().with_reason("the tool panicked"))
        }
        Err(err) => Err(Error::execution_error().with_reason(err.to_string())),
    }
}

fn result_content(name: &str, result: ToolResult) -> String {
    match result {
        Ok(Value::String(text)) => text,
        Ok(value) => value.to_string(),
        Err(err) => {
            warn!("tool `{name}` failed: {err}");
            format!("Error calling tool `{name}`: {err}")
        }
    }
}
