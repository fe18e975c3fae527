use std::future::ready;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatloop_model::{
    AssistantMessage, ErrorKind, ModelMessage, ToolCallRequest,
};
use chatloop_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::tool::{Error as ToolError, Tool, ToolResult};
use crate::{
    AgentBuilder, ConfigError, Error, Outcome, Stage, TranscriptSource,
};

static EMPTY_SCHEMA: &Value = &Value::Null;

#[derive(Deserialize)]
struct EchoInput {
    text: String,
}

struct EchoTool;

impl Tool for EchoTool {
    type Input = EchoInput;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the text"
    }

    fn parameter_schema(&self) -> &Value {
        EMPTY_SCHEMA
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok(Value::String(input.text)))
    }
}

struct FailingTool;

impl Tool for FailingTool {
    type Input = Value;

    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameter_schema(&self) -> &Value {
        EMPTY_SCHEMA
    }

    fn execute(
        &self,
        _input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Err(ToolError::execution_error().with_reason("boom")))
    }
}

struct SlowTool;

impl Tool for SlowTool {
    type Input = Value;

    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Takes a minute"
    }

    fn parameter_schema(&self) -> &Value {
        EMPTY_SCHEMA
    }

    fn execute(
        &self,
        _input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async {
            sleep(Duration::from_secs(60)).await;
            Ok(json!("finally"))
        }
    }
}

fn echo_call(index: u32, text: &str) -> PresetEvent {
    PresetEvent::tool_call(index, "echo", json!({ "text": text }).to_string())
}

fn assistant_with_calls(
    content: &str,
    calls: &[(u32, &str, &str)],
) -> ModelMessage {
    ModelMessage::Assistant(AssistantMessage {
        content: content.to_owned(),
        tool_calls: calls
            .iter()
            .map(|(index, name, arguments)| ToolCallRequest {
                id: format!("call_{index}"),
                index: *index,
                name: (*name).to_owned(),
                arguments: (*arguments).to_owned(),
            })
            .collect(),
    })
}

fn cancel_after(duration: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            sleep(duration).await;
            token.cancel();
        }
    });
    token
}

#[tokio::test]
async fn test_simple_message() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi, ".to_owned()),
        PresetEvent::MessageDelta("what can I do for you?".to_owned()),
    ]));

    let transcript = Arc::new(Mutex::new(Vec::new()));
    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .on_transcript({
            let transcript = Arc::clone(&transcript);
            move |text, source| {
                transcript.lock().unwrap().push((text.to_owned(), source));
            }
        })
        .build()
        .unwrap();
    assert_eq!(agent.stage(), Stage::Idle);

    let outcome = agent.start(vec![ModelMessage::user("Hello")]).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(AssistantMessage {
            content: "Hi, what can I do for you?".to_owned(),
            tool_calls: vec![],
        })
    );
    assert_eq!(agent.stage(), Stage::Done);
    assert_eq!(
        agent.conversation().messages(),
        [
            ModelMessage::user("Hello"),
            ModelMessage::assistant("Hi, what can I do for you?"),
        ]
    );
    assert_eq!(
        *transcript.lock().unwrap(),
        [
            ("Hi, ".to_owned(), TranscriptSource::Assistant),
            ("what can I do for you?".to_owned(), TranscriptSource::Assistant),
        ]
    );
}

#[tokio::test]
async fn test_request_carries_history_and_tools() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_text("Hello!"));
    model_provider.add_response(PresetResponse::with_text("Bye!"));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_system_prompt("Be brief.")
        .with_tool(FailingTool)
        .with_tool(EchoTool)
        .build()
        .unwrap();
    agent.start(vec![ModelMessage::user("Hi")]).await.unwrap();
    agent.start(vec![ModelMessage::user("Bye")]).await.unwrap();

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].messages,
        [
            ModelMessage::system("Be brief."),
            ModelMessage::user("Hi"),
            ModelMessage::assistant("Hello!"),
            ModelMessage::user("Bye"),
        ]
    );
    let tool_names: Vec<_> =
        requests[0].tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(tool_names, ["echo", "fail"]);
    assert_eq!(agent.conversation().len(), 5);
}

#[tokio::test]
async fn test_auto_run_tools() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Let me check.".to_owned()),
        echo_call(0, "sunny"),
        PresetEvent::tool_call(1, "fail", "{}"),
    ]));
    model_provider.add_response(PresetResponse::with_text("It is sunny."));

    let tool_calls = Arc::new(Mutex::new(Vec::new()));
    let tool_transcript = Arc::new(Mutex::new(Vec::new()));
    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool)
        .with_tool(FailingTool)
        .on_tool_call({
            let tool_calls = Arc::clone(&tool_calls);
            move |call| tool_calls.lock().unwrap().push(call.name.clone())
        })
        .on_transcript({
            let tool_transcript = Arc::clone(&tool_transcript);
            move |text, source| {
                if source == TranscriptSource::Tool {
                    tool_transcript.lock().unwrap().push(text.to_owned());
                }
            }
        })
        .build()
        .unwrap();

    let outcome = agent
        .start(vec![ModelMessage::user("Weather?")])
        .await
        .unwrap();
    assert_eq!(outcome.message().content, "It is sunny.");
    assert_eq!(agent.stage(), Stage::Done);

    let failure = "Error calling tool `fail`: Execution error: boom";
    let expected_history = [
        ModelMessage::user("Weather?"),
        assistant_with_calls(
            "Let me check.",
            &[(0, "echo", r#"{"text":"sunny"}"#), (1, "fail", "{}")],
        ),
        ModelMessage::tool("call_0", "sunny"),
        ModelMessage::tool("call_1", failure),
        ModelMessage::assistant("It is sunny."),
    ];
    assert_eq!(agent.conversation().messages(), expected_history);
    assert_eq!(
        model_provider.requests()[1].messages,
        expected_history[..4]
    );
    assert_eq!(*tool_calls.lock().unwrap(), ["echo", "fail"]);
    assert_eq!(*tool_transcript.lock().unwrap(), ["sunny", failure]);
}

#[tokio::test]
async fn test_manual_mode() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        echo_call(0, "first"),
        echo_call(1, "second"),
    ]));
    model_provider.add_response(PresetResponse::with_text("Done."));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool)
        .with_auto_run_tools(false)
        .build()
        .unwrap();
    assert!(!agent.auto_run_tools());

    let outcome = agent.start(vec![ModelMessage::user("Go")]).await.unwrap();
    let Outcome::PendingToolCalls(turn) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(agent.stage(), Stage::AwaitingManualResume);
    // The turn is in the history, but no tool has been run.
    assert_eq!(agent.conversation().len(), 2);
    assert!(matches!(
        agent.conversation().last(),
        Some(ModelMessage::Assistant(msg)) if msg.tool_calls.len() == 2
    ));

    let results = agent.execute_tool_calls(&turn.tool_calls).await;
    assert_eq!(
        results,
        [
            ModelMessage::tool("call_0", "first"),
            ModelMessage::tool("call_1", "second"),
        ]
    );
    assert_eq!(agent.conversation().len(), 2);

    let outcome = agent.start(results).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(AssistantMessage {
            content: "Done.".to_owned(),
            tool_calls: vec![],
        })
    );
    assert_eq!(agent.conversation().len(), 5);
}

#[tokio::test]
async fn test_unmatched_tool_result() {
    let mut model_provider = TestModelProvider::default();
    model_provider
        .add_response(PresetResponse::with_events([echo_call(0, "x")]));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool)
        .with_auto_run_tools(false)
        .build()
        .unwrap();

    let err = agent
        .start(vec![
            ModelMessage::user("Hi"),
            ModelMessage::tool("call_9", "?"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnmatchedToolResult(id) if id == "call_9"));
    assert!(agent.conversation().is_empty());

    agent.start(vec![ModelMessage::user("Hi")]).await.unwrap();
    let err = agent
        .start(vec![
            ModelMessage::tool("call_0", "x"),
            ModelMessage::tool("call_0", "x"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnmatchedToolResult(id) if id == "call_0"));
    assert_eq!(agent.conversation().len(), 2);
}

#[tokio::test]
async fn test_unanswered_tool_calls() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        echo_call(0, "a"),
        echo_call(1, "b"),
    ]));
    model_provider.add_response(PresetResponse::with_text("Done."));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool)
        .with_auto_run_tools(false)
        .build()
        .unwrap();
    agent.start(vec![ModelMessage::user("Go")]).await.unwrap();
    assert_eq!(agent.conversation().len(), 2);

    let err = agent
        .start(vec![ModelMessage::tool("call_0", "a")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnansweredToolCall(id) if id == "call_1"));

    let err = agent
        .start(vec![ModelMessage::user("Something else")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnansweredToolCall(id) if id == "call_0"));
    assert_eq!(agent.conversation().len(), 2);

    let outcome = agent
        .start(vec![
            ModelMessage::tool("call_0", "a"),
            ModelMessage::tool("call_1", "b"),
        ])
        .await
        .unwrap();
    assert_eq!(outcome.message().content, "Done.");
    assert_eq!(agent.conversation().len(), 5);
}

#[tokio::test]
async fn test_round_limit() {
    let mut model_provider = TestModelProvider::default();
    for i in 0..3 {
        model_provider.add_response(PresetResponse::with_events([echo_call(
            0,
            &format!("step {i}"),
        )]));
    }
    model_provider.add_response(PresetResponse::with_text("Finished."));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool)
        .with_max_rounds(2)
        .build()
        .unwrap();
    assert_eq!(agent.max_rounds(), 2);

    let outcome = agent.start(vec![ModelMessage::user("Loop")]).await.unwrap();
    assert!(matches!(outcome, Outcome::RoundLimitExceeded(_)));
    assert_eq!(agent.stage(), Stage::Idle);
    assert_eq!(agent.conversation().len(), 5);
    assert_eq!(
        agent.conversation().last(),
        Some(&ModelMessage::tool("call_0", "step 1"))
    );

    // Continuing resets the round counter.
    let outcome = agent.start(vec![]).await.unwrap();
    assert_eq!(outcome.into_message().content, "Finished.");
    assert_eq!(agent.conversation().len(), 8);
}

#[test]
fn test_zero_max_rounds() {
    let result = AgentBuilder::with_model_provider(TestModelProvider::default())
        .with_max_rounds(0)
        .build();
    assert!(matches!(result, Err(ConfigError::ZeroMaxRounds)));
}

#[tokio::test]
async fn test_model_error() {
    // No scripted responses at all.
    let mut agent =
        AgentBuilder::with_model_provider(TestModelProvider::default())
            .build()
            .unwrap();

    let err = agent.start(vec![ModelMessage::user("Hi")]).await.unwrap_err();
    let Error::Model(err) = err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(err.kind(), ErrorKind::Other);
    assert_eq!(agent.stage(), Stage::Idle);
    assert_eq!(agent.conversation().messages(), [ModelMessage::user("Hi")]);
}

#[tokio::test]
async fn test_partial_turn_is_discarded() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("I was about to".to_owned()),
        PresetEvent::Disconnect,
    ]));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .build()
        .unwrap();
    let err = agent.start(vec![ModelMessage::user("Hi")]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Model(ref err) if err.kind() == ErrorKind::Unavailable
    ));
    assert_eq!(agent.conversation().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry() {
    let mut model_provider = TestModelProvider::default();
    model_provider
        .add_response(PresetResponse::with_text("Back online.").with_failures(2));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_max_retries(2)
        .build()
        .unwrap();
    let outcome = agent.start(vec![ModelMessage::user("Hi")]).await.unwrap();
    assert_eq!(outcome.message().content, "Back online.");
    assert_eq!(model_provider.requests().len(), 3);
    assert_eq!(agent.conversation().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausted() {
    let mut model_provider = TestModelProvider::default();
    model_provider
        .add_response(PresetResponse::with_text("Back online.").with_failures(2));

    let mut agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_max_retries(1)
        .build()
        .unwrap();
    let err = agent.start(vec![ModelMessage::user("Hi")]).await.unwrap_err();
    assert!(matches!(err, Error::Model(_)));
    assert_eq!(model_provider.requests().len(), 2);
    assert_eq!(agent.conversation().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_streaming() {
    let mut model_provider = TestModelProvider::default();
    model_provider.set_delay(Duration::from_secs(1));
    model_provider.add_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Never ".to_owned()),
        PresetEvent::MessageDelta("finished".to_owned()),
    ]));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .build()
        .unwrap();
    let cancel = cancel_after(Duration::from_millis(1500));
    let err = agent
        .start_with_cancellation(vec![ModelMessage::user("Hi")], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(agent.stage(), Stage::Idle);
    assert_eq!(agent.conversation().messages(), [ModelMessage::user("Hi")]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_executing_tools() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events([
        echo_call(0, "quick"),
        PresetEvent::tool_call(1, "slow", "{}"),
    ]));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool)
        .with_tool(SlowTool)
        .build()
        .unwrap();
    let cancel = cancel_after(Duration::from_secs(1));
    let err = agent
        .start_with_cancellation(vec![ModelMessage::user("Hi")], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(agent.stage(), Stage::Idle);

    // Finished calls keep their results, and the rest are answered as
    // cancelled, so the conversation can go on.
    let messages = agent.conversation().messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(
        messages[2..],
        [
            ModelMessage::tool("call_0", "quick"),
            ModelMessage::tool("call_1", "Tool call was cancelled"),
        ]
    );
}

#[tokio::test]
async fn test_empty_turn() {
    let mut model_provider = TestModelProvider::default();
    model_provider.add_response(PresetResponse::with_events(
        Vec::<PresetEvent>::new(),
    ));

    let mut agent = AgentBuilder::with_model_provider(model_provider)
        .build()
        .unwrap();
    let outcome = agent.start(vec![ModelMessage::user("Hi")]).await.unwrap();
    assert_eq!(outcome, Outcome::Completed(AssistantMessage::default()));
    assert_eq!(agent.stage(), Stage::Done);
    assert_eq!(
        agent.conversation().messages(),
        [ModelMessage::user("Hi"), ModelMessage::assistant("")]
    );
}
