//! A simple program demonstrates how to use `chatloop` as a library.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::pin::pin;
use std::time::Duration;

use chatloop::core::{CancellationToken, Error, Outcome, TranscriptSource};
use chatloop::{EnvConfig, Session, SessionBuilder};
use chatloop_model::{ModelMessage, ToolCallRequest};
use chatloop_openai_model::OpenAIProvider;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::select;
use tokio::signal;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::sleep;

enum SessionEvent {
    Transcript(String, TranscriptSource),
    ToolCall(ToolCallRequest),
}

const BAR_CHAR: &str = "▎";
const REJECTED_TOOL_RESULT: &str = "User rejected the tool call";
const MAX_RESULT_PREVIEW: usize = 200;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let session = SessionBuilder::with_model_provider(OpenAIProvider::new(
        config.openai,
    ))
    .with_system_prompt(
        include_str!("./system_prompt.md").replace("{{HOST_OS}}", host_os()),
    )
    .with_auto_run_tools(config.auto_run_tools)
    .with_max_rounds(config.max_rounds)
    .on_transcript({
        let event_tx = event_tx.clone();
        move |transcript, source| {
            event_tx
                .send(SessionEvent::Transcript(transcript.to_owned(), source))
                .ok();
        }
    })
    .on_tool_call({
        let event_tx = event_tx.clone();
        move |call| {
            event_tx.send(SessionEvent::ToolCall(call.clone())).ok();
        }
    })
    .build();
    let mut session = match session {
        Ok(session) => session,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let mut printer = Printer::new(progress_style);
    let mut input = Input::new();

    if !config.auto_run_tools {
        println!("{}", "Tool calls need your confirmation.".dimmed());
    }
    println!("{}", "Press Ctrl-C to interrupt, Ctrl-D to exit.".dimmed());

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = input.read_line().await else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let cancel = CancellationToken::new();
        let mut outcome = printer
            .drive(session.send_message(line, &cancel), &mut event_rx, &cancel)
            .await;

        loop {
            let results = match outcome {
                Ok(Outcome::Completed(_)) => break,
                Ok(Outcome::PendingToolCalls(turn)) => {
                    let results = confirm_tool_calls(
                        &session,
                        &turn.tool_calls,
                        &mut input,
                    )
                    .await;
                    let Some(results) = results else {
                        return;
                    };
                    results
                }
                Ok(Outcome::RoundLimitExceeded(_)) => {
                    let bar = BAR_CHAR.bright_yellow();
                    println!("{bar}⚠️  The agent reached the round limit.");
                    print!("Continue? [Y/n]: ");
                    std::io::stdout().flush().ok();
                    let Some(line) = input.read_line().await else {
                        return;
                    };
                    if !is_yes(&line) {
                        break;
                    }
                    // Nothing to submit, the conversation just goes on.
                    vec![]
                }
                Err(Error::Cancelled) => {
                    println!("{}", "Interrupted.".dimmed());
                    break;
                }
                Err(err) => {
                    println!("{}", format!("Error: {err}").bright_red());
                    break;
                }
            };
            outcome = printer
                .drive(
                    session.submit_tool_results(results, &cancel),
                    &mut event_rx,
                    &cancel,
                )
                .await;
        }
    }
}

/// Prints session events while a session operation is running.
struct Printer {
    progress_style: ProgressStyle,
    progress_bar: Option<ProgressBar>,
    in_assistant_text: bool,
}

impl Printer {
    fn new(progress_style: ProgressStyle) -> Self {
        Self {
            progress_style,
            progress_bar: None,
            in_assistant_text: false,
        }
    }

    async fn drive<F>(
        &mut self,
        fut: F,
        event_rx: &mut UnboundedReceiver<SessionEvent>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, Error>
    where
        F: Future<Output = Result<Outcome, Error>>,
    {
        let mut fut = pin!(fut);
        let mut thinking = true;

        loop {
            if thinking {
                let progress_style = &self.progress_style;
                self.progress_bar
                    .get_or_insert_with(|| {
                        let progress_bar = ProgressBar::new_spinner();
                        progress_bar.set_style(progress_style.clone());
                        progress_bar.set_message("🤔 Thinking...");
                        progress_bar
                    })
                    .inc(1);
            }

            select! {
                result = &mut fut => {
                    self.finish_progress();
                    // Events are sent before the operation returns.
                    while let Ok(event) = event_rx.try_recv() {
                        self.print_event(event);
                    }
                    self.end_assistant_text();
                    return result;
                }
                Some(event) = event_rx.recv() => {
                    self.finish_progress();
                    // Only streamed text means the model is answering.
                    thinking = !matches!(
                        event,
                        SessionEvent::Transcript(_, TranscriptSource::Assistant)
                    );
                    self.print_event(event);
                }
                _ = signal::ctrl_c() => {
                    debug!("interrupted by the user");
                    cancel.cancel();
                }
                _ = sleep(Duration::from_millis(100)) => {}
            }
        }
    }

    fn print_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Transcript(text, TranscriptSource::Assistant) => {
                if !self.in_assistant_text {
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                    self.in_assistant_text = true;
                }
                print!("{}", text.bright_white());
                std::io::stdout().flush().ok();
            }
            SessionEvent::Transcript(text, TranscriptSource::Tool) => {
                self.end_assistant_text();
                print_tool_result(&text);
            }
            SessionEvent::ToolCall(call) => {
                self.end_assistant_text();
                println!(
                    "{}🔧 {}({})",
                    BAR_CHAR.bright_yellow(),
                    call.name.bright_white().bold(),
                    call.arguments.dimmed()
                );
            }
        }
    }

    fn finish_progress(&mut self) {
        // Finish the progress bar before printing anything else.
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }

    fn end_assistant_text(&mut self) {
        if self.in_assistant_text {
            println!();
            self.in_assistant_text = false;
        }
    }
}

fn print_tool_result(text: &str) {
    let first_line = text.lines().next().unwrap_or_default();
    let mut preview: String =
        first_line.chars().take(MAX_RESULT_PREVIEW).collect();
    if preview.len() < text.len() {
        preview.push('…');
    }
    println!("{}   {}", BAR_CHAR.bright_yellow(), preview.dimmed());
}

async fn confirm_tool_calls(
    session: &Session,
    calls: &[ToolCallRequest],
    input: &mut Input,
) -> Option<Vec<ModelMessage>> {
    let mut approved = Vec::with_capacity(calls.len());
    for call in calls {
        let bar = BAR_CHAR.bright_yellow();
        println!("{bar}⚠️  Agent wants to call a tool:");
        println!(
            "{bar}{}({})",
            call.name.bright_white().bold(),
            call.arguments
        );
        print!("Run tool? [Y/n]: ");
        std::io::stdout().flush().ok();

        let line = input.read_line().await?;
        approved.push(is_yes(&line));
    }

    let approved_calls: Vec<_> = calls
        .iter()
        .zip(&approved)
        .filter(|(_, approved)| **approved)
        .map(|(call, _)| call.clone())
        .collect();
    let mut approved_results =
        session.run_tool_calls(&approved_calls).await.into_iter();

    let results = calls
        .iter()
        .zip(approved)
        .map(|(call, approved)| {
            let result = if approved {
                approved_results.next()
            } else {
                None
            };
            result.unwrap_or_else(|| {
                ModelMessage::tool(call.id.clone(), REJECTED_TOOL_RESULT)
            })
        })
        .collect::<Vec<_>>();
    for result in &results {
        print_tool_result(result.content());
    }
    println!();
    Some(results)
}

#[inline]
fn is_yes(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.eq_ignore_ascii_case("y")
}

struct Input {
    lines: Lines<BufReader<Stdin>>,
}

impl Input {
    fn new() -> Self {
        Self {
            lines: BufReader::new(io::stdin()).lines(),
        }
    }

    async fn read_line(&mut self) -> Option<String> {
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(err) => {
                error!("error reading input: {}", err);
                None
            }
        }
    }
}

#[inline]
fn host_os() -> &'static str {
    let os = std::env::consts::OS;
    match os {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        _ => "some other OS",
    }
}
