//! Dialogue orchestrator: runs one turn at a time against the chat session.
//!
//! For each input it opens a response stream, forwards text to the
//! response queue as it arrives, and collects tool calls. Collected calls
//! are dispatched concurrently and answered in a single follow-up message,
//! up to `max_tool_rounds` round trips. Calls beyond that depth are
//! answered with an error result and the final stream is read for text
//! only. Every turn, including failed ones, ends with exactly one
//! end-of-turn marker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{ResponseItem, TurnInput, TurnReport, TurnState};
use super::queues::PipelineQueues;
use crate::config::PipelineConfig;
use crate::error::{AdaError, Result};
use crate::llm::error::LlmError;
use crate::llm::events::LlmEvent;
use crate::llm::message::{ContentPart, Message, Role, ToolCall};
use crate::llm::provider::LlmEventStream;
use crate::llm::session::ChatSession;
use crate::tools::{ToolError, ToolRegistry, ToolResult};

/// Text and tool calls read from one response stream.
#[derive(Debug, Default)]
struct StreamRound {
    text: String,
    calls: Vec<ToolCall>,
}

/// Running totals for the turn report.
#[derive(Debug, Default)]
struct TurnTally {
    reply: String,
    tool_calls: usize,
}

/// Consumes turn inputs and drives the tool-call protocol.
pub struct DialogueOrchestrator {
    session: ChatSession,
    registry: Arc<ToolRegistry>,
    queues: PipelineQueues,
    max_tool_rounds: u32,
    tool_timeout: Duration,
    state: watch::Sender<TurnState>,
    transitions: Option<mpsc::UnboundedSender<TurnState>>,
    reports: Option<mpsc::UnboundedSender<TurnReport>>,
}

impl std::fmt::Debug for DialogueOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogueOrchestrator")
            .field("session", &self.session)
            .field("registry", &self.registry)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl DialogueOrchestrator {
    pub fn new(
        session: ChatSession,
        registry: Arc<ToolRegistry>,
        queues: PipelineQueues,
        config: &PipelineConfig,
    ) -> Self {
        let (state, _) = watch::channel(TurnState::AwaitingInput);
        Self {
            session,
            registry,
            queues,
            max_tool_rounds: config.max_tool_rounds,
            tool_timeout: Duration::from_secs(config.tool_timeout_secs.max(1)),
            state,
            transitions: None,
            reports: None,
        }
    }

    /// Publish turn state on an externally created channel.
    pub fn with_state_sender(mut self, state: watch::Sender<TurnState>) -> Self {
        state.send_replace(*self.state.borrow());
        self.state = state;
        self
    }

    /// Forward every state transition to `tx`, in order.
    ///
    /// The watch channel only holds the latest state; this sees each step.
    pub fn with_state_transitions(mut self, tx: mpsc::UnboundedSender<TurnState>) -> Self {
        self.transitions = Some(tx);
        self
    }

    /// Send a [`TurnReport`] after every turn.
    pub fn with_turn_reports(mut self, reports: mpsc::UnboundedSender<TurnReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Observe turn state changes.
    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    /// The conversation so far (excluding the system prompt).
    pub fn history(&self) -> &[Message] {
        self.session.history()
    }

    /// Serve turns until the turn slot closes or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            provider = self.session.provider_name(),
            tools = self.registry.len(),
            max_tool_rounds = self.max_tool_rounds,
            "dialogue orchestrator started"
        );
        loop {
            let input = tokio::select! {
                () = cancel.cancelled() => break,
                input = self.queues.turns.recv() => match input {
                    Some(input) => input,
                    None => {
                        // Input is closed; let synthesis drain and finish.
                        self.queues.responses.close();
                        break;
                    }
                },
            };
            let generation = input.generation;
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(generation, "turn abandoned at shutdown");
                    self.queues.responses.push(ResponseItem::end_of_turn(generation));
                    break;
                }
                () = self.run_turn(input) => {}
            }
        }
        self.set_state(TurnState::AwaitingInput);
        info!("dialogue orchestrator stopped");
    }

    /// Run one turn to completion. Never fails; errors abort the turn only.
    pub async fn run_turn(&mut self, input: TurnInput) {
        let generation = input.generation;
        let started = Instant::now();
        let checkpoint = self.session.checkpoint();
        let mut tally = TurnTally::default();

        let outcome = self.execute_turn(input, &mut tally).await;
        if let Err(e) = &outcome {
            error!(generation, "turn failed: {e}");
            self.session.rollback(checkpoint);
        }

        self.queues.responses.push(ResponseItem::end_of_turn(generation));
        self.set_state(TurnState::Done);
        info!(
            generation,
            reply_chars = tally.reply.len(),
            tool_calls = tally.tool_calls,
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "turn complete"
        );

        if let Some(reports) = &self.reports {
            let _ = reports.send(TurnReport {
                generation,
                reply: tally.reply,
                tool_calls: tally.tool_calls,
                error: outcome.err().map(|e| e.to_string()),
            });
        }
        self.set_state(TurnState::AwaitingInput);
    }

    async fn execute_turn(&mut self, input: TurnInput, tally: &mut TurnTally) -> Result<()> {
        let generation = input.generation;
        self.set_state(TurnState::Sending);
        let mut stream = self.session.send(user_message(input)).await?;

        self.set_state(TurnState::Streaming);
        let mut round = self.read_stream(&mut stream, generation, true, tally).await?;

        let mut depth: u32 = 0;
        while !round.calls.is_empty() {
            let calls = std::mem::take(&mut round.calls);
            self.session
                .record_assistant(std::mem::take(&mut round.text), calls.clone());
            self.set_state(TurnState::ToolPending);

            let within_depth = depth < self.max_tool_rounds;
            depth += 1;
            tally.tool_calls += calls.len();

            self.set_state(TurnState::ToolDispatched);
            let results = if within_depth {
                self.dispatch_tools(&calls).await
            } else {
                warn!(
                    generation,
                    calls = calls.len(),
                    max_tool_rounds = self.max_tool_rounds,
                    "tool calls beyond supported depth"
                );
                unsupported_depth(&calls, self.max_tool_rounds)
            };

            self.set_state(TurnState::StreamingFinal);
            let mut stream = self.session.send_tool_results(results).await?;
            round = self
                .read_stream(&mut stream, generation, within_depth, tally)
                .await?;
        }

        self.session.record_assistant(round.text, Vec::new());
        Ok(())
    }

    /// Drain one response stream.
    ///
    /// Text goes to the response queue immediately. Tool calls are kept
    /// when `collect_calls` is set and otherwise logged and dropped.
    async fn read_stream(
        &self,
        stream: &mut LlmEventStream,
        generation: u64,
        collect_calls: bool,
        tally: &mut TurnTally,
    ) -> Result<StreamRound> {
        let mut round = StreamRound::default();
        while let Some(event) = stream.next().await {
            match event {
                LlmEvent::StreamStart { request_id, model } => {
                    debug!(generation, %request_id, %model, "response stream opened");
                }
                LlmEvent::TextDelta { text } => {
                    if text.is_empty() {
                        continue;
                    }
                    round.text.push_str(&text);
                    tally.reply.push_str(&text);
                    self.queues
                        .responses
                        .push(ResponseItem::fragment(generation, text));
                }
                LlmEvent::ToolCall(call) => {
                    if collect_calls {
                        debug!(generation, tool = %call.name, id = %call.id, "tool call received");
                        round.calls.push(call);
                    } else {
                        warn!(
                            generation,
                            tool = %call.name,
                            "unsupported tool-call depth, call ignored"
                        );
                    }
                }
                LlmEvent::ExecutableCode { language, code } => {
                    info!(generation, %language, "model executed code:\n{code}");
                }
                LlmEvent::CodeExecutionResult { outcome, output } => {
                    info!(generation, %outcome, "code execution output:\n{output}");
                }
                LlmEvent::StreamEnd { finish_reason } => {
                    debug!(generation, %finish_reason, "response stream finished");
                    break;
                }
                LlmEvent::StreamError { error } => {
                    return Err(AdaError::Llm(LlmError::StreamError(error)));
                }
            }
        }
        Ok(round)
    }

    /// Run every call concurrently. Results keep call order.
    async fn dispatch_tools(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.invoke_tool(call))).await
    }

    async fn invoke_tool(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            return ToolResult::failure(
                &call.id,
                &call.name,
                format!("Function {} not found or implemented.", call.name),
            );
        };

        let started = Instant::now();
        let args = call.arguments.clone();
        let mut task = tokio::spawn(async move { tool.invoke(args).await });
        let outcome = match tokio::time::timeout(self.tool_timeout, &mut task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => Err(ToolError::Upstream(if join.is_panic() {
                "tool panicked".to_owned()
            } else {
                "tool task was cancelled".to_owned()
            })),
            Err(_) => {
                task.abort();
                Err(ToolError::Timeout(self.tool_timeout.as_secs()))
            }
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(payload) => {
                let result = ToolResult::from_output(&call.id, &call.name, payload);
                if result.is_error {
                    warn!(tool = %call.name, elapsed_ms, "tool reported an error");
                } else {
                    info!(tool = %call.name, elapsed_ms, "tool succeeded");
                }
                result
            }
            Err(e) => {
                warn!(tool = %call.name, elapsed_ms, "tool failed: {e}");
                ToolResult::failure(
                    &call.id,
                    &call.name,
                    format!("Failed to execute function {}: {e}", call.name),
                )
            }
        }
    }

    fn set_state(&self, state: TurnState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "turn state");
            if let Some(tx) = &self.transitions {
                let _ = tx.send(state);
            }
        }
    }
}

/// The user message for `input`; an image-only input carries no text part.
fn user_message(input: TurnInput) -> Message {
    match input.attachment {
        Some(attachment) if input.content.trim().is_empty() => Message {
            role: Role::User,
            parts: vec![ContentPart::Image {
                mime_type: attachment.mime_type,
                data: attachment.data,
            }],
            tool_calls: Vec::new(),
        },
        Some(attachment) => {
            Message::user_with_image(input.content, attachment.mime_type, attachment.data)
        }
        None => Message::user(input.content),
    }
}

fn unsupported_depth(calls: &[ToolCall], max_rounds: u32) -> Vec<ToolResult> {
    calls
        .iter()
        .map(|call| {
            ToolResult::failure(
                &call.id,
                &call.name,
                format!(
                    "unsupported tool-call depth: at most {max_rounds} tool round(s) per turn"
                ),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::llm::events::FinishReason;
    use crate::llm::provider::{ProviderAdapter, RequestOptions, ToolDefinition};
    use crate::pipeline::messages::{Attachment, ResponseKind};
    use crate::tools::{Tool, ToolArgs};

    /// Replays one scripted stream per request and records what was sent.
    struct ScriptedProvider {
        streams: Mutex<VecDeque<std::result::Result<Vec<LlmEvent>, LlmError>>>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        fn new(streams: Vec<std::result::Result<Vec<LlmEvent>, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                streams: Mutex::new(streams.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<Vec<Message>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(
            &self,
            messages: &[Message],
            _options: &RequestOptions,
            _tools: &[ToolDefinition],
        ) -> std::result::Result<LlmEventStream, LlmError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            let events = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(text_stream("")))?;
            Ok(Box::pin(futures_util::stream::iter(events)))
        }
    }

    struct FixedTool {
        name: &'static str,
        reply: Value,
    }

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "fixed"
        }
        fn schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _args: ToolArgs) -> std::result::Result<Value, ToolError> {
            Ok(self.reply.clone())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "get_travel_duration"
        }
        fn description(&self) -> &str {
            "fails"
        }
        fn schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _args: ToolArgs) -> std::result::Result<Value, ToolError> {
            Err(ToolError::Upstream("connection reset".into()))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "get_search_results"
        }
        fn description(&self) -> &str {
            "panics"
        }
        fn schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _args: ToolArgs) -> std::result::Result<Value, ToolError> {
            panic!("search backend exploded");
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(&self, _args: ToolArgs) -> std::result::Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        }
    }

    fn start() -> LlmEvent {
        LlmEvent::StreamStart {
            request_id: "req".into(),
            model: "test-model".into(),
        }
    }

    fn end(reason: FinishReason) -> LlmEvent {
        LlmEvent::StreamEnd {
            finish_reason: reason,
        }
    }

    fn text_stream(text: &str) -> Vec<LlmEvent> {
        vec![
            start(),
            LlmEvent::TextDelta { text: text.into() },
            end(FinishReason::Stop),
        ]
    }

    fn call_stream(calls: &[(&str, &str, Value)]) -> Vec<LlmEvent> {
        let mut events = vec![start()];
        events.extend(calls.iter().map(|(id, name, args)| {
            LlmEvent::ToolCall(ToolCall::new(*id, *name, args.clone()))
        }));
        events.push(end(FinishReason::ToolCalls));
        events
    }

    fn orchestrator(
        provider: Arc<ScriptedProvider>,
        tools: Vec<Arc<dyn Tool>>,
        config: PipelineConfig,
    ) -> (DialogueOrchestrator, PipelineQueues) {
        let registry = tools
            .into_iter()
            .fold(ToolRegistry::builder(), |b, t| b.register(t))
            .build();
        let registry = Arc::new(registry);
        let session = ChatSession::new(provider, "You are Ada.", registry.definitions());
        let queues = PipelineQueues::new();
        (
            DialogueOrchestrator::new(session, registry, queues.clone(), &config),
            queues,
        )
    }

    fn input(text: &str, generation: u64) -> TurnInput {
        TurnInput {
            generation,
            ..TurnInput::text(text)
        }
    }

    fn drain(queues: &PipelineQueues) -> Vec<ResponseItem> {
        std::iter::from_fn(|| queues.responses.try_recv()).collect()
    }

    fn results_of(request: &[Message]) -> Vec<ToolResult> {
        request
            .last()
            .unwrap()
            .results()
            .cloned()
            .collect::<Vec<_>>()
    }

    // ── Plain turns ───────────────────────────────────────────

    #[tokio::test]
    async fn text_turn_streams_fragments_then_end_of_turn() {
        let provider = ScriptedProvider::new(vec![Ok(vec![
            start(),
            LlmEvent::TextDelta { text: "Hello".into() },
            LlmEvent::TextDelta { text: ", Sir.".into() },
            end(FinishReason::Stop),
        ])]);
        let (mut orch, queues) = orchestrator(provider, vec![], PipelineConfig::default());
        let mut states = orch.subscribe();

        orch.run_turn(input("Hi", 1)).await;

        assert_eq!(
            drain(&queues),
            vec![
                ResponseItem::fragment(1, "Hello"),
                ResponseItem::fragment(1, ", Sir."),
                ResponseItem::end_of_turn(1),
            ]
        );
        assert_eq!(orch.history().len(), 2);
        assert_eq!(orch.history()[1].text(), "Hello, Sir.");
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), TurnState::AwaitingInput);
    }

    #[tokio::test]
    async fn image_only_input_sends_image_part() {
        let provider = ScriptedProvider::new(vec![Ok(text_stream("A cat."))]);
        let (mut orch, _queues) =
            orchestrator(Arc::clone(&provider), vec![], PipelineConfig::default());

        let turn = TurnInput {
            generation: 1,
            ..TurnInput::text("").with_attachment(Attachment::new(vec![1, 2], "image/png"))
        };
        orch.run_turn(turn).await;

        let requests = provider.requests();
        let user = requests[0].last().unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(
            user.parts,
            vec![ContentPart::Image {
                mime_type: "image/png".into(),
                data: vec![1, 2],
            }]
        );
    }

    // ── Tool rounds ───────────────────────────────────────────

    #[tokio::test]
    async fn tool_round_sends_all_results_in_one_follow_up() {
        let provider = ScriptedProvider::new(vec![
            Ok(call_stream(&[
                ("c1", "get_weather", json!({"location": "Reno, NV"})),
                ("c2", "get_weather", json!({"location": "Paris"})),
            ])),
            Ok(text_stream("It's 68 degrees in Reno.")),
        ]);
        let weather = Arc::new(FixedTool {
            name: "get_weather",
            reply: json!({"location": "Reno, NV", "current_temp_f": "68"}),
        });
        let (mut orch, queues) = orchestrator(
            Arc::clone(&provider),
            vec![weather],
            PipelineConfig::default(),
        );

        orch.run_turn(input("What's the weather in Reno, NV?", 1)).await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let results = results_of(&requests[1]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].call_id, "c1");
        assert_eq!(results[1].call_id, "c2");
        assert!(results.iter().all(|r| !r.is_error));

        let items = drain(&queues);
        assert_eq!(
            items,
            vec![
                ResponseItem::fragment(1, "It's 68 degrees in Reno."),
                ResponseItem::end_of_turn(1),
            ]
        );
        // user, assistant(calls), tool results, assistant(text)
        assert_eq!(orch.history().len(), 4);
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result_and_turn_completes() {
        let provider = ScriptedProvider::new(vec![
            Ok(call_stream(&[("c1", "launch_rocket", json!({}))])),
            Ok(text_stream("I can't do that.")),
        ]);
        let (orch, queues) =
            orchestrator(Arc::clone(&provider), vec![], PipelineConfig::default());
        let (tx, mut reports) = mpsc::unbounded_channel();
        let mut orch = orch.with_turn_reports(tx);

        orch.run_turn(input("Launch it", 1)).await;

        let results = results_of(&provider.requests()[1]);
        assert_eq!(
            results[0].error_message(),
            Some("Function launch_rocket not found or implemented.")
        );
        assert_eq!(
            drain(&queues).last(),
            Some(&ResponseItem::end_of_turn(1))
        );
        let report = reports.try_recv().unwrap();
        assert_eq!(report.tool_calls, 1);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn failing_and_panicking_tools_become_error_results() {
        let provider = ScriptedProvider::new(vec![
            Ok(call_stream(&[
                ("c1", "get_travel_duration", json!({"origin": "A", "destination": "B"})),
                ("c2", "get_search_results", json!({"query": "news"})),
            ])),
            Ok(text_stream("Both lookups failed.")),
        ]);
        let (mut orch, queues) = orchestrator(
            Arc::clone(&provider),
            vec![Arc::new(FailingTool), Arc::new(PanickingTool)],
            PipelineConfig::default(),
        );

        orch.run_turn(input("Plan my trip", 1)).await;

        let results = results_of(&provider.requests()[1]);
        assert_eq!(results[0].call_id, "c1");
        assert_eq!(
            results[0].error_message(),
            Some("Failed to execute function get_travel_duration: upstream error: connection reset")
        );
        assert_eq!(results[1].call_id, "c2");
        assert!(results[1].is_error);
        assert!(
            results[1]
                .error_message()
                .unwrap()
                .contains("tool panicked")
        );
        assert_eq!(drain(&queues).len(), 2);
    }

    // ── Turn state ────────────────────────────────────────────

    fn transitions(rx: &mut mpsc::UnboundedReceiver<TurnState>) -> Vec<TurnState> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn state_walks_through_tool_round_to_done() {
        let provider = ScriptedProvider::new(vec![
            Ok(call_stream(&[("c1", "get_weather", json!({"location": "Reno, NV"}))])),
            Ok(text_stream("It's 68 degrees.")),
            Ok(text_stream("Hello again.")),
        ]);
        let weather = Arc::new(FixedTool {
            name: "get_weather",
            reply: json!({"current_temp_f": "68"}),
        });
        let (orch, _queues) = orchestrator(provider, vec![weather], PipelineConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut orch = orch.with_state_transitions(tx);

        orch.run_turn(input("Weather?", 1)).await;
        assert_eq!(
            transitions(&mut rx),
            vec![
                TurnState::Sending,
                TurnState::Streaming,
                TurnState::ToolPending,
                TurnState::ToolDispatched,
                TurnState::StreamingFinal,
                TurnState::Done,
                TurnState::AwaitingInput,
            ]
        );

        orch.run_turn(input("Hi", 2)).await;
        assert_eq!(
            transitions(&mut rx),
            vec![
                TurnState::Sending,
                TurnState::Streaming,
                TurnState::Done,
                TurnState::AwaitingInput,
            ]
        );
    }

    #[tokio::test]
    async fn failing_tool_turn_still_reaches_done() {
        let provider = ScriptedProvider::new(vec![
            Ok(call_stream(&[(
                "c1",
                "get_travel_duration",
                json!({"origin": "A", "destination": "B"}),
            )])),
            Ok(text_stream("The lookup failed.")),
        ]);
        let (orch, queues) =
            orchestrator(provider, vec![Arc::new(FailingTool)], PipelineConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut orch = orch.with_state_transitions(tx);

        orch.run_turn(input("Plan my trip", 1)).await;

        assert_eq!(
            transitions(&mut rx),
            vec![
                TurnState::Sending,
                TurnState::Streaming,
                TurnState::ToolPending,
                TurnState::ToolDispatched,
                TurnState::StreamingFinal,
                TurnState::Done,
                TurnState::AwaitingInput,
            ]
        );
        assert_eq!(drain(&queues).last(), Some(&ResponseItem::end_of_turn(1)));
    }

    #[tokio::test]
    async fn failed_send_goes_straight_to_done() {
        let provider = ScriptedProvider::new(vec![Err(LlmError::AuthError(
            "authentication failed: bad key".into(),
        ))]);
        let (orch, _queues) = orchestrator(provider, vec![], PipelineConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut orch = orch.with_state_transitions(tx);

        orch.run_turn(input("Hello", 1)).await;

        assert_eq!(
            transitions(&mut rx),
            vec![TurnState::Sending, TurnState::Done, TurnState::AwaitingInput]
        );
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let provider = ScriptedProvider::new(vec![
            Ok(call_stream(&[("c1", "slow", json!({}))])),
            Ok(text_stream("Sorry, that took too long.")),
        ]);
        let config = PipelineConfig {
            tool_timeout_secs: 1,
            ..PipelineConfig::default()
        };
        let (mut orch, _queues) =
            orchestrator(Arc::clone(&provider), vec![Arc::new(SlowTool)], config);

        orch.run_turn(input("Do the slow thing", 1)).await;

        let results = results_of(&provider.requests()[1]);
        assert_eq!(
            results[0].error_message(),
            Some("Failed to execute function slow: timed out after 1s")
        );
    }

    #[tokio::test]
    async fn calls_beyond_depth_get_unsupported_errors() {
        let provider = ScriptedProvider::new(vec![
            Ok(call_stream(&[("c1", "get_weather", json!({"location": "Reno"}))])),
            Ok(call_stream(&[("c2", "get_weather", json!({"location": "Tahoe"}))])),
            Ok(vec![
                start(),
                LlmEvent::TextDelta {
                    text: "Reno is sunny.".into(),
                },
                LlmEvent::ToolCall(ToolCall::new("c3", "get_weather", json!({}))),
                end(FinishReason::Stop),
            ]),
        ]);
        let weather = Arc::new(FixedTool {
            name: "get_weather",
            reply: json!({"description": "Sunny"}),
        });
        let (mut orch, queues) = orchestrator(
            Arc::clone(&provider),
            vec![weather],
            PipelineConfig::default(),
        );

        orch.run_turn(input("Weather in Reno and Tahoe?", 1)).await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        let second = results_of(&requests[2]);
        assert_eq!(second[0].call_id, "c2");
        assert!(
            second[0]
                .error_message()
                .unwrap()
                .starts_with("unsupported tool-call depth")
        );
        assert_eq!(
            drain(&queues),
            vec![
                ResponseItem::fragment(1, "Reno is sunny."),
                ResponseItem::end_of_turn(1),
            ]
        );
        // The ignored c3 call is not recorded.
        let last = orch.history().last().unwrap();
        assert!(last.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn deeper_rounds_are_allowed_when_configured() {
        let provider = ScriptedProvider::new(vec![
            Ok(call_stream(&[("c1", "get_weather", json!({}))])),
            Ok(call_stream(&[("c2", "get_weather", json!({}))])),
            Ok(text_stream("Done.")),
        ]);
        let weather = Arc::new(FixedTool {
            name: "get_weather",
            reply: json!({"description": "Sunny"}),
        });
        let config = PipelineConfig {
            max_tool_rounds: 2,
            ..PipelineConfig::default()
        };
        let (mut orch, _queues) = orchestrator(Arc::clone(&provider), vec![weather], config);

        orch.run_turn(input("Twice", 1)).await;

        let second = results_of(&provider.requests()[2]);
        assert!(!second[0].is_error);
    }

    // ── Failures ──────────────────────────────────────────────

    #[tokio::test]
    async fn stream_error_rolls_back_and_still_ends_turn() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec![
                start(),
                LlmEvent::TextDelta {
                    text: "Let me".into(),
                },
                LlmEvent::StreamError {
                    error: "connection dropped".into(),
                },
            ]),
            Ok(text_stream("Hello again.")),
        ]);
        let (mut orch, queues) = orchestrator(provider, vec![], PipelineConfig::default());

        orch.run_turn(input("First", 1)).await;
        let items = drain(&queues);
        let ends = items
            .iter()
            .filter(|i| i.kind == ResponseKind::EndOfTurn)
            .count();
        assert_eq!(ends, 1);
        assert_eq!(items.last(), Some(&ResponseItem::end_of_turn(1)));
        assert!(orch.history().is_empty());

        orch.run_turn(input("Second", 2)).await;
        assert_eq!(
            drain(&queues),
            vec![
                ResponseItem::fragment(2, "Hello again."),
                ResponseItem::end_of_turn(2),
            ]
        );
        assert_eq!(orch.history().len(), 2);
    }

    #[tokio::test]
    async fn send_failure_ends_turn_with_report() {
        let provider = ScriptedProvider::new(vec![Err(LlmError::AuthError("bad key".into()))]);
        let (orch, queues) = orchestrator(provider, vec![], PipelineConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut orch = orch.with_turn_reports(tx);

        orch.run_turn(input("Hello", 1)).await;

        assert_eq!(drain(&queues), vec![ResponseItem::end_of_turn(1)]);
        let report = rx.try_recv().unwrap();
        assert!(report.error.unwrap().contains("bad key"));
    }

    // ── Run loop ──────────────────────────────────────────────

    #[tokio::test]
    async fn run_processes_inputs_in_order_and_stops_on_close() {
        let provider = ScriptedProvider::new(vec![
            Ok(text_stream("one")),
            Ok(text_stream("two")),
        ]);
        let (orch, queues) = orchestrator(provider, vec![], PipelineConfig::default());
        let task = tokio::spawn(orch.run(CancellationToken::new()));

        queues.turns.put(input("first", 1));
        let first = queues.responses.recv().await.unwrap();
        assert_eq!(first, ResponseItem::fragment(1, "one"));
        assert_eq!(
            queues.responses.recv().await,
            Some(ResponseItem::end_of_turn(1))
        );

        queues.turns.put(input("second", 2));
        assert_eq!(
            queues.responses.recv().await,
            Some(ResponseItem::fragment(2, "two"))
        );
        assert_eq!(
            queues.responses.recv().await,
            Some(ResponseItem::end_of_turn(2))
        );

        queues.turns.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(queues.responses.is_closed());
    }
}
