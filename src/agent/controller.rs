//! Round-trip controller
//!
//! Drives the model/tool cycle for one user message:
//! - Conversation → LLM → (tool → LLM)* → final answer
//! - Bounded number of model calls per run
//! - Per-round deadline and caller cancellation
//! - Streaming text to a `TextSink` (when requested)

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::conversation::Conversation;
use crate::core::{RoundState, RoundTripError, RoundTripResult, TextSink};
use crate::llm::{
    ChatRequest, ContentBlock, ContentBlockStart, ContentDelta, LlmProvider, Message, StopReason,
    StreamEvent, ToolDefinition,
};
use crate::tools::{ToolRegistry, ToolResult};

use super::config::AgentConfig;
use super::outcome::RoundOutcome;

const NOT_EXECUTED: &str =
    "Not executed: only one tool call is run per response. Request it again if it is still needed.";

/// A content block being assembled from stream deltas
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
}

impl PartialBlock {
    fn finish(self) -> RoundTripResult<ContentBlock> {
        match self {
            PartialBlock::Text(text) => Ok(ContentBlock::Text { text }),
            PartialBlock::ToolUse { id, name, json } => {
                let input: Value = if json.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&json).map_err(|e| {
                        RoundTripError::Provider(anyhow::anyhow!(
                            "Invalid tool input JSON for {}: {}",
                            name,
                            e
                        ))
                    })?
                };
                Ok(ContentBlock::ToolUse { id, name, input })
            }
        }
    }
}

/// Runs tool-augmented conversations against a model endpoint
///
/// The controller holds no per-conversation state, so one instance can serve
/// many conversations at once.
///
/// # Example
///
/// ```ignore
/// let controller = RoundTripController::new(config, llm, tools);
///
/// let mut conversation = Conversation::with_user_message("What is 1+1?");
/// let answer = controller.run(&mut conversation, 4).await?;
/// ```
pub struct RoundTripController {
    config: AgentConfig,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    definitions: Vec<ToolDefinition>,
    cancel: CancellationToken,
}

impl RoundTripController {
    /// Create a new controller
    pub fn new(config: AgentConfig, llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        let definitions = tools.definitions();
        tracing::info!(
            "[Controller] Using {} ({}) with {} tools",
            llm.provider_name(),
            llm.model(),
            definitions.len()
        );

        Self {
            config,
            llm,
            tools,
            definitions,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels in-flight rounds when triggered.
    ///
    /// Cancellation is permanent: once triggered, every later run on this
    /// controller returns `Cancelled` without calling the model.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run rounds until the model produces a final answer.
    ///
    /// At most `max_rounds` model calls are made.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        max_rounds: usize,
    ) -> RoundTripResult<String> {
        self.drive(conversation, max_rounds, None).await
    }

    /// Like `run`, but streams text fragments to `sink` as they arrive
    pub async fn run_streaming(
        &self,
        conversation: &mut Conversation,
        max_rounds: usize,
        sink: &mut dyn TextSink,
    ) -> RoundTripResult<String> {
        self.drive(conversation, max_rounds, Some(sink)).await
    }

    /// Append a user message and answer it using the configured round budget.
    ///
    /// Streams to `sink` when streaming is enabled; otherwise the final
    /// answer is sent to `sink` in one piece.
    pub async fn respond(
        &self,
        conversation: &mut Conversation,
        user_input: &str,
        sink: &mut dyn TextSink,
    ) -> RoundTripResult<String> {
        conversation.add_user_message(user_input);

        if self.config.streaming_enabled {
            self.run_streaming(conversation, self.config.max_rounds, sink)
                .await
        } else {
            let answer = self.run(conversation, self.config.max_rounds).await?;
            sink.send_text(&answer)?;
            Ok(answer)
        }
    }

    async fn drive(
        &self,
        conversation: &mut Conversation,
        max_rounds: usize,
        mut sink: Option<&mut dyn TextSink>,
    ) -> RoundTripResult<String> {
        let mut state = RoundState::AwaitingModel;

        for round in 1..=max_rounds {
            let request = self.request(conversation);
            tracing::info!(
                "[Controller] Calling LLM with {} messages (round {}/{})",
                request.messages.len(),
                round,
                max_rounds
            );

            let (content, stop_reason) = match sink.as_deref_mut() {
                Some(sink) => self.call_streaming(request, sink).await?,
                None => self.call(request).await?,
            };
            tracing::info!("[Controller] LLM response: stop_reason={:?}", stop_reason);

            match RoundOutcome::decode(&content, stop_reason)? {
                RoundOutcome::FinalAnswer(text) => {
                    advance(&mut state, RoundState::ModelRespondedFinal);
                    if content.is_empty() {
                        tracing::warn!("[Controller] Empty final response, not recorded");
                    } else {
                        conversation.push(Message::assistant_with_blocks(content))?;
                    }
                    return Ok(text);
                }
                RoundOutcome::ToolRequest {
                    name,
                    input,
                    call_id,
                } => {
                    advance(&mut state, RoundState::ModelRespondedTool);
                    tracing::info!("[Controller] Tool use: {} ({})", name, call_id);
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.tool_call(&name, &input);
                    }

                    advance(&mut state, RoundState::DispatchingTool);
                    let result = self.dispatch(&name, &input).await?;
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.tool_result(&name, &result.output, result.is_error);
                    }

                    // Every tool_use id needs a result, even the ones not run
                    let mut results: Vec<ContentBlock> = content
                        .iter()
                        .filter_map(ContentBlock::as_tool_use)
                        .filter(|(id, _, _)| *id != call_id)
                        .map(|(id, skipped, _)| {
                            tracing::warn!(
                                "[Controller] Not executing extra tool use: {} ({})",
                                skipped,
                                id
                            );
                            ContentBlock::tool_result(id, NOT_EXECUTED, true)
                        })
                        .collect();
                    results.push(ContentBlock::tool_result(
                        call_id,
                        result.output,
                        result.is_error,
                    ));

                    conversation.push(Message::assistant_with_blocks(content))?;
                    conversation.push(Message::user_with_blocks(results))?;
                    advance(&mut state, RoundState::AwaitingModel);
                }
            }
        }

        tracing::warn!("[Controller] Round budget ({}) exhausted", max_rounds);
        Err(RoundTripError::RoundBudgetExceeded(max_rounds))
    }

    fn request(&self, conversation: &Conversation) -> ChatRequest {
        let tool_choice = if self.definitions.is_empty() {
            None
        } else {
            Some(self.config.tool_choice.clone())
        };

        ChatRequest {
            system: Some(self.config.system_prompt.clone()),
            messages: conversation.messages().to_vec(),
            tools: self.definitions.clone(),
            tool_choice,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Run the requested tool under the round deadline.
    ///
    /// A tool that outlives the deadline is reported to the model as an error.
    async fn dispatch(&self, name: &str, input: &Value) -> RoundTripResult<ToolResult> {
        let deadline = self.config.round_timeout;
        let dispatch = tokio::time::timeout(deadline, self.tools.dispatch(name, input));

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::info!("[Controller] Cancelled while running tool {}", name);
                Err(RoundTripError::Cancelled)
            }
            result = dispatch => match result {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("[Controller] Tool {} timed out after {:?}", name, deadline);
                    Ok(ToolResult::error(format!(
                        "Tool '{}' timed out after {}s",
                        name,
                        deadline.as_secs_f64()
                    )))
                }
            },
        }
    }

    /// One non-streaming model call under the round deadline
    async fn call(
        &self,
        request: ChatRequest,
    ) -> RoundTripResult<(Vec<ContentBlock>, Option<StopReason>)> {
        let deadline = self.config.round_timeout;
        let call = tokio::time::timeout(deadline, self.llm.send_with_tools_and_system(request));

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::info!("[Controller] Cancelled while waiting for the model");
                return Err(RoundTripError::Cancelled);
            }
            result = call => result.map_err(|_| RoundTripError::RoundTimeout(deadline))??,
        };

        tracing::debug!(
            "[Controller] Usage: {} input / {} output tokens",
            response.usage.input_tokens,
            response.usage.output_tokens
        );
        Ok((response.content, response.stop_reason))
    }

    /// One streaming model call under the round deadline.
    ///
    /// Cancellation and timeout drop the in-flight stream with its connection.
    async fn call_streaming(
        &self,
        request: ChatRequest,
        sink: &mut dyn TextSink,
    ) -> RoundTripResult<(Vec<ContentBlock>, Option<StopReason>)> {
        let deadline = self.config.round_timeout;
        let collect = tokio::time::timeout(deadline, self.collect_stream(request, sink));

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::info!("[Controller] Cancelled while streaming");
                Err(RoundTripError::Cancelled)
            }
            result = collect => result.map_err(|_| RoundTripError::RoundTimeout(deadline))?,
        }
    }

    async fn collect_stream(
        &self,
        request: ChatRequest,
        sink: &mut dyn TextSink,
    ) -> RoundTripResult<(Vec<ContentBlock>, Option<StopReason>)> {
        let mut stream = self.llm.stream_with_tools_and_system(request).await?;

        let mut blocks: BTreeMap<usize, PartialBlock> = BTreeMap::new();
        let mut stop_reason: Option<StopReason> = None;

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::MessageStart(start) => {
                    tracing::debug!("[Controller] Stream started: {}", start.id);
                }

                StreamEvent::ContentBlockStart {
                    index,
                    content_block,
                } => {
                    let block = match content_block {
                        ContentBlockStart::Text { text } => {
                            if !text.is_empty() {
                                if let Err(e) = sink.send_text(&text) {
                                    drop(stream);
                                    return Err(e);
                                }
                            }
                            PartialBlock::Text(text)
                        }
                        ContentBlockStart::ToolUse { id, name } => PartialBlock::ToolUse {
                            id,
                            name,
                            json: String::new(),
                        },
                    };
                    blocks.insert(index, block);
                }

                StreamEvent::ContentBlockDelta { index, delta } => {
                    match (blocks.get_mut(&index), delta) {
                        (Some(PartialBlock::Text(text)), ContentDelta::TextDelta { text: part }) => {
                            text.push_str(&part);
                            if let Err(e) = sink.send_text(&part) {
                                tracing::info!("[Controller] Sink closed, dropping stream");
                                drop(stream);
                                return Err(e);
                            }
                        }
                        (
                            Some(PartialBlock::ToolUse { json, .. }),
                            ContentDelta::InputJsonDelta { partial_json },
                        ) => json.push_str(&partial_json),
                        (_, delta) => {
                            tracing::warn!(
                                "[Controller] Ignoring delta for block {}: {:?}",
                                index,
                                delta
                            );
                        }
                    }
                }

                StreamEvent::ContentBlockStop { index } => {
                    tracing::trace!("[Controller] Block {} complete", index);
                }

                StreamEvent::MessageDelta(delta) => {
                    stop_reason = delta.stop_reason;
                }

                StreamEvent::MessageStop => {
                    tracing::debug!("[Controller] Stream complete");
                    break;
                }

                StreamEvent::Ping => {
                    tracing::trace!("[Controller] Ping");
                }

                StreamEvent::Error(err) => {
                    tracing::error!(
                        "[Controller] Stream error: {}: {}",
                        err.error_type,
                        err.message
                    );
                    return Err(RoundTripError::Provider(anyhow::anyhow!(
                        "Stream error ({}): {}",
                        err.error_type,
                        err.message
                    )));
                }
            }
        }

        let content = blocks
            .into_values()
            .map(PartialBlock::finish)
            .collect::<RoundTripResult<Vec<_>>>()?;

        Ok((content, stop_reason))
    }
}

fn advance(state: &mut RoundState, next: RoundState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal transition {:?} -> {:?}",
        state,
        next
    );
    tracing::trace!("[Controller] {:?} -> {:?}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        EventStream, MessageDeltaData, MessageResponse, Role, ToolInputSchema, Usage,
    };
    use crate::tools::{Tool, ToolDescriptor};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn response(content: Vec<ContentBlock>, stop_reason: Option<StopReason>) -> MessageResponse {
        MessageResponse {
            id: "msg_test".to_string(),
            response_type: "message".to_string(),
            role: Role::Assistant,
            content,
            model: "test-model".to_string(),
            stop_reason,
            stop_sequence: None,
            usage: Usage::default(),
        }
    }

    fn tool_call(id: &str, name: &str, query: &str) -> MessageResponse {
        response(
            vec![ContentBlock::tool_use(id, name, json!({ "query": query }))],
            Some(StopReason::ToolUse),
        )
    }

    fn final_answer(text: &str) -> MessageResponse {
        response(vec![ContentBlock::text(text)], Some(StopReason::EndTurn))
    }

    /// Replays canned responses; the last one repeats once the script runs out
    struct ScriptedProvider {
        responses: Vec<MessageResponse>,
        streams: Mutex<Vec<EventStream>>,
        calls: AtomicUsize,
        requests: Mutex<Vec<ChatRequest>>,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<MessageResponse>) -> Self {
            Self {
                responses,
                streams: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn streaming(streams: Vec<EventStream>) -> Self {
            let provider = Self::new(Vec::new());
            *provider.streams.lock().unwrap() = streams.into_iter().rev().collect();
            provider
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn send_with_tools_and_system(&self, request: ChatRequest) -> Result<MessageResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let index = n.min(self.responses.len() - 1);
            Ok(self.responses[index].clone())
        }

        async fn stream_with_tools_and_system(&self, request: ChatRequest) -> Result<EventStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            self.streams
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }

        fn model(&self) -> String {
            "test-model".to_string()
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools
            .register(
                ToolDescriptor::new(
                    "wolfram_alpha",
                    "calculator",
                    ToolInputSchema::single_string("query", "expression"),
                ),
                |_| Ok("2".to_string()),
            )
            .unwrap();
        tools
            .register(
                ToolDescriptor::new(
                    "web_search",
                    "search",
                    ToolInputSchema::single_string("query", "query"),
                ),
                |_| anyhow::bail!("connection reset"),
            )
            .unwrap();
        Arc::new(tools)
    }

    fn controller(provider: Arc<ScriptedProvider>) -> RoundTripController {
        RoundTripController::new(AgentConfig::new("Be brief."), provider, registry())
    }

    fn text_stream(fragments: &[&str], stop_reason: StopReason) -> Vec<StreamEvent> {
        let mut events = vec![StreamEvent::ContentBlockStart {
            index: 0,
            content_block: ContentBlockStart::Text {
                text: String::new(),
            },
        }];
        for fragment in fragments {
            events.push(StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::TextDelta {
                    text: fragment.to_string(),
                },
            });
        }
        events.push(StreamEvent::ContentBlockStop { index: 0 });
        events.push(StreamEvent::MessageDelta(MessageDeltaData {
            stop_reason: Some(stop_reason),
            stop_sequence: None,
        }));
        events.push(StreamEvent::MessageStop);
        events
    }

    fn boxed(events: Vec<StreamEvent>) -> EventStream {
        Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
    }

    /// Sets its flag when dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Yields `events`, then never completes; flags `dropped` when released
    fn hanging(events: Vec<StreamEvent>, dropped: Arc<AtomicBool>) -> EventStream {
        let guard = DropFlag(dropped);
        let stream = futures::stream::iter(events.into_iter().map(Ok))
            .chain(futures::stream::pending())
            .map(move |event| {
                let _guard = &guard;
                event
            });
        Box::pin(stream)
    }

    #[tokio::test]
    async fn test_one_plus_one_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("t1", "wolfram_alpha", "1+1"),
            final_answer("2"),
        ]));
        let controller = controller(provider.clone());

        let mut conversation = Conversation::with_user_message("What is 1+1?");
        let answer = controller.run(&mut conversation, 4).await.unwrap();

        assert_eq!(answer, "2");
        assert_eq!(provider.calls(), 2);

        let messages = conversation.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(matches!(
            &messages[1].content[0],
            ContentBlock::ToolUse { id, name, .. } if id == "t1" && name == "wolfram_alpha"
        ));
        assert_eq!(
            messages[2].content,
            vec![ContentBlock::tool_result("t1", "2", false)]
        );
        assert_eq!(messages[3].text(), "2");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].system.as_deref(), Some("Be brief."));
        assert_eq!(requests[0].tools.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_round_budget_is_exact() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_call(
            "t1",
            "wolfram_alpha",
            "1+1",
        )]));
        let controller = controller(provider.clone());

        let mut conversation = Conversation::with_user_message("loop forever");
        let err = controller.run(&mut conversation, 3).await.unwrap_err();

        assert!(matches!(err, RoundTripError::RoundBudgetExceeded(3)));
        assert_eq!(provider.calls(), 3);
        assert_eq!(conversation.len(), 1 + 3 * 2);
    }

    #[tokio::test]
    async fn test_zero_budget_makes_no_calls() {
        let provider = Arc::new(ScriptedProvider::new(vec![final_answer("hi")]));
        let controller = controller(provider.clone());

        let mut conversation = Conversation::with_user_message("hi");
        let err = controller.run(&mut conversation, 0).await.unwrap_err();
        assert!(matches!(err, RoundTripError::RoundBudgetExceeded(0)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_call(
            "t1",
            "calculator",
            "1+1",
        )]));
        let controller = controller(provider.clone());

        let mut conversation = Conversation::with_user_message("What is 1+1?");
        let err = controller.run(&mut conversation, 4).await.unwrap_err();

        assert!(matches!(err, RoundTripError::UnknownTool(name) if name == "calculator"));
        assert_eq!(provider.calls(), 1);
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_tool_is_reported_to_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("t1", "web_search", "Miami GP winner"),
            final_answer("I could not search right now."),
        ]));
        let controller = controller(provider.clone());

        let mut conversation = Conversation::with_user_message("Who won the Miami GP?");
        let answer = controller.run(&mut conversation, 4).await.unwrap();

        assert_eq!(answer, "I could not search right now.");
        assert_eq!(provider.calls(), 2);
        match &conversation.messages()[2].content[0] {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "t1");
                assert!(content.contains("connection reset"));
                assert_eq!(*is_error, Some(true));
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refusal_is_unexpected() {
        let provider = Arc::new(ScriptedProvider::new(vec![response(
            vec![ContentBlock::text("no")],
            Some(StopReason::Refusal),
        )]));
        let controller = controller(provider);

        let mut conversation = Conversation::with_user_message("hi");
        let err = controller.run(&mut conversation, 2).await.unwrap_err();
        assert!(matches!(err, RoundTripError::UnexpectedStopReason(r) if r == "refusal"));
    }

    #[tokio::test]
    async fn test_round_timeout() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![final_answer("late")]).with_delay(Duration::from_secs(5)),
        );
        let config = AgentConfig::new("x").with_round_timeout(Duration::from_millis(20));
        let controller = RoundTripController::new(config, provider, registry());

        let mut conversation = Conversation::with_user_message("hi");
        let err = controller.run(&mut conversation, 2).await.unwrap_err();
        assert!(matches!(err, RoundTripError::RoundTimeout(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![final_answer("hi")]));
        let controller = controller(provider);
        controller.cancel_token().cancel();

        let mut conversation = Conversation::with_user_message("hi");
        let err = controller.run(&mut conversation, 2).await.unwrap_err();
        assert!(matches!(err, RoundTripError::Cancelled));
    }

    #[tokio::test]
    async fn test_streaming_forwards_fragments_in_order() {
        let provider = Arc::new(ScriptedProvider::streaming(vec![boxed(text_stream(
            &["Hel", "lo"],
            StopReason::EndTurn,
        ))]));
        let controller = controller(provider);

        let mut conversation = Conversation::with_user_message("Say hello");
        let mut sink: Vec<String> = Vec::new();
        let answer = controller
            .run_streaming(&mut conversation, 2, &mut sink)
            .await
            .unwrap();

        assert_eq!(sink, vec!["Hel".to_string(), "lo".to_string()]);
        assert_eq!(answer, "Hello");
        assert_eq!(conversation.last().unwrap().text(), "Hello");
    }

    #[tokio::test]
    async fn test_streaming_tool_round_trip() {
        let tool_events = vec![
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ContentBlockStart::ToolUse {
                    id: "t1".to_string(),
                    name: "wolfram_alpha".to_string(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: "{\"query\": ".to_string(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: "\"1+1\"}".to_string(),
                },
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::MessageDelta(MessageDeltaData {
                stop_reason: Some(StopReason::ToolUse),
                stop_sequence: None,
            }),
            StreamEvent::MessageStop,
        ];
        let provider = Arc::new(ScriptedProvider::streaming(vec![
            boxed(tool_events),
            boxed(text_stream(&["2"], StopReason::EndTurn)),
        ]));
        let controller = controller(provider.clone());

        let mut conversation = Conversation::with_user_message("What is 1+1?");
        let mut sink: Vec<String> = Vec::new();
        let answer = controller
            .run_streaming(&mut conversation, 4, &mut sink)
            .await
            .unwrap();

        assert_eq!(answer, "2");
        assert_eq!(provider.calls(), 2);
        assert_eq!(conversation.len(), 4);
        assert_eq!(
            conversation.messages()[1].content,
            vec![ContentBlock::tool_use("t1", "wolfram_alpha", json!({"query": "1+1"}))]
        );
    }

    #[tokio::test]
    async fn test_closed_sink_drops_stream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let events = text_stream(&["Hel", "lo"], StopReason::EndTurn);
        let provider = Arc::new(ScriptedProvider::streaming(vec![hanging(
            events,
            dropped.clone(),
        )]));
        let controller = controller(provider);

        let (mut tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        drop(rx);

        let mut conversation = Conversation::with_user_message("Say hello");
        let err = controller
            .run_streaming(&mut conversation, 2, &mut tx)
            .await
            .unwrap_err();

        assert!(matches!(err, RoundTripError::SinkClosed));
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(conversation.len(), 1);
    }

    /// Cancels the controller as soon as the first fragment arrives
    struct CancellingSink {
        cancel: CancellationToken,
        received: Vec<String>,
    }

    impl TextSink for CancellingSink {
        fn send_text(&mut self, fragment: &str) -> RoundTripResult<()> {
            self.received.push(fragment.to_string());
            self.cancel.cancel();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancellation_drops_stream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let events = vec![
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ContentBlockStart::Text {
                    text: String::new(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentDelta::TextDelta {
                    text: "Hel".to_string(),
                },
            },
        ];
        let provider = Arc::new(ScriptedProvider::streaming(vec![hanging(
            events,
            dropped.clone(),
        )]));
        let controller = controller(provider);

        let mut sink = CancellingSink {
            cancel: controller.cancel_token(),
            received: Vec::new(),
        };
        let mut conversation = Conversation::with_user_message("Say hello");
        let err = controller
            .run_streaming(&mut conversation, 2, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, RoundTripError::Cancelled));
        assert_eq!(sink.received, vec!["Hel".to_string()]);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_respond_without_streaming_sends_whole_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![final_answer("Hello there")]));
        let controller = controller(provider);

        let mut conversation = Conversation::new();
        let mut sink: Vec<String> = Vec::new();
        let answer = controller
            .respond(&mut conversation, "hi", &mut sink)
            .await
            .unwrap();

        assert_eq!(answer, "Hello there");
        assert_eq!(sink, vec!["Hello there".to_string()]);
        assert_eq!(conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_extra_tool_uses_are_answered() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            response(
                vec![
                    ContentBlock::tool_use("t0", "web_search", json!({"query": "1+1"})),
                    ContentBlock::tool_use("t1", "wolfram_alpha", json!({"query": "1+1"})),
                ],
                Some(StopReason::ToolUse),
            ),
            final_answer("2"),
        ]));
        let controller = controller(provider.clone());

        let mut conversation = Conversation::with_user_message("What is 1+1?");
        let answer = controller.run(&mut conversation, 4).await.unwrap();
        assert_eq!(answer, "2");

        let expected = vec![
            ContentBlock::tool_result("t0", NOT_EXECUTED, true),
            ContentBlock::tool_result("t1", "2", false),
        ];
        assert_eq!(conversation.messages()[2].content, expected);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[1].messages[2].content, expected);
    }

    /// Never finishes executing
    struct HangingTool {
        descriptor: ToolDescriptor,
    }

    impl HangingTool {
        fn new() -> Self {
            Self {
                descriptor: ToolDescriptor::new(
                    "web_search",
                    "search",
                    ToolInputSchema::single_string("query", "query"),
                ),
            }
        }
    }

    #[async_trait]
    impl Tool for HangingTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        async fn execute(&self, _input: &Value) -> Result<ToolResult> {
            futures::future::pending().await
        }
    }

    fn hanging_registry() -> Arc<ToolRegistry> {
        let mut tools = ToolRegistry::new();
        tools.register_tool(HangingTool::new()).unwrap();
        Arc::new(tools)
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_tool() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_call(
            "t1",
            "web_search",
            "Miami GP winner",
        )]));
        let controller =
            RoundTripController::new(AgentConfig::new("x"), provider, hanging_registry());

        let cancel = controller.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let mut conversation = Conversation::with_user_message("Who won the Miami GP?");
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            controller.run(&mut conversation, 4),
        )
        .await
        .expect("run should return once cancelled");

        assert!(matches!(result, Err(RoundTripError::Cancelled)));
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_past_deadline_is_reported_to_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_call("t1", "web_search", "Miami GP winner"),
            final_answer("The search timed out."),
        ]));
        let config = AgentConfig::new("x").with_round_timeout(Duration::from_millis(50));
        let controller = RoundTripController::new(config, provider.clone(), hanging_registry());

        let mut conversation = Conversation::with_user_message("Who won the Miami GP?");
        let answer = controller.run(&mut conversation, 4).await.unwrap();

        assert_eq!(answer, "The search timed out.");
        assert_eq!(provider.calls(), 2);
        match &conversation.messages()[2].content[0] {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                assert_eq!(tool_use_id, "t1");
                assert!(content.contains("timed out"));
                assert_eq!(*is_error, Some(true));
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_is_permanent() {
        let provider = Arc::new(ScriptedProvider::new(vec![final_answer("hi")]));
        let controller = controller(provider.clone());
        controller.cancel_token().cancel();

        for _ in 0..2 {
            let mut conversation = Conversation::with_user_message("hi");
            let err = controller.run(&mut conversation, 2).await.unwrap_err();
            assert!(matches!(err, RoundTripError::Cancelled));
        }
        assert_eq!(provider.calls(), 0);
    }

    /// Answers from the request itself, so concurrent conversations stay independent
    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn send_with_tools_and_system(&self, request: ChatRequest) -> Result<MessageResponse> {
            let question = request.messages[0].text();
            tokio::time::sleep(Duration::from_millis(10)).await;

            if request.messages.len() == 1 {
                Ok(tool_call(
                    &format!("call-{}", question),
                    "wolfram_alpha",
                    &question,
                ))
            } else {
                Ok(final_answer(&format!("answer to {}", question)))
            }
        }

        async fn stream_with_tools_and_system(&self, _request: ChatRequest) -> Result<EventStream> {
            anyhow::bail!("not streaming")
        }

        fn model(&self) -> String {
            "echo".to_string()
        }

        fn provider_name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_concurrent_conversations_share_one_controller() {
        let controller =
            RoundTripController::new(AgentConfig::new("x"), Arc::new(EchoProvider), registry());

        let mut first = Conversation::with_user_message("1+1");
        let mut second = Conversation::with_user_message("2+2");
        let (a, b) = tokio::join!(
            controller.run(&mut first, 4),
            controller.run(&mut second, 4)
        );

        assert_eq!(a.unwrap(), "answer to 1+1");
        assert_eq!(b.unwrap(), "answer to 2+2");

        for (conversation, question) in [(&first, "1+1"), (&second, "2+2")] {
            let messages = conversation.messages();
            assert_eq!(messages.len(), 4);
            assert_eq!(messages[0].text(), question);
            assert_eq!(
                messages[1].content,
                vec![ContentBlock::tool_use(
                    format!("call-{}", question),
                    "wolfram_alpha",
                    json!({ "query": question })
                )]
            );
            assert_eq!(
                messages[2].content,
                vec![ContentBlock::tool_result(format!("call-{}", question), "2", false)]
            );
            assert_eq!(messages[3].text(), format!("answer to {}", question));
        }
    }
}
