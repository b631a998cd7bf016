//! Shared test doubles for the engine's unit tests.

use async_trait::async_trait;
use reagent_core::confirmation::{ConfirmationTransport, InProcessConfirmations};
use reagent_core::context::AgentContext;
use reagent_core::error::{ProviderError, RetrievalError, ToolError};
use reagent_core::event::{AgentEvent, EventSink};
use reagent_core::message::{ConversationId, Message};
use reagent_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use reagent_core::retrieval::{KnowledgeBase, RetrievalRequest, RetrievalResult, RetrievedDocument, Retriever};
use reagent_core::stream::StreamSink;
use reagent_core::tool::{Tool, ToolRegistry};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::actions::{HandlerDeps, HandlerTable};
use crate::generation::Generator;
use crate::settings::EngineSettings;

/// Lock that survives a panicking test double.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Script {
    Sequence(Vec<ProviderResponse>),
    Repeat(ProviderResponse),
    Fail(String),
}

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue.
/// Panics if more calls are made than responses provided.
pub struct SequentialMockProvider {
    script: Script,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::scripted(Script::Sequence(responses))
    }

    fn scripted(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One text reply per call, in order.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| make_text_response(t)).collect())
    }

    /// The same reply for every call.
    pub fn repeating(text: &str) -> Self {
        Self::scripted(Script::Repeat(make_text_response(text)))
    }

    /// Every call fails with an API error.
    pub fn failing(message: &str) -> Self {
        Self::scripted(Script::Fail(message.to_string()))
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        lock(&self.requests).last().cloned()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = lock(&self.requests);
            requests.push(request);
            requests.len() - 1
        };

        match &self.script {
            Script::Sequence(responses) => match responses.get(call) {
                Some(response) => Ok(response.clone()),
                None => panic!(
                    "SequentialMockProvider: no more responses (call #{}, have {})",
                    call,
                    responses.len()
                ),
            },
            Script::Repeat(response) => Ok(response.clone()),
            Script::Fail(message) => Err(ProviderError::ApiError {
                status_code: 503,
                message: message.clone(),
            }),
        }
    }
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// A provider that never answers.
pub struct StalledProvider;

#[async_trait]
impl Provider for StalledProvider {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }
}

pub fn test_context() -> AgentContext {
    AgentContext::new(ConversationId::from("conv-test"), "test-model")
        .with_request_id("req-test")
        .with_knowledge(vec![KnowledgeBase {
            id: "docs".into(),
            name: "Docs".into(),
            description: None,
        }])
}

/// Standard handlers over an empty registry and an unscripted provider.
pub fn standard_table() -> HandlerTable {
    let registry = Arc::new(ToolRegistry::new());
    let deps = HandlerDeps {
        generator: Generator::new(Arc::new(SequentialMockProvider::texts(&[])), Duration::from_secs(5)),
        catalog: registry.clone(),
        invoker: registry,
        retriever: None,
        confirmations: Arc::new(InProcessConfirmations::new()),
    };
    HandlerTable::standard(deps, &EngineSettings::default())
}

/// A tool with a fixed output, counting calls and peak concurrency.
pub struct ScriptedTool {
    name: String,
    output: Result<Value, String>,
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTool {
    pub fn new(name: &str, output: Value) -> Self {
        Self {
            name: name.to_string(),
            output: Ok(output),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self {
            output: Err(reason.to_string()),
            ..Self::new(name, Value::Null)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Scripted test tool"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        self.output.clone().map_err(|reason| ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason,
        })
    }
}

/// Returns every document it was built with, remembering the last request.
pub struct FixedRetriever {
    documents: Vec<RetrievedDocument>,
    last: Mutex<Option<RetrievalRequest>>,
}

impl FixedRetriever {
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        Self {
            documents,
            last: Mutex::new(None),
        }
    }

    pub fn last_request(&self) -> Option<RetrievalRequest> {
        lock(&self.last).clone()
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult, RetrievalError> {
        *lock(&self.last) = Some(request.clone());
        Ok(RetrievalResult {
            documents: self.documents.clone(),
            total_count: self.documents.len(),
            max_score: self.documents.iter().map(|d| d.score).fold(0.0, f32::max),
        })
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<AgentEvent>>,
}

impl RecordingEvents {
    pub fn all(&self) -> Vec<AgentEvent> {
        lock(&self.events).clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(AgentEvent::event_type).collect()
    }
}

impl EventSink for RecordingEvents {
    fn publish(&self, event: AgentEvent) {
        lock(&self.events).push(event);
    }
}

/// Answers every confirmation request it sees, like a user clicking a
/// button the moment it appears.
pub struct AutoDecider {
    transport: Arc<dyn ConfirmationTransport>,
    approve: bool,
    recorded: RecordingEvents,
}

impl AutoDecider {
    pub fn approving(transport: Arc<dyn ConfirmationTransport>) -> Self {
        Self {
            transport,
            approve: true,
            recorded: RecordingEvents::default(),
        }
    }

    pub fn rejecting(transport: Arc<dyn ConfirmationTransport>) -> Self {
        Self {
            approve: false,
            ..Self::approving(transport)
        }
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.recorded.all()
    }
}

impl EventSink for AutoDecider {
    fn publish(&self, event: AgentEvent) {
        if let AgentEvent::ToolCall {
            tool_execution_id,
            requires_confirmation: true,
            ..
        } = &event
        {
            let transport = self.transport.clone();
            let id = tool_execution_id.clone();
            let approve = self.approve;
            tokio::spawn(async move {
                if approve {
                    transport.approve(&id).await;
                } else {
                    transport.reject(&id).await;
                }
            });
        }
        self.recorded.publish(event);
    }
}

#[derive(Default)]
pub struct RecordingStream {
    tokens: Mutex<Vec<String>>,
    completed: Mutex<Option<String>>,
}

impl RecordingStream {
    pub fn tokens(&self) -> Vec<String> {
        lock(&self.tokens).clone()
    }

    pub fn text(&self) -> String {
        lock(&self.tokens).concat()
    }

    pub fn completed(&self) -> Option<String> {
        lock(&self.completed).clone()
    }
}

impl StreamSink for RecordingStream {
    fn on_token(&self, token: &str) {
        lock(&self.tokens).push(token.to_string());
    }

    fn on_complete(&self, full_text: &str) {
        *lock(&self.completed) = Some(full_text.to_string());
    }
}
