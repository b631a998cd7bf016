//! Per-kind action handling.
//!
//! The [`HandlerTable`] is the one place that knows what each
//! [`ActionKind`] means. The thinking stage decodes and validates through
//! it, the dispatcher executes through it, and the prompt formatter asks it
//! how to describe an action's input. No other stage matches on kind to
//! decide *how* to run something.

pub mod complete;
pub mod direct_response;
pub mod generate;
pub mod retrieve;
pub mod tool_call;

use async_trait::async_trait;
use reagent_core::action::{ActionKind, ActionPayload, ActionResult, AgentAction};
use reagent_core::agent::ExecutionMode;
use reagent_core::confirmation::ConfirmationTransport;
use reagent_core::context::AgentContext;
use reagent_core::event::{AgentEvent, EventSink};
use reagent_core::message::Message;
use reagent_core::retrieval::Retriever;
use reagent_core::stream::StreamSink;
use reagent_core::tool::{ToolCatalog, ToolInvoker};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::generation::Generator;
use crate::parser::{ParseError, ParseErrorCode, RawAction};
use crate::settings::EngineSettings;

pub use complete::CompleteHandler;
pub use direct_response::DirectResponseHandler;
pub use generate::GenerateHandler;
pub use retrieve::RetrieveHandler;
pub use tool_call::ToolCallHandler;

/// Read-only view of the context handed to worker tasks.
///
/// Workers never touch the [`AgentContext`] itself; the loop folds their
/// results in after the whole batch has joined.
pub struct ExecutionScope {
    pub mode: ExecutionMode,
    pub request_id: String,
    pub model_id: String,
    pub enabled_tools: Vec<String>,
    pub knowledge_ids: Vec<String>,
    /// Recent conversation, oldest first, for generation prompts
    pub history: Vec<Message>,
    pub cancel: CancellationToken,
    events: Option<Arc<dyn EventSink>>,
    stream: Option<Arc<dyn StreamSink>>,
}

impl ExecutionScope {
    pub fn from_context(ctx: &AgentContext, history_window: usize, cancel: CancellationToken) -> Self {
        Self {
            mode: ctx.mode,
            request_id: ctx.request_id.clone(),
            model_id: ctx.model_id.clone(),
            enabled_tools: ctx.enabled_tools.clone(),
            knowledge_ids: ctx.knowledge_ids.clone(),
            history: ctx.recent_messages(history_window).to_vec(),
            cancel,
            events: ctx.event_sink(),
            stream: ctx.stream_sink(),
        }
    }

    pub fn publish(&self, event: AgentEvent) {
        if let Some(sink) = &self.events {
            sink.publish(event);
        }
    }

    pub fn stream_sink(&self) -> Option<&Arc<dyn StreamSink>> {
        self.stream.as_ref()
    }

    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == tool_name)
    }
}

/// Decoding, validation, execution and prompt rendering for one kind.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> ActionKind;

    /// Build the typed payload from a raw decision entry.
    fn decode(&self, raw: &RawAction, ctx: &AgentContext) -> Result<ActionPayload, ParseError>;

    /// Checks that need collaborators, run after decoding.
    async fn validate(&self, _action: &AgentAction) -> Result<(), ParseError> {
        Ok(())
    }

    /// Run the action. Failures are reported in the result, never raised.
    async fn execute(&self, action: &AgentAction, scope: &ExecutionScope) -> ActionResult;

    /// One-line description of what the action was asked to do.
    fn describe_input(&self, result: &ActionResult) -> String;
}

/// Collaborators the standard handlers need.
pub struct HandlerDeps {
    pub generator: Generator,
    pub catalog: Arc<dyn ToolCatalog>,
    pub invoker: Arc<dyn ToolInvoker>,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub confirmations: Arc<dyn ConfirmationTransport>,
}

#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler for every kind.
    pub fn standard(deps: HandlerDeps, settings: &EngineSettings) -> Self {
        let mut table = Self::new();
        table.register(Arc::new(ToolCallHandler::new(
            deps.catalog,
            deps.invoker,
            deps.confirmations,
            settings.confirmation_timeout,
        )));
        table.register(Arc::new(RetrieveHandler::new(deps.retriever)));
        table.register(Arc::new(GenerateHandler::new(deps.generator, settings.temperature)));
        table.register(Arc::new(DirectResponseHandler::new(
            settings.token_delay_min,
            settings.token_delay_max,
        )));
        table.register(Arc::new(CompleteHandler));
        table
    }

    /// Register a handler, replacing any existing one for its kind.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: ActionKind) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(&kind)
    }

    /// Decode and validate one decision entry into an action.
    pub async fn build_action(&self, raw: &RawAction, ctx: &AgentContext) -> Result<AgentAction, ParseError> {
        let Some(handler) = self.get(raw.kind) else {
            return Err(ParseError::new(
                ParseErrorCode::ActionTypeInvalid,
                format!("{} actions are not supported here", raw.kind),
            ));
        };

        let payload = handler.decode(raw, ctx)?;
        let name = raw
            .name
            .clone()
            .or_else(|| match &payload {
                ActionPayload::ToolCall(p) => Some(p.tool_name.clone()),
                _ => None,
            })
            .unwrap_or_else(|| raw.kind.as_str().to_string());

        let mut action = AgentAction::new(name, payload);
        action.reasoning = raw.reasoning.clone();
        handler.validate(&action).await?;
        Ok(action)
    }

    pub fn describe_input(&self, result: &ActionResult) -> String {
        match self.get(result.kind) {
            Some(handler) => handler.describe_input(result),
            None => result.name.clone(),
        }
    }
}

/// The payload's parameter object, as echoed into result metadata.
fn payload_params(payload: &ActionPayload) -> Value {
    serde_json::to_value(payload)
        .ok()
        .and_then(|mut v| v.get_mut("params").map(Value::take))
        .unwrap_or(Value::Null)
}

/// Stamp duration, echoed params and reasoning onto a handler's result.
pub(crate) fn annotate(action: &AgentAction, result: ActionResult, started: Instant) -> ActionResult {
    let mut result = result
        .with_duration(started.elapsed().as_millis() as u64)
        .with_metadata("params", payload_params(&action.payload));
    if let Some(reasoning) = &action.reasoning {
        result = result.with_metadata("reasoning", reasoning.clone());
    }
    result
}

/// Echoed parameter `key`, if the result carries one.
pub(crate) fn echoed_param<'a>(result: &'a ActionResult, key: &str) -> Option<&'a Value> {
    result.metadata.get("params").and_then(|p| p.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::render_result;
    use crate::parser::parse_decision;
    use crate::test_helpers::{ScriptedTool, SequentialMockProvider, test_context};
    use reagent_core::action::ErrorKind;
    use reagent_core::confirmation::InProcessConfirmations;
    use reagent_core::tool::ToolRegistry;
    use serde_json::json;
    use std::time::Duration;

    fn table() -> HandlerTable {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ScriptedTool::new("get_weather", json!({"temp": 18}))));
        let registry = Arc::new(registry);
        let deps = HandlerDeps {
            generator: Generator::new(Arc::new(SequentialMockProvider::texts(&[])), Duration::from_secs(5)),
            catalog: registry.clone(),
            invoker: registry,
            retriever: None,
            confirmations: Arc::new(InProcessConfirmations::new()),
        };
        HandlerTable::standard(deps, &EngineSettings::default())
    }

    async fn build(text: &str) -> Result<Vec<AgentAction>, ParseError> {
        let table = table();
        let ctx = test_context();
        let decision = parse_decision(text).unwrap();
        let mut actions = Vec::new();
        for raw in &decision.actions {
            actions.push(table.build_action(raw, &ctx).await?);
        }
        Ok(actions)
    }

    #[tokio::test]
    async fn every_kind_has_a_handler() {
        let table = table();
        for kind in ActionKind::ALL {
            assert_eq!(table.get(kind).unwrap().kind(), kind);
        }
    }

    #[tokio::test]
    async fn tool_name_falls_back_to_action_name() {
        let actions = build(r#"{"actions":[{"actionType":"TOOL_CALL","actionName":"get_weather","toolCallParams":{"toolParams":{"city":"Paris"}}}]}"#)
            .await
            .unwrap();
        assert_eq!(actions[0].tool_name(), Some("get_weather"));
        assert_eq!(actions[0].name, "get_weather");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_validation_error() {
        let err = build(r#"{"actions":[{"actionType":"TOOL_CALL","toolCallParams":{"toolName":"launch_rockets"}}]}"#)
            .await
            .unwrap_err();
        assert_eq!(err.code, ParseErrorCode::ToolNotFound);
    }

    #[tokio::test]
    async fn missing_payloads_are_reported_per_kind() {
        let cases = [
            (r#"{"actions":[{"actionType":"TOOL_CALL"}]}"#, ParseErrorCode::ToolParamsMissing),
            (r#"{"actions":[{"actionType":"TOOL_CALL","toolCallParams":{}}]}"#, ParseErrorCode::ToolNameMissing),
            (r#"{"actions":[{"actionType":"RAG_RETRIEVE"}]}"#, ParseErrorCode::RetrieveParamsMissing),
            (r#"{"actions":[{"actionType":"RAG_RETRIEVE","ragRetrieveParams":{"query":" "}}]}"#, ParseErrorCode::RetrieveQueryMissing),
            (r#"{"actions":[{"actionType":"LLM_GENERATE"}]}"#, ParseErrorCode::GenerateParamsMissing),
            (r#"{"actions":[{"actionType":"LLM_GENERATE","llmGenerateParams":{}}]}"#, ParseErrorCode::GeneratePromptMissing),
            (r#"{"actions":[{"actionType":"DIRECT_RESPONSE"}]}"#, ParseErrorCode::DirectParamsMissing),
            (r#"{"actions":[{"actionType":"DIRECT_RESPONSE","directResponseParams":{"content":""}}]}"#, ParseErrorCode::DirectContentMissing),
        ];
        for (text, code) in cases {
            assert_eq!(build(text).await.unwrap_err().code, code, "for {text}");
        }
    }

    #[tokio::test]
    async fn one_bad_entry_rejects_the_batch() {
        let text = r#"{"actions":[
            {"actionType":"DIRECT_RESPONSE","directResponseParams":{"content":"hi"}},
            {"actionType":"TOOL_CALL","toolCallParams":{"toolName":"nope"}}
        ]}"#;
        assert!(build(text).await.is_err());
    }

    #[tokio::test]
    async fn retrieval_scope_defaults_to_context() {
        let actions = build(r#"{"actions":[{"actionType":"RAG_RETRIEVE","ragRetrieveParams":{"query":"react loop"}}]}"#)
            .await
            .unwrap();
        match &actions[0].payload {
            ActionPayload::Retrieve(p) => assert_eq!(p.knowledge_ids, vec!["docs".to_string()]),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn rendered_result_has_three_lines() {
        let table = table();
        let action = AgentAction::tool_call("get_weather", json!({"city": "Paris"}).as_object().unwrap().clone());
        let ok = annotate(&action, ActionResult::success(&action, "{\"temp\":18}"), Instant::now());
        let rendered = render_result(&table, &ok);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Status: success"));
        assert_eq!(lines[1], r#"Input: get_weather {"city":"Paris"}"#);
        assert_eq!(lines[2], r#"Output: {"temp":18}"#);

        let failed = annotate(
            &action,
            ActionResult::failure(&action, "User rejected the tool call", ErrorKind::UserRejected),
            Instant::now(),
        );
        let rendered = render_result(&table, &failed);
        assert!(rendered.contains("[USER_REJECTED]"));
        assert!(rendered.ends_with("Error: User rejected the tool call"));
    }
}
