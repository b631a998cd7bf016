//! `TOOL_CALL`: resolve, optionally wait for a human, then invoke.

use async_trait::async_trait;
use reagent_core::action::{ActionKind, ActionPayload, ActionResult, AgentAction, ErrorKind, ToolCallParams};
use reagent_core::agent::ExecutionMode;
use reagent_core::confirmation::{ConfirmationDecision, ConfirmationTransport};
use reagent_core::context::AgentContext;
use reagent_core::event::AgentEvent;
use reagent_core::tool::{ToolCatalog, ToolInvoker};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ActionHandler, ExecutionScope, annotate, echoed_param};
use crate::parser::{ParseError, ParseErrorCode, RawAction, string_field};

pub struct ToolCallHandler {
    catalog: Arc<dyn ToolCatalog>,
    invoker: Arc<dyn ToolInvoker>,
    confirmations: Arc<dyn ConfirmationTransport>,
    confirmation_timeout: Duration,
}

/// Strings pass through, maps and lists become JSON, other scalars are
/// stringified.
pub fn normalize_output(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl ToolCallHandler {
    pub fn new(
        catalog: Arc<dyn ToolCatalog>,
        invoker: Arc<dyn ToolInvoker>,
        confirmations: Arc<dyn ConfirmationTransport>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            invoker,
            confirmations,
            confirmation_timeout,
        }
    }

    /// Fail without invoking the tool, telling subscribers why.
    fn refuse(
        &self,
        action: &AgentAction,
        scope: &ExecutionScope,
        execution_id: &str,
        tool_name: &str,
        message: String,
        kind: ErrorKind,
    ) -> ActionResult {
        warn!(tool = tool_name, tool_execution_id = execution_id, error_kind = %kind, "{message}");
        scope.publish(AgentEvent::ToolResult {
            tool_execution_id: execution_id.to_string(),
            tool_name: tool_name.to_string(),
            success: false,
            output: None,
            error: Some(message.clone()),
            duration_ms: 0,
        });
        ActionResult::failure(action, message, kind).with_metadata("tool_execution_id", execution_id)
    }

    async fn run(&self, action: &AgentAction, params: &ToolCallParams, scope: &ExecutionScope) -> ActionResult {
        let tool_name = params.tool_name.as_str();
        let Some(descriptor) = self.catalog.resolve(tool_name).await else {
            return ActionResult::failure(action, format!("Tool not found: {tool_name}"), ErrorKind::ToolCallError);
        };

        let execution_id = Uuid::new_v4().to_string();
        let gated = scope.mode == ExecutionMode::Manual;
        let arguments = Value::Object(params.arguments.clone());

        if gated && let Err(e) = self.confirmations.register(&execution_id).await {
            return ActionResult::failure(action, format!("Could not request confirmation: {e}"), ErrorKind::ToolCallError)
                .with_metadata("tool_execution_id", execution_id);
        }

        scope.publish(AgentEvent::ToolCall {
            tool_execution_id: execution_id.clone(),
            tool_name: tool_name.to_string(),
            params: arguments.clone(),
            requires_confirmation: gated,
            mode: scope.mode.as_str().to_string(),
        });

        if gated {
            info!(tool = tool_name, tool_execution_id = %execution_id, "Waiting for confirmation");
            let wait = self.confirmations.await_decision(&execution_id, self.confirmation_timeout);
            tokio::pin!(wait);
            let decision = tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => {
                    self.confirmations.reject(&execution_id).await;
                    wait.await;
                    return self.refuse(
                        action,
                        scope,
                        &execution_id,
                        tool_name,
                        "Stopped while waiting for confirmation".into(),
                        ErrorKind::Cancelled,
                    );
                }
                decision = &mut wait => decision,
            };
            match decision {
                ConfirmationDecision::Approved => debug!(tool_execution_id = %execution_id, "Tool call approved"),
                ConfirmationDecision::Rejected => {
                    return self.refuse(
                        action,
                        scope,
                        &execution_id,
                        tool_name,
                        "User rejected the tool call".into(),
                        ErrorKind::UserRejected,
                    );
                }
                ConfirmationDecision::Timeout => {
                    return self.refuse(
                        action,
                        scope,
                        &execution_id,
                        tool_name,
                        format!("No decision within {}s", self.confirmation_timeout.as_secs()),
                        ErrorKind::ConfirmationTimeout,
                    );
                }
            }
        }

        if !scope.is_tool_allowed(tool_name) {
            return self.refuse(
                action,
                scope,
                &execution_id,
                tool_name,
                format!("Tool '{tool_name}' is not enabled for this conversation"),
                ErrorKind::ToolNotAllowed,
            );
        }

        scope.publish(AgentEvent::ToolExecuting {
            tool_execution_id: execution_id.clone(),
            tool_name: tool_name.to_string(),
        });

        let started = Instant::now();
        let outcome = self.invoker.invoke(&descriptor, arguments).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(value) => {
                let output = normalize_output(value);
                debug!(tool = tool_name, duration_ms, output_len = output.len(), "Tool succeeded");
                scope.publish(AgentEvent::ToolResult {
                    tool_execution_id: execution_id.clone(),
                    tool_name: tool_name.to_string(),
                    success: true,
                    output: Some(output.clone()),
                    error: None,
                    duration_ms,
                });
                ActionResult::success(action, output)
            }
            Err(e) => {
                warn!(tool = tool_name, error = %e, "Tool failed");
                scope.publish(AgentEvent::ToolResult {
                    tool_execution_id: execution_id.clone(),
                    tool_name: tool_name.to_string(),
                    success: false,
                    output: None,
                    error: Some(e.to_string()),
                    duration_ms,
                });
                ActionResult::failure(action, e.to_string(), ErrorKind::ToolCallError)
            }
        };
        result.with_metadata("tool_execution_id", execution_id)
    }
}

#[async_trait]
impl ActionHandler for ToolCallHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::ToolCall
    }

    fn decode(&self, raw: &RawAction, _ctx: &AgentContext) -> Result<ActionPayload, ParseError> {
        let Some(params) = raw.params(&["toolCallParams"]) else {
            return Err(ParseError::new(ParseErrorCode::ToolParamsMissing, "TOOL_CALL without toolCallParams"));
        };
        let Some(tool_name) = string_field(params, &["toolName", "name"]).or(raw.name.as_deref()) else {
            return Err(ParseError::new(ParseErrorCode::ToolNameMissing, "TOOL_CALL without a tool name"));
        };
        let arguments = ["toolParams", "arguments", "args"]
            .iter()
            .find_map(|key| params.get(*key).and_then(Value::as_object))
            .cloned()
            .unwrap_or_else(Map::new);

        Ok(ActionPayload::ToolCall(ToolCallParams {
            tool_name: tool_name.to_string(),
            arguments,
        }))
    }

    async fn validate(&self, action: &AgentAction) -> Result<(), ParseError> {
        let Some(tool_name) = action.tool_name() else {
            return Ok(());
        };
        if self.catalog.resolve(tool_name).await.is_none() {
            return Err(ParseError::new(
                ParseErrorCode::ToolNotFound,
                format!("tool '{tool_name}' does not exist"),
            ));
        }
        Ok(())
    }

    async fn execute(&self, action: &AgentAction, scope: &ExecutionScope) -> ActionResult {
        let started = Instant::now();
        let result = match &action.payload {
            ActionPayload::ToolCall(params) => self.run(action, params, scope).await,
            _ => ActionResult::failure(action, "Not a tool call", ErrorKind::Validation),
        };
        annotate(action, result, started)
    }

    fn describe_input(&self, result: &ActionResult) -> String {
        let tool = echoed_param(result, "tool_name")
            .and_then(Value::as_str)
            .unwrap_or(&result.name);
        match echoed_param(result, "arguments") {
            Some(arguments) => format!("{tool} {arguments}"),
            None => tool.to_string(),
        }
    }
}
