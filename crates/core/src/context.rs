//! Per-turn agent context.
//!
//! One [`AgentContext`] exists per in-flight conversation turn. The loop
//! driver owns it mutably for the whole run; worker tasks only ever see
//! read-only snapshots, and the event/stream sinks are runtime handles that
//! are never serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::action::{ActionPayload, ActionResult, AgentAction, ErrorKind};
use crate::agent::ExecutionMode;
use crate::event::{AgentEvent, EventSink};
use crate::message::{ConversationId, Message, Role};
use crate::retrieval::KnowledgeBase;
use crate::stream::StreamSink;

/// A tool invocation, kept for prompts and loop detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub params: Value,
    pub result: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRecord {
    pub query: String,
    pub knowledge_ids: Vec<String>,
    pub result_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of the most recent action: data on success, error otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LastActionOutcome {
    Succeeded {
        #[serde(default)]
        data: Option<Value>,
    },
    Failed {
        error: String,
        #[serde(default)]
        error_kind: Option<ErrorKind>,
    },
}

impl LastActionOutcome {
    pub fn from_result(result: &ActionResult) -> Self {
        if result.success {
            Self::Succeeded {
                data: result.data.clone(),
            }
        } else {
            Self::Failed {
                error: result.error.clone().unwrap_or_default(),
                error_kind: result.error_kind,
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub conversation_id: ConversationId,

    /// Key for out-of-band stop requests
    #[serde(default)]
    pub request_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Ordered conversation history
    #[serde(default)]
    pub messages: Vec<Message>,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Tool groups shown to the model (empty = all)
    #[serde(default)]
    pub enabled_groups: Vec<String>,

    /// Tool allow-list (empty = all)
    #[serde(default)]
    pub enabled_tools: Vec<String>,

    pub model_id: String,

    #[serde(default)]
    iterations: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<LastActionOutcome>,

    #[serde(default)]
    pub tool_call_history: Vec<ToolCallRecord>,

    #[serde(default)]
    pub retrieval_history: Vec<RetrievalRecord>,

    /// Action results grouped by iteration
    #[serde(default)]
    pub execution_history: Vec<Vec<ActionResult>>,

    #[serde(default)]
    pub knowledge_ids: Vec<String>,

    #[serde(default)]
    pub knowledge_bases: Vec<KnowledgeBase>,

    /// Pre-fetched retrieval summary for the first prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_knowledge: Option<String>,

    #[serde(skip)]
    events: Option<Arc<dyn EventSink>>,

    #[serde(skip)]
    stream: Option<Arc<dyn StreamSink>>,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("conversation_id", &self.conversation_id)
            .field("request_id", &self.request_id)
            .field("mode", &self.mode)
            .field("model_id", &self.model_id)
            .field("iterations", &self.iterations)
            .field("messages", &self.messages.len())
            .field("tool_calls", &self.tool_call_history.len())
            .field("retrievals", &self.retrieval_history.len())
            .field("has_event_sink", &self.events.is_some())
            .field("has_stream_sink", &self.stream.is_some())
            .finish()
    }
}

impl AgentContext {
    pub fn new(conversation_id: ConversationId, model_id: impl Into<String>) -> Self {
        Self {
            request_id: conversation_id.to_string(),
            conversation_id,
            agent_id: None,
            messages: Vec::new(),
            mode: ExecutionMode::Auto,
            enabled_groups: Vec::new(),
            enabled_tools: Vec::new(),
            model_id: model_id.into(),
            iterations: 0,
            last_outcome: None,
            tool_call_history: Vec::new(),
            retrieval_history: Vec::new(),
            execution_history: Vec::new(),
            knowledge_ids: Vec::new(),
            knowledge_bases: Vec::new(),
            initial_knowledge: None,
            events: None,
            stream: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_enabled_tools(mut self, tools: Vec<String>) -> Self {
        self.enabled_tools = tools;
        self
    }

    pub fn with_enabled_groups(mut self, groups: Vec<String>) -> Self {
        self.enabled_groups = groups;
        self
    }

    pub fn with_knowledge(mut self, bases: Vec<KnowledgeBase>) -> Self {
        self.knowledge_ids = bases.iter().map(|kb| kb.id.clone()).collect();
        self.knowledge_bases = bases;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn with_stream_sink(mut self, sink: Arc<dyn StreamSink>) -> Self {
        self.stream = Some(sink);
        self
    }

    /// Re-attach runtime sinks after loading a persisted context.
    pub fn attach_sinks(
        &mut self,
        events: Option<Arc<dyn EventSink>>,
        stream: Option<Arc<dyn StreamSink>>,
    ) {
        self.events = events;
        self.stream = stream;
    }

    pub fn event_sink(&self) -> Option<Arc<dyn EventSink>> {
        self.events.clone()
    }

    pub fn stream_sink(&self) -> Option<Arc<dyn StreamSink>> {
        self.stream.clone()
    }

    /// Fire-and-forget publish to the attached event sink, if any.
    pub fn publish(&self, event: AgentEvent) {
        if let Some(sink) = &self.events {
            sink.publish(event);
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Advance the iteration counter. It never goes backwards.
    pub fn bump_iteration(&mut self) -> u32 {
        self.iterations = self.iterations.saturating_add(1);
        self.iterations
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The last `n` messages, oldest first.
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    /// Whether the allow-list admits `tool_name`.
    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == tool_name)
    }

    pub fn record_outcome(&mut self, result: &ActionResult) {
        self.last_outcome = Some(LastActionOutcome::from_result(result));
    }

    /// Append one executed batch to the per-type histories and to the
    /// iteration-grouped execution history.
    pub fn record_batch(&mut self, actions: &[AgentAction], results: &[ActionResult]) {
        let now = Utc::now();
        for (action, result) in actions.iter().zip(results) {
            match &action.payload {
                ActionPayload::ToolCall(params) => {
                    // Refused calls never reached the tool
                    if matches!(
                        result.error_kind,
                        Some(ErrorKind::UserRejected | ErrorKind::ConfirmationTimeout | ErrorKind::ToolNotAllowed)
                    ) {
                        continue;
                    }
                    self.tool_call_history.push(ToolCallRecord {
                        tool_name: params.tool_name.clone(),
                        params: Value::Object(params.arguments.clone()),
                        result: if result.success {
                            result.data_text()
                        } else {
                            result.error.clone().unwrap_or_default()
                        },
                        success: result.success,
                        timestamp: now,
                    });
                }
                ActionPayload::Retrieve(params) => {
                    let result_count = result
                        .metadata
                        .get("result_count")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as usize;
                    self.retrieval_history.push(RetrievalRecord {
                        query: params.query.clone(),
                        knowledge_ids: params.knowledge_ids.clone(),
                        result_count,
                        timestamp: now,
                    });
                }
                _ => {}
            }
        }
        self.execution_history.push(results.to_vec());
    }
}
