//! Actions the agent can take and the results they produce.
//!
//! An [`AgentAction`] is a tagged union: the [`ActionPayload`] variant *is*
//! the action kind, so a tool call can never carry retrieval parameters.
//! Decoding from model output happens in the engine's parser; once an
//! action exists it is well-formed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// The closed set of things the agent can do in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ToolCall,
    Retrieve,
    Generate,
    DirectResponse,
    /// Legacy terminal marker, still accepted from older prompts
    Complete,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::ToolCall,
        ActionKind::Retrieve,
        ActionKind::Generate,
        ActionKind::DirectResponse,
        ActionKind::Complete,
    ];

    /// Snake-case name used in config files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::Retrieve => "retrieve",
            Self::Generate => "generate",
            Self::DirectResponse => "direct_response",
            Self::Complete => "complete",
        }
    }

    /// The discriminator the model is asked to emit.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::ToolCall => "TOOL_CALL",
            Self::Retrieve => "RAG_RETRIEVE",
            Self::Generate => "LLM_GENERATE",
            Self::DirectResponse => "DIRECT_RESPONSE",
            Self::Complete => "COMPLETE",
        }
    }

    /// Parse a discriminator leniently: case-insensitive, with the short
    /// and long spellings of retrieval and generation both accepted.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "TOOL_CALL" | "TOOL" => Some(Self::ToolCall),
            "RAG_RETRIEVE" | "RETRIEVE" | "RAG" => Some(Self::Retrieve),
            "LLM_GENERATE" | "GENERATE" => Some(Self::Generate),
            "DIRECT_RESPONSE" | "DIRECT" => Some(Self::DirectResponse),
            "COMPLETE" => Some(Self::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub tool_name: String,

    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveParams {
    pub query: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectResponseParams {
    pub content: String,

    /// Whether this answer ends the run
    #[serde(default = "default_true")]
    pub is_complete: bool,

    /// Whether to emit the content token by token
    #[serde(default = "default_true")]
    pub streaming: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Exactly one parameter payload, selected by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum ActionPayload {
    ToolCall(ToolCallParams),
    Retrieve(RetrieveParams),
    Generate(GenerateParams),
    DirectResponse(DirectResponseParams),
    Complete(CompleteParams),
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::ToolCall(_) => ActionKind::ToolCall,
            Self::Retrieve(_) => ActionKind::Retrieve,
            Self::Generate(_) => ActionKind::Generate,
            Self::DirectResponse(_) => ActionKind::DirectResponse,
            Self::Complete(_) => ActionKind::Complete,
        }
    }
}

/// One step the agent decided to take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub id: String,

    /// Short name (tool name for tool calls)
    pub name: String,

    /// The model's stated reason for this action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    pub payload: ActionPayload,
}

impl AgentAction {
    pub fn new(name: impl Into<String>, payload: ActionPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            reasoning: None,
            payload,
        }
    }

    pub fn tool_call(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        let tool_name = tool_name.into();
        Self::new(
            tool_name.clone(),
            ActionPayload::ToolCall(ToolCallParams { tool_name, arguments }),
        )
    }

    pub fn retrieve(query: impl Into<String>, knowledge_ids: Vec<String>) -> Self {
        Self::new(
            "rag_retrieve",
            ActionPayload::Retrieve(RetrieveParams {
                query: query.into(),
                knowledge_ids,
                max_results: None,
                similarity_threshold: None,
            }),
        )
    }

    pub fn generate(prompt: impl Into<String>) -> Self {
        Self::new(
            "llm_generate",
            ActionPayload::Generate(GenerateParams {
                prompt: prompt.into(),
                system_prompt: None,
                temperature: None,
                max_tokens: None,
            }),
        )
    }

    pub fn direct_response(content: impl Into<String>) -> Self {
        Self::new(
            "direct_response",
            ActionPayload::DirectResponse(DirectResponseParams {
                content: content.into(),
                is_complete: true,
                streaming: true,
            }),
        )
    }

    pub fn complete(summary: Option<String>) -> Self {
        Self::new("complete", ActionPayload::Complete(CompleteParams { summary }))
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    /// A final answer that ends the run when observed.
    pub fn is_terminal_answer(&self) -> bool {
        match &self.payload {
            ActionPayload::DirectResponse(p) => p.is_complete,
            ActionPayload::Complete(_) => true,
            _ => false,
        }
    }

    /// The tool name, for tool calls.
    pub fn tool_name(&self) -> Option<&str> {
        match &self.payload {
            ActionPayload::ToolCall(p) => Some(&p.tool_name),
            _ => None,
        }
    }
}

/// Why an action failed. Reflection classifies retryability by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ToolCallError,
    RetrieveError,
    GenerateError,
    DirectResponseError,
    ToolNotAllowed,
    UserRejected,
    ConfirmationTimeout,
    Exception,
    Cancelled,
    Validation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCallError => "TOOL_CALL_ERROR",
            Self::RetrieveError => "RAG_RETRIEVE_ERROR",
            Self::GenerateError => "LLM_GENERATE_ERROR",
            Self::DirectResponseError => "DIRECT_RESPONSE_ERROR",
            Self::ToolNotAllowed => "TOOL_NOT_ALLOWED",
            Self::UserRejected => "USER_REJECTED",
            Self::ConfirmationTimeout => "CONFIRMATION_TIMEOUT",
            Self::Exception => "EXCEPTION",
            Self::Cancelled => "CANCELLED",
            Self::Validation => "VALIDATION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of executing one [`AgentAction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// Id of the action that produced this result
    pub action_id: String,

    pub kind: ActionKind,

    pub name: String,

    pub success: bool,

    /// Result payload (display string or structured value)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Wall-clock execution time
    pub duration_ms: u64,

    /// Echoed parameters and raw identifiers, read back when rendering prompts
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ActionResult {
    pub fn success(action: &AgentAction, data: impl Into<Value>) -> Self {
        Self {
            action_id: action.id.clone(),
            kind: action.kind(),
            name: action.name.clone(),
            success: true,
            data: Some(data.into()),
            error: None,
            error_kind: None,
            duration_ms: 0,
            metadata: Map::new(),
        }
    }

    pub fn failure(action: &AgentAction, error: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            action_id: action.id.clone(),
            kind: action.kind(),
            name: action.name.clone(),
            success: false,
            data: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            duration_ms: 0,
            metadata: Map::new(),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The payload as display text: strings pass through, anything else
    /// is serialized as JSON.
    pub fn data_text(&self) -> String {
        match &self.data {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}
