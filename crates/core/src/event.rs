//! Progress events published while the loop runs.
//!
//! Publishing is fire-and-forget: a slow or absent subscriber must never
//! stall the loop, so [`EventSink::publish`] is synchronous and infallible.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Everything the engine reports to the outside world.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Start {
        conversation_id: String,
        request_id: String,
    },

    IterationStart {
        iteration: u32,
    },

    IterationEnd {
        iteration: u32,
    },

    Thinking,

    /// New characters of the model's reasoning, never repeated
    ThinkingDelta {
        delta: String,
    },

    /// The model has started writing its action list
    Planning,

    Retrying {
        attempt: u32,
        reason: String,
    },

    ActionsDecided {
        actions: Value,
    },

    /// A tool call was proposed; in manual mode it waits for approval
    ToolCall {
        tool_execution_id: String,
        tool_name: String,
        params: Value,
        requires_confirmation: bool,
        mode: String,
    },

    ToolExecuting {
        tool_execution_id: String,
        tool_name: String,
    },

    ToolResult {
        tool_execution_id: String,
        tool_name: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    RetrieveQuerying {
        query: String,
    },

    Generating,

    Observing,

    Reflecting,

    Message {
        content: String,
    },

    StreamComplete,

    Complete {
        reason: String,
    },

    Error {
        message: String,
    },
}

impl AgentEvent {
    /// Wire name for this event, as forwarded over SSE.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "agent:start",
            Self::IterationStart { .. } => "agent:iteration_start",
            Self::IterationEnd { .. } => "agent:iteration_end",
            Self::Thinking => "agent:thinking",
            Self::ThinkingDelta { .. } => "agent:thinking_delta",
            Self::Planning => "agent:planning",
            Self::Retrying { .. } => "agent:retrying",
            Self::ActionsDecided { .. } => "agent:actions_decided",
            Self::ToolCall { .. } => "agent:tool_call",
            Self::ToolExecuting { .. } => "agent:tool_executing",
            Self::ToolResult { .. } => "agent:tool_result",
            Self::RetrieveQuerying { .. } => "agent:rag_querying",
            Self::Generating => "agent:generating",
            Self::Observing => "agent:observing",
            Self::Reflecting => "agent:reflecting",
            Self::Message { .. } => "agent:message",
            Self::StreamComplete => "agent:stream_complete",
            Self::Complete { .. } => "agent:complete",
            Self::Error { .. } => "agent:error",
        }
    }
}

/// Destination for [`AgentEvent`]s.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: AgentEvent);
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(AgentEvent::ToolExecuting {
            tool_execution_id: "t1".into(),
            tool_name: "weather".into(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            AgentEvent::ToolExecuting { tool_name, .. } => assert_eq!(tool_name, "weather"),
            _ => panic!("Expected ToolExecuting event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(AgentEvent::Error {
            message: "no subscribers".into(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = AgentEvent::ThinkingDelta { delta: "Look".into() };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"thinking_delta""#));
        assert_eq!(event.event_type(), "agent:thinking_delta");
    }
}
