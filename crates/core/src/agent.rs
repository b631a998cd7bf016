//! Loop phase and execution mode types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A phase of the ReAct loop.
///
/// `Completed` and `Failed` are terminal; the legal successor table lives
/// in the engine's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Initial,
    Thinking,
    Executing,
    Observing,
    Reflecting,
    Completed,
    Failed,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Thinking => "THINKING",
            Self::Executing => "EXECUTING",
            Self::Observing => "OBSERVING",
            Self::Reflecting => "REFLECTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether gated actions need a human decision before they run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Tools run as soon as they are proposed (default)
    #[default]
    Auto,
    /// Every tool call waits for an approve/reject decision
    Manual,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}
