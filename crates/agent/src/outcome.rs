//! What a run produces.

use reagent_core::action::ErrorKind;
use reagent_core::agent::AgentState;
use reagent_core::context::AgentContext;
use reagent_core::message::Message;
use serde::Serialize;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    Completed,
    MaxIterations,
    NoActions,
    Exception,
    UserStopped,
    /// Reflection judged the last failure not worth retrying
    ActionFailed,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::MaxIterations => "MAX_ITERATIONS",
            Self::NoActions => "NO_ACTIONS",
            Self::Exception => "EXCEPTION",
            Self::UserStopped => "USER_STOPPED",
            Self::ActionFailed => "ACTION_FAILED",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start time and starting iteration count of one `execute` call.
///
/// The iteration budget applies per run, so a context reloaded for a second
/// turn starts with a fresh allowance.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    started: Instant,
    base_iterations: u32,
}

impl RunClock {
    pub fn start(ctx: &AgentContext) -> Self {
        Self {
            started: Instant::now(),
            base_iterations: ctx.iterations(),
        }
    }

    /// Iterations completed during this run.
    pub fn iterations(&self, ctx: &AgentContext) -> u32 {
        ctx.iterations().saturating_sub(self.base_iterations)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Snapshot of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub success: bool,
    pub messages: Vec<Message>,
    pub iterations: u32,
    pub elapsed_ms: u64,
    pub final_state: AgentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionRecord {
    pub fn succeeded(ctx: &AgentContext, clock: &RunClock) -> Self {
        Self {
            success: true,
            messages: ctx.messages.clone(),
            iterations: clock.iterations(ctx),
            elapsed_ms: clock.elapsed_ms(),
            final_state: AgentState::Completed,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(
        ctx: &AgentContext,
        clock: &RunClock,
        error: impl Into<String>,
        error_kind: Option<ErrorKind>,
    ) -> Self {
        Self {
            success: false,
            messages: ctx.messages.clone(),
            iterations: clock.iterations(ctx),
            elapsed_ms: clock.elapsed_ms(),
            final_state: AgentState::Failed,
            error: Some(error.into()),
            error_kind,
        }
    }
}

/// Returned by [`ReactEngine::execute`](crate::ReactEngine::execute).
#[derive(Debug, Clone, Serialize)]
pub struct FinalResult {
    pub reason: TerminationReason,
    /// The answer shown to the user, when the run produced one
    pub answer: Option<String>,
    pub record: ExecutionRecord,
}

impl FinalResult {
    pub fn new(reason: TerminationReason, answer: Option<String>, record: ExecutionRecord) -> Self {
        Self { reason, answer, record }
    }

    pub fn is_success(&self) -> bool {
        self.record.success
    }
}
