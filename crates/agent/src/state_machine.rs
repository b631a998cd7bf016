//! Iteration state machine.
//!
//! Every phase change of the loop goes through [`StateMachine::transition`],
//! which refuses anything outside the successor table below. The loop driver
//! treats a refusal as fatal.

use reagent_core::agent::AgentState;
use reagent_core::error::Error;
use tracing::debug;

/// Called after every accepted transition with `(from, to)`.
pub type StateObserver = Box<dyn Fn(AgentState, AgentState) + Send + Sync>;

pub struct StateMachine {
    current: AgentState,
    observer: Option<StateObserver>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: AgentState::Initial,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn current(&self) -> AgentState {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        self.current == AgentState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.current == AgentState::Failed
    }

    /// Back to `Initial`, for reusing a machine across runs.
    pub fn reset(&mut self) {
        debug!(from = %self.current, "State machine reset");
        self.current = AgentState::Initial;
    }

    pub fn can_transition(&self, to: AgentState) -> bool {
        is_legal(self.current, to)
    }

    pub fn transition(&mut self, to: AgentState) -> Result<(), Error> {
        let from = self.current;
        if !is_legal(from, to) {
            return Err(Error::IllegalTransition { from, to });
        }
        self.current = to;
        debug!(%from, %to, "State transition");
        if let Some(observer) = &self.observer {
            observer(from, to);
        }
        Ok(())
    }
}

fn is_legal(from: AgentState, to: AgentState) -> bool {
    use AgentState::*;

    if from.is_terminal() {
        return false;
    }
    // Top-level guard: anything still running may fail
    if to == Failed {
        return true;
    }
    matches!(
        (from, to),
        (Initial, Thinking)
            | (Thinking, Executing)
            | (Executing, Observing)
            | (Observing, Reflecting)
            | (Observing, Completed)
            | (Reflecting, Thinking)
            | (Reflecting, Completed)
    )
}
