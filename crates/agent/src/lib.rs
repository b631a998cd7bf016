//! The ReAct engine: the think → act → observe → reflect loop.
//!
//! Each iteration runs four stages in order:
//!
//! 1. **Think**: ask the model for a JSON decision and turn it into typed
//!    actions, retrying with a correction hint when the reply is malformed
//! 2. **Execute**: run the batch on the shared worker pool, gating tool calls
//!    on human approval in manual mode
//! 3. **Observe**: fold results into the context, persist it, and stop on a
//!    final answer, a stop request, or an exhausted budget
//! 4. **Reflect**: decide whether the goal is met, worth retrying, or lost
//!
//! [`ReactEngine::execute`] drives the loop and always returns a
//! [`FinalResult`].

pub mod actions;
pub mod dispatch;
pub mod engine;
pub mod format;
pub mod generation;
pub mod observation;
pub mod outcome;
pub mod parser;
pub mod reflection;
pub mod settings;
pub mod state_machine;
pub mod summary;
pub mod thinking;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use actions::{ActionHandler, ExecutionScope, HandlerDeps, HandlerTable};
pub use dispatch::{ActionDispatcher, WorkerPool};
pub use engine::ReactEngine;
pub use generation::Generator;
pub use observation::{Observation, ObservationStage};
pub use outcome::{ExecutionRecord, FinalResult, RunClock, TerminationReason};
pub use parser::{Decision, ParseError, ParseErrorCode, RawAction, extract_json, parse_decision, repair_json};
pub use reflection::{ReflectionResult, ReflectionStage};
pub use settings::{EngineSettings, ReflectionPolicy};
pub use state_machine::StateMachine;
pub use thinking::{ThinkingOutcome, ThinkingStage};
