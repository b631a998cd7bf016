//! `COMPLETE`: legacy end-of-run marker. Executes instantly.

use async_trait::async_trait;
use reagent_core::action::{ActionKind, ActionPayload, ActionResult, AgentAction, CompleteParams};
use reagent_core::context::AgentContext;
use std::time::Instant;

use super::{ActionHandler, ExecutionScope, annotate};
use crate::parser::{RawAction, text_field};

pub struct CompleteHandler;

#[async_trait]
impl ActionHandler for CompleteHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Complete
    }

    fn decode(&self, raw: &RawAction, _ctx: &AgentContext) -> Result<ActionPayload, crate::parser::ParseError> {
        let summary = raw
            .params(&["completeParams"])
            .and_then(|p| text_field(p, &["summary"]))
            .map(str::to_string);
        Ok(ActionPayload::Complete(CompleteParams { summary }))
    }

    async fn execute(&self, action: &AgentAction, _scope: &ExecutionScope) -> ActionResult {
        let started = Instant::now();
        let summary = match &action.payload {
            ActionPayload::Complete(params) => params.summary.clone().unwrap_or_default(),
            _ => String::new(),
        };
        annotate(action, ActionResult::success(action, summary), started)
    }

    fn describe_input(&self, _result: &ActionResult) -> String {
        "end of task".to_string()
    }
}
