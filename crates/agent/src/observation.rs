//! The OBSERVING stage: fold a finished batch into the context and decide
//! whether the run is over.

use reagent_core::action::{ActionKind, ActionResult, AgentAction};
use reagent_core::context::AgentContext;
use reagent_core::event::AgentEvent;
use reagent_core::message::Message;
use reagent_core::stop::StopSignal;
use reagent_core::store::ContextStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::outcome::{ExecutionRecord, RunClock, TerminationReason};

#[derive(Debug)]
pub enum Observation {
    Continue,
    Terminate {
        reason: TerminationReason,
        record: ExecutionRecord,
    },
}

pub struct ObservationStage {
    stops: Arc<dyn StopSignal>,
    store: Arc<dyn ContextStore>,
    max_iterations: u32,
}

impl ObservationStage {
    pub fn new(stops: Arc<dyn StopSignal>, store: Arc<dyn ContextStore>, max_iterations: u32) -> Self {
        Self {
            stops,
            store,
            max_iterations,
        }
    }

    pub async fn observe(
        &self,
        actions: &[AgentAction],
        results: &[ActionResult],
        ctx: &mut AgentContext,
        clock: &RunClock,
    ) -> Observation {
        ctx.publish(AgentEvent::Observing);

        if self.stops.is_stop_requested(&ctx.request_id).await {
            self.stops.clear(&ctx.request_id).await;
            info!(request_id = %ctx.request_id, "Stop requested, ending run");
            return Observation::Terminate {
                reason: TerminationReason::UserStopped,
                record: ExecutionRecord::succeeded(ctx, clock),
            };
        }

        if clock.iterations(ctx) >= self.max_iterations {
            return Observation::Terminate {
                reason: TerminationReason::MaxIterations,
                record: ExecutionRecord::failed(
                    ctx,
                    clock,
                    format!("Reached the limit of {} iterations", self.max_iterations),
                    None,
                ),
            };
        }

        if results.is_empty() {
            return Observation::Terminate {
                reason: TerminationReason::NoActions,
                record: ExecutionRecord::failed(ctx, clock, "The batch produced no results", None),
            };
        }

        self.fold(actions, results, ctx).await;

        let answered = actions
            .iter()
            .zip(results)
            .any(|(action, result)| result.success && action.is_terminal_answer());
        if answered {
            debug!(iteration = ctx.iterations(), "Terminal answer observed");
            return Observation::Terminate {
                reason: TerminationReason::Completed,
                record: ExecutionRecord::succeeded(ctx, clock),
            };
        }
        Observation::Continue
    }

    async fn fold(&self, actions: &[AgentAction], results: &[ActionResult], ctx: &mut AgentContext) {
        if let Some(last) = results.last() {
            ctx.record_outcome(last);
        }

        for result in results {
            if let Some(message) = answer_message(result) {
                ctx.add_message(message);
            }
        }

        ctx.record_batch(actions, results);
        let iteration = ctx.bump_iteration();

        if let Err(e) = self.store.save(ctx).await {
            warn!(conversation_id = %ctx.conversation_id, iteration, error = %e, "Failed to persist context");
        }
    }
}

/// Successful text a user would read, as an assistant message.
pub(crate) fn answer_message(result: &ActionResult) -> Option<Message> {
    if !result.success || !matches!(result.kind, ActionKind::Generate | ActionKind::DirectResponse) {
        return None;
    }
    let text = result.data_text();
    if text.trim().is_empty() {
        return None;
    }
    let mut message = Message::assistant(text)
        .with_metadata("action_kind", result.kind.wire_name())
        .with_metadata("action_name", result.name.clone())
        .with_metadata("duration_ms", result.duration_ms);
    if let Some(reasoning) = result.metadata.get("reasoning").and_then(Value::as_str) {
        message = message.with_metadata("reasoning", reasoning);
    }
    Some(message)
}
