//! The THINKING stage: ask the model for the next batch of actions.
//!
//! A reply that cannot be turned into at least one valid action is retried
//! with a correction hint naming what was wrong. When every attempt fails
//! the stage returns an empty batch and the loop ends with `NO_ACTIONS`.

pub mod prompt;
pub mod stream;

use reagent_core::action::AgentAction;
use reagent_core::context::AgentContext;
use reagent_core::error::ProviderError;
use reagent_core::event::AgentEvent;
use reagent_core::provider::ProviderRequest;
use reagent_core::tool::{ToolCatalog, ToolDescriptor};
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::actions::HandlerTable;
use crate::format::truncate_chars;
use crate::generation::Generator;
use crate::parser::{ParseError, parse_decision};
use crate::settings::EngineSettings;
use stream::ThinkingTracker;

const DECISION_TEMPERATURE: f32 = 0.3;

/// What one THINKING step decided.
#[derive(Debug, Clone, Default)]
pub struct ThinkingOutcome {
    pub actions: Vec<AgentAction>,
    pub thinking: String,
    /// Attempts beyond the first
    pub retries: u32,
}

enum Rejection {
    Provider(ProviderError),
    Parse(ParseError),
}

pub struct ThinkingStage {
    generator: Generator,
    catalog: Arc<dyn ToolCatalog>,
    handlers: Arc<HandlerTable>,
    settings: EngineSettings,
}

impl ThinkingStage {
    pub fn new(
        generator: Generator,
        catalog: Arc<dyn ToolCatalog>,
        handlers: Arc<HandlerTable>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            generator,
            catalog,
            handlers,
            settings,
        }
    }

    pub async fn think(&self, goal: &str, ctx: &AgentContext) -> ThinkingOutcome {
        ctx.publish(AgentEvent::Thinking);
        let tools = self
            .catalog
            .list_available(&ctx.enabled_groups, &ctx.enabled_tools)
            .await;

        let attempts = self.settings.parse_retries.max(1);
        let mut hint: Option<String> = None;
        let mut last_reason = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                ctx.publish(AgentEvent::Retrying {
                    attempt,
                    reason: last_reason.clone(),
                });
            }

            match self.attempt(goal, ctx, &tools, hint.as_deref()).await {
                Ok((thinking, actions)) => {
                    let actions = self.guard_repetition(goal, ctx, actions);
                    info!(
                        conversation_id = %ctx.conversation_id,
                        attempt,
                        actions = actions.len(),
                        "Decision accepted"
                    );
                    ctx.publish(AgentEvent::ActionsDecided {
                        actions: serde_json::to_value(&actions).unwrap_or_default(),
                    });
                    return ThinkingOutcome {
                        actions,
                        thinking,
                        retries: attempt - 1,
                    };
                }
                Err(Rejection::Parse(e)) => {
                    warn!(attempt, code = %e.code, error = %e.message, "Decision rejected");
                    let retry_hint = e.retry_hint();
                    last_reason = retry_hint.clone();
                    hint = Some(retry_hint);
                }
                Err(Rejection::Provider(e)) => {
                    warn!(attempt, error = %e, "Decision call failed");
                    last_reason = format!("model call failed: {e}");
                }
            }
        }

        warn!(
            conversation_id = %ctx.conversation_id,
            attempts, "No usable decision after all attempts"
        );
        ThinkingOutcome {
            retries: attempts - 1,
            ..ThinkingOutcome::default()
        }
    }

    async fn attempt(
        &self,
        goal: &str,
        ctx: &AgentContext,
        tools: &[ToolDescriptor],
        hint: Option<&str>,
    ) -> Result<(String, Vec<AgentAction>), Rejection> {
        let messages = prompt::decision_messages(
            goal,
            ctx,
            tools,
            &self.handlers,
            (self.settings.history_window, self.settings.execution_history_window),
            hint,
        );
        let request = ProviderRequest::new(ctx.model_id.clone(), messages)
            .with_temperature(DECISION_TEMPERATURE)
            .with_response_format(prompt::decision_format());

        let reply = match ctx.event_sink() {
            Some(events) if ctx.stream_sink().is_some() => {
                let mut tracker = ThinkingTracker::default();
                self.generator
                    .stream_text(request, |delta| {
                        for event in tracker.push(delta) {
                            events.publish(event);
                        }
                    })
                    .await
            }
            _ => self.generator.complete_text(request).await,
        }
        .map_err(Rejection::Provider)?;

        debug!(chars = reply.len(), "Decision reply received");
        let decision = parse_decision(&reply).map_err(Rejection::Parse)?;

        let mut raw_actions = decision.actions;
        if raw_actions.len() > self.settings.max_actions_per_batch {
            warn!(
                proposed = raw_actions.len(),
                limit = self.settings.max_actions_per_batch,
                "Truncating action batch"
            );
            raw_actions.truncate(self.settings.max_actions_per_batch);
        }

        let mut actions = Vec::with_capacity(raw_actions.len());
        for raw in &raw_actions {
            let action = self
                .handlers
                .build_action(raw, ctx)
                .await
                .map_err(|e| Rejection::Parse(e.with_excerpt(&reply)))?;
            actions.push(action);
        }
        Ok((decision.thinking, actions))
    }

    /// A lone tool call repeating the last two calls is swapped for a
    /// generation over what those calls already returned.
    fn guard_repetition(&self, goal: &str, ctx: &AgentContext, actions: Vec<AgentAction>) -> Vec<AgentAction> {
        if !self.settings.anomaly_guard || actions.len() != 1 {
            return actions;
        }
        let Some(tool) = actions[0].tool_name() else {
            return actions;
        };
        let history = &ctx.tool_call_history;
        if history.len() < 2 || !history[history.len() - 2..].iter().all(|r| r.tool_name == tool) {
            return actions;
        }

        warn!(tool, "Same tool proposed a third time, answering from gathered results");
        let mut gathered = String::new();
        for record in history.iter().filter(|r| r.tool_name == tool) {
            let _ = writeln!(gathered, "- {}", truncate_chars(&record.result, 500));
        }
        vec![
            AgentAction::generate(prompt::repetition_prompt(goal, tool, &gathered))
                .with_reasoning(format!("Repeated calls to {tool}")),
        ]
    }
}
