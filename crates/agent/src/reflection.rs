//! The REFLECTING stage: judge whether the goal is met, worth retrying, or
//! lost.
//!
//! Cheap rules run first. The model is only asked when the rules cannot
//! decide, and every failure of that call degrades to a heuristic answer;
//! reflection never fails the run by itself.

use reagent_core::action::{ActionKind, ActionResult, AgentAction, ErrorKind};
use reagent_core::context::AgentContext;
use reagent_core::event::AgentEvent;
use reagent_core::message::Message;
use reagent_core::provider::{ProviderRequest, ResponseFormat};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;
use tracing::{debug, warn};

use crate::actions::HandlerTable;
use crate::format::truncate_chars;
use crate::generation::Generator;
use crate::parser::extract_json;
use crate::settings::ReflectionPolicy;

const JUDGE_SYSTEM: &str = "You evaluate whether an agent has achieved the user's goal. \
Reply with a JSON object: {\"goalAchieved\": boolean, \"needsSummary\": boolean, \"reason\": string}. \
needsSummary is true when the results are raw data that still has to be turned into an answer.";

/// A generation longer than this counts as an answer when the judge is
/// unreachable.
const SUBSTANTIAL_ANSWER_CHARS: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReflectionResult {
    pub goal_achieved: bool,
    pub should_continue: bool,
    pub should_retry: bool,
    pub needs_summary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<ErrorKind>,
    pub summary: String,
}

impl ReflectionResult {
    pub fn achieved(needs_summary: bool, summary: impl Into<String>) -> Self {
        Self {
            goal_achieved: true,
            needs_summary,
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn keep_going(summary: impl Into<String>) -> Self {
        Self {
            should_continue: true,
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            should_continue: true,
            should_retry: true,
            summary: format!("Retrying: {reason}"),
            retry_reason: Some(reason),
            ..Self::default()
        }
    }

    pub fn abandon(reason: impl Into<String>, kind: Option<ErrorKind>) -> Self {
        let reason = reason.into();
        Self {
            summary: format!("Giving up: {reason}"),
            failure_reason: Some(reason),
            failure_kind: kind,
            ..Self::default()
        }
    }

    /// Neither achieved nor worth another iteration.
    pub fn is_terminal_failure(&self) -> bool {
        !self.goal_achieved && !self.should_continue
    }
}

fn is_retryable(result: &ActionResult) -> bool {
    match result.error_kind {
        Some(ErrorKind::ToolCallError | ErrorKind::RetrieveError) => true,
        Some(ErrorKind::Exception) => {
            let message = result.error.as_deref().unwrap_or_default().to_lowercase();
            ["timeout", "timed out", "network", "connection"]
                .iter()
                .any(|needle| message.contains(needle))
        }
        _ => false,
    }
}

pub struct ReflectionStage {
    generator: Generator,
    policy: ReflectionPolicy,
}

impl ReflectionStage {
    pub fn new(generator: Generator, policy: ReflectionPolicy) -> Self {
        Self { generator, policy }
    }

    pub async fn reflect(
        &self,
        goal: &str,
        actions: &[AgentAction],
        results: &[ActionResult],
        ctx: &AgentContext,
        handlers: &HandlerTable,
    ) -> ReflectionResult {
        ctx.publish(AgentEvent::Reflecting);

        let successes: Vec<&ActionResult> = results.iter().filter(|r| r.success).collect();
        if successes.is_empty() {
            let Some(last) = results.last() else {
                return ReflectionResult::abandon("No results to reflect on", None);
            };
            let reason = last.error.clone().unwrap_or_else(|| "action failed".into());
            return if is_retryable(last) {
                debug!(kind = ?last.error_kind, "Retryable failure");
                ReflectionResult::retry(reason)
            } else {
                debug!(kind = ?last.error_kind, "Terminal failure");
                ReflectionResult::abandon(reason, last.error_kind)
            };
        }

        if let Some(shortcut) = self.shortcut(&successes, results) {
            return shortcut;
        }

        if !self.policy.judge_with_model {
            return ReflectionResult::keep_going("No rule applied, continuing");
        }
        self.judge(goal, actions, results, ctx, handlers).await
    }

    /// Rules only decide a lone successful result; larger batches go to the
    /// judge. A successful `COMPLETE` anywhere ends the run.
    fn shortcut(&self, successes: &[&ActionResult], results: &[ActionResult]) -> Option<ReflectionResult> {
        if let Some(done) = successes.iter().find(|r| r.kind == ActionKind::Complete) {
            return Some(ReflectionResult::achieved(false, done.data_text()));
        }
        match results {
            [only] if only.success && self.policy.is_shortcut(only.kind) => Some(ReflectionResult::achieved(
                self.policy.needs_summary(only.kind),
                format!("{} succeeded", only.kind),
            )),
            _ => None,
        }
    }

    async fn judge(
        &self,
        goal: &str,
        actions: &[AgentAction],
        results: &[ActionResult],
        ctx: &AgentContext,
        handlers: &HandlerTable,
    ) -> ReflectionResult {
        let prompt = judge_prompt(goal, actions, results, ctx, handlers);
        let request = ProviderRequest::new(
            ctx.model_id.clone(),
            vec![Message::system(JUDGE_SYSTEM), Message::user(prompt)],
        )
        .with_temperature(0.0)
        .with_response_format(ResponseFormat::JsonObject);

        match self.generator.complete_text(request).await {
            Ok(reply) => interpret_verdict(&reply),
            Err(e) => {
                warn!(error = %e, "Reflection call failed, judging heuristically");
                let answered = results.iter().any(|r| {
                    r.success
                        && r.kind == ActionKind::Generate
                        && r.data_text().chars().count() > SUBSTANTIAL_ANSWER_CHARS
                });
                if answered {
                    ReflectionResult::achieved(false, "Generated answer accepted")
                } else {
                    ReflectionResult::keep_going("Could not judge, continuing")
                }
            }
        }
    }
}

fn flag(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    })
}

/// Heuristic read of `"key": true` when the verdict is not valid JSON.
fn loose_flag(text: &str, key: &str) -> bool {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase();
    compact.contains(&format!("\"{}\":true", key.to_lowercase()))
}

fn interpret_verdict(reply: &str) -> ReflectionResult {
    let (achieved, needs_summary, reason) = match extract_json(reply) {
        Ok(Value::Object(map)) => (
            flag(&map, &["goalAchieved", "goal_achieved"]).unwrap_or(false),
            flag(&map, &["needsSummary", "needs_summary"]).unwrap_or(false),
            map.get("reason").and_then(Value::as_str).unwrap_or_default().to_string(),
        ),
        _ => (
            loose_flag(reply, "goalAchieved") || loose_flag(reply, "goal_achieved"),
            loose_flag(reply, "needsSummary") || loose_flag(reply, "needs_summary"),
            String::new(),
        ),
    };
    if achieved {
        ReflectionResult::achieved(needs_summary, reason)
    } else {
        ReflectionResult::keep_going(reason)
    }
}

fn judge_prompt(
    goal: &str,
    actions: &[AgentAction],
    results: &[ActionResult],
    ctx: &AgentContext,
    handlers: &HandlerTable,
) -> String {
    let mut out = format!("## Goal\n{goal}\n\n## Actions this iteration\n");
    for (action, result) in actions.iter().zip(results) {
        let _ = writeln!(out, "- {} `{}`: {}", action.kind(), action.name, handlers.describe_input(result));
        if result.success {
            let _ = writeln!(out, "  Result: {}", truncate_chars(&result.data_text(), 500));
        } else {
            let _ = writeln!(out, "  Failed: {}", result.error.as_deref().unwrap_or_default());
        }
    }

    let recent = ctx.recent_messages(3);
    if !recent.is_empty() {
        out.push_str("\n## Recent messages\n");
        for message in recent {
            let _ = writeln!(out, "- {:?}: {}", message.role, truncate_chars(&message.content, 500));
        }
    }

    let tools = &ctx.tool_call_history;
    if !tools.is_empty() {
        out.push_str("\n## Recent tool calls\n");
        for record in &tools[tools.len().saturating_sub(3)..] {
            let _ = writeln!(out, "- {}: {}", record.tool_name, truncate_chars(&record.result, 500));
        }
    }

    let retrievals = &ctx.retrieval_history;
    if !retrievals.is_empty() {
        out.push_str("\n## Recent searches\n");
        for record in &retrievals[retrievals.len().saturating_sub(3)..] {
            let _ = writeln!(out, "- \"{}\": {} results", record.query, record.result_count);
        }
    }

    out.push_str("\nHas the goal been achieved?");
    out
}
