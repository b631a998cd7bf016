//! `DIRECT_RESPONSE`: the model already wrote the answer; play it out to the
//! streaming sink token by token.

use async_trait::async_trait;
use rand::Rng;
use reagent_core::action::{ActionKind, ActionPayload, ActionResult, AgentAction, DirectResponseParams, ErrorKind};
use reagent_core::context::AgentContext;
use reagent_core::event::AgentEvent;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{ActionHandler, ExecutionScope, annotate, echoed_param};
use crate::format::truncate_chars;
use crate::parser::{ParseError, ParseErrorCode, RawAction};

pub struct DirectResponseHandler {
    delay_min: Duration,
    delay_max: Duration,
}

/// Split into words, each carrying the whitespace that follows it, so the
/// tokens concatenate back to the input exactly.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut in_space = false;
    for (index, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_space = true;
        } else if in_space {
            tokens.push(&text[start..index]);
            start = index;
            in_space = false;
        }
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

impl DirectResponseHandler {
    pub fn new(delay_min: Duration, delay_max: Duration) -> Self {
        Self {
            delay_min,
            delay_max: delay_max.max(delay_min),
        }
    }

    fn token_delay(&self) -> Duration {
        if self.delay_max.is_zero() {
            return Duration::ZERO;
        }
        let min = self.delay_min.as_millis() as u64;
        let max = self.delay_max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    /// Emit `content` to the sink. Returns `false` if cancelled part way.
    async fn play(&self, content: &str, scope: &ExecutionScope) -> bool {
        let Some(sink) = scope.stream_sink() else {
            return true;
        };
        sink.on_start();
        let mut tokens = tokenize(content).into_iter().peekable();
        while let Some(token) = tokens.next() {
            if scope.cancel.is_cancelled() {
                sink.on_error("stopped");
                return false;
            }
            sink.on_token(token);
            if tokens.peek().is_none() {
                break;
            }
            let delay = self.token_delay();
            if delay.is_zero() {
                continue;
            }
            tokio::select! {
                _ = scope.cancel.cancelled() => {
                    sink.on_error("stopped");
                    return false;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        sink.on_complete(content);
        scope.publish(AgentEvent::StreamComplete);
        true
    }

    async fn run(&self, action: &AgentAction, params: &DirectResponseParams, scope: &ExecutionScope) -> ActionResult {
        if params.content.trim().is_empty() {
            return ActionResult::failure(action, "Response content is empty", ErrorKind::DirectResponseError);
        }

        if params.streaming && !self.play(&params.content, scope).await {
            debug!(request_id = %scope.request_id, "Direct response interrupted");
            return ActionResult::failure(action, "Response streaming was stopped", ErrorKind::Cancelled);
        }

        scope.publish(AgentEvent::Message {
            content: params.content.clone(),
        });
        ActionResult::success(action, params.content.clone())
    }
}

#[async_trait]
impl ActionHandler for DirectResponseHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::DirectResponse
    }

    fn decode(&self, raw: &RawAction, _ctx: &AgentContext) -> Result<ActionPayload, ParseError> {
        let Some(params) = raw.params(&["directResponseParams", "responseParams"]) else {
            return Err(ParseError::new(
                ParseErrorCode::DirectParamsMissing,
                "DIRECT_RESPONSE without directResponseParams",
            ));
        };
        let Some(content) = params
            .get("content")
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
        else {
            return Err(ParseError::new(
                ParseErrorCode::DirectContentMissing,
                "DIRECT_RESPONSE without content",
            ));
        };

        Ok(ActionPayload::DirectResponse(DirectResponseParams {
            content: content.to_string(),
            is_complete: params.get("isComplete").and_then(Value::as_bool).unwrap_or(true),
            streaming: params.get("streaming").and_then(Value::as_bool).unwrap_or(true),
        }))
    }

    async fn execute(&self, action: &AgentAction, scope: &ExecutionScope) -> ActionResult {
        let started = Instant::now();
        let result = match &action.payload {
            ActionPayload::DirectResponse(params) => self.run(action, params, scope).await,
            _ => ActionResult::failure(action, "Not a direct response", ErrorKind::Validation),
        };
        annotate(action, result, started)
    }

    fn describe_input(&self, result: &ActionResult) -> String {
        let content = echoed_param(result, "content").and_then(Value::as_str).unwrap_or_default();
        format!("answer \"{}\"", truncate_chars(content, 200))
    }
}
