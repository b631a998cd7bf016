//! `LLM_GENERATE`: free-form text from the model, streamed when a sink is
//! attached.

use async_trait::async_trait;
use reagent_core::action::{ActionKind, ActionPayload, ActionResult, AgentAction, ErrorKind, GenerateParams};
use reagent_core::context::AgentContext;
use reagent_core::event::AgentEvent;
use reagent_core::message::Message;
use reagent_core::provider::ProviderRequest;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

use super::{ActionHandler, ExecutionScope, annotate, echoed_param};
use crate::format::truncate_chars;
use crate::generation::Generator;
use crate::parser::{ParseError, ParseErrorCode, RawAction, text_field};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer accurately and concisely, using the conversation so far as context.";

pub struct GenerateHandler {
    generator: Generator,
    temperature: f32,
}

impl GenerateHandler {
    pub fn new(generator: Generator, temperature: f32) -> Self {
        Self { generator, temperature }
    }

    async fn run(&self, action: &AgentAction, params: &GenerateParams, scope: &ExecutionScope) -> ActionResult {
        let prompt = match params.prompt.trim() {
            "" => action.reasoning.clone().unwrap_or_default(),
            _ => params.prompt.clone(),
        };
        if prompt.trim().is_empty() {
            return ActionResult::failure(action, "Generation prompt is empty", ErrorKind::GenerateError);
        }

        let system = params
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let mut messages = Vec::with_capacity(scope.history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(scope.history.iter().cloned());
        messages.push(Message::user(prompt));

        let request = ProviderRequest::new(scope.model_id.clone(), messages)
            .with_temperature(params.temperature.unwrap_or(self.temperature))
            .with_max_tokens(params.max_tokens);

        scope.publish(AgentEvent::Generating);

        let generation = async {
            match scope.stream_sink() {
                Some(sink) => {
                    sink.on_start();
                    let outcome = self.generator.stream_text(request, |delta| sink.on_token(delta)).await;
                    match &outcome {
                        Ok(text) => {
                            sink.on_complete(text);
                            scope.publish(AgentEvent::StreamComplete);
                        }
                        Err(e) => sink.on_error(&e.to_string()),
                    }
                    outcome
                }
                None => self.generator.complete_text(request).await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = scope.cancel.cancelled() => {
                if let Some(sink) = scope.stream_sink() {
                    sink.on_error("stopped");
                }
                debug!(request_id = %scope.request_id, "Generation stopped");
                return ActionResult::failure(action, "Generation was stopped", ErrorKind::Cancelled);
            }
            outcome = generation => outcome,
        };

        match outcome {
            Ok(text) => ActionResult::success(action, text),
            Err(e) => {
                warn!(error = %e, "Generation failed");
                ActionResult::failure(action, e.to_string(), ErrorKind::GenerateError)
            }
        }
    }
}

#[async_trait]
impl ActionHandler for GenerateHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::Generate
    }

    fn decode(&self, raw: &RawAction, _ctx: &AgentContext) -> Result<ActionPayload, ParseError> {
        let Some(params) = raw.params(&["llmGenerateParams", "generateParams"]) else {
            return Err(ParseError::new(
                ParseErrorCode::GenerateParamsMissing,
                "LLM_GENERATE without llmGenerateParams",
            ));
        };
        let Some(prompt) = text_field(params, &["prompt"]) else {
            return Err(ParseError::new(ParseErrorCode::GeneratePromptMissing, "LLM_GENERATE without a prompt"));
        };

        Ok(ActionPayload::Generate(GenerateParams {
            prompt: prompt.to_string(),
            system_prompt: text_field(params, &["systemPrompt"]).map(str::to_string),
            temperature: params.get("temperature").and_then(Value::as_f64).map(|t| t as f32),
            max_tokens: params.get("maxTokens").and_then(Value::as_u64).map(|n| n as u32),
        }))
    }

    async fn execute(&self, action: &AgentAction, scope: &ExecutionScope) -> ActionResult {
        let started = Instant::now();
        let result = match &action.payload {
            ActionPayload::Generate(params) => self.run(action, params, scope).await,
            _ => ActionResult::failure(action, "Not a generation", ErrorKind::Validation),
        };
        annotate(action, result, started)
    }

    fn describe_input(&self, result: &ActionResult) -> String {
        let prompt = echoed_param(result, "prompt").and_then(Value::as_str).unwrap_or_default();
        format!("prompt \"{}\"", truncate_chars(prompt, 200))
    }
}
