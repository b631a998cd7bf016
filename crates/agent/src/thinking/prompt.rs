//! Decision prompt assembly.

use reagent_core::context::AgentContext;
use reagent_core::message::Message;
use reagent_core::provider::ResponseFormat;
use reagent_core::tool::ToolDescriptor;
use serde_json::{Value, json};
use std::fmt::Write;

use crate::actions::HandlerTable;
use crate::format::render_result;

pub const SYSTEM_PROMPT: &str = r#"You are the planning step of a ReAct agent. Each turn you look at the goal, what has already been done, and decide the next actions.

## Decision framework
1. First check whether the information already gathered answers the goal. If it does, answer with DIRECT_RESPONSE.
2. Use TOOL_CALL only when the goal needs live data or an operation only a listed tool can perform.
3. Use RAG_RETRIEVE when the answer is likely in one of the available knowledge bases.
4. Use DIRECT_RESPONSE when you can answer now, from general knowledge or gathered results.
5. Use LLM_GENERATE only to rewrite or synthesize longer text from results you already have.
6. Never call the same tool with the same parameters twice; if a tool already answered, use its result.
7. Actions in one reply run in parallel, so only group actions that do not depend on each other.

## Output format
Reply with exactly one JSON object and nothing else:
{
  "thinking": "your reasoning, briefly",
  "actions": [
    {
      "actionType": "TOOL_CALL | RAG_RETRIEVE | LLM_GENERATE | DIRECT_RESPONSE",
      "actionName": "short name",
      "reasoning": "why this action",
      "toolCallParams": {"toolName": "...", "toolParams": {}},
      "ragRetrieveParams": {"query": "...", "knowledgeIds": [], "maxResults": 5, "similarityThreshold": 0.7},
      "llmGenerateParams": {"prompt": "...", "systemPrompt": "...", "temperature": 0.7},
      "directResponseParams": {"content": "...", "streaming": true}
    }
  ]
}
Include only the params object that matches the actionType. "actions" must contain at least one action."#;

/// Guidance used when the same tool keeps being proposed.
pub fn repetition_prompt(goal: &str, tool: &str, gathered: &str) -> String {
    format!(
        "The user asked: {goal}\n\nThe tool `{tool}` has already been called repeatedly. \
         Its results so far:\n{gathered}\n\nAnswer the user's request using only this information. \
         If it is not enough, say what is missing."
    )
}

/// Structured-output constraint for decisions.
pub fn decision_format() -> ResponseFormat {
    let params = |properties: Value| json!({ "type": "object", "properties": properties });
    ResponseFormat::JsonSchema {
        name: "agent_decision".into(),
        strict: false,
        schema: json!({
            "type": "object",
            "properties": {
                "thinking": { "type": "string" },
                "actions": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "actionType": {
                                "type": "string",
                                "enum": ["TOOL_CALL", "RAG_RETRIEVE", "LLM_GENERATE", "DIRECT_RESPONSE"]
                            },
                            "actionName": { "type": "string" },
                            "reasoning": { "type": "string" },
                            "toolCallParams": params(json!({
                                "toolName": { "type": "string" },
                                "toolParams": { "type": "object" }
                            })),
                            "ragRetrieveParams": params(json!({
                                "query": { "type": "string" },
                                "knowledgeIds": { "type": "array", "items": { "type": "string" } },
                                "maxResults": { "type": "integer" },
                                "similarityThreshold": { "type": "number" }
                            })),
                            "llmGenerateParams": params(json!({
                                "prompt": { "type": "string" },
                                "systemPrompt": { "type": "string" },
                                "temperature": { "type": "number" }
                            })),
                            "directResponseParams": params(json!({
                                "content": { "type": "string" },
                                "streaming": { "type": "boolean" }
                            }))
                        },
                        "required": ["actionType"]
                    }
                }
            },
            "required": ["thinking", "actions"]
        }),
    }
}

fn tools_section(out: &mut String, tools: &[ToolDescriptor]) {
    out.push_str("## Available tools\n");
    if tools.is_empty() {
        out.push_str("No tools are available.\n");
    }
    for tool in tools {
        let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
        let _ = writeln!(out, "  Parameters: {}", tool.parameters);
    }
}

fn knowledge_section(out: &mut String, ctx: &AgentContext) {
    if ctx.knowledge_bases.is_empty() && ctx.initial_knowledge.is_none() {
        return;
    }
    out.push_str("\n## Available knowledge\n");
    for kb in &ctx.knowledge_bases {
        match &kb.description {
            Some(description) => {
                let _ = writeln!(out, "- {} ({}): {}", kb.name, kb.id, description);
            }
            None => {
                let _ = writeln!(out, "- {} ({})", kb.name, kb.id);
            }
        }
    }
    if let Some(initial) = &ctx.initial_knowledge {
        let _ = write!(out, "\nAlready retrieved for this conversation:\n{initial}\n");
    }
}

fn history_section(out: &mut String, ctx: &AgentContext, handlers: &HandlerTable, window: usize) {
    let total = ctx.execution_history.len();
    if total == 0 || window == 0 {
        return;
    }
    let first = total.saturating_sub(window);
    let _ = writeln!(out, "\n## Recent actions (last {} iterations)", total - first);
    for (offset, batch) in ctx.execution_history[first..].iter().enumerate() {
        let _ = writeln!(out, "\n### Iteration {} ({} actions)", first + offset + 1, batch.len());
        for (index, result) in batch.iter().enumerate() {
            let _ = writeln!(out, "**Action {}**\n{}", index + 1, render_result(handlers, result));
        }
    }
}

pub fn user_prompt(
    goal: &str,
    ctx: &AgentContext,
    tools: &[ToolDescriptor],
    handlers: &HandlerTable,
    history_window: usize,
    hint: Option<&str>,
) -> String {
    let mut out = String::new();
    tools_section(&mut out, tools);
    knowledge_section(&mut out, ctx);
    history_section(&mut out, ctx, handlers, history_window);
    let _ = write!(out, "\n## Current goal\n{goal}\n");
    if let Some(hint) = hint {
        let _ = write!(out, "\n## Format correction\n{hint}\n");
    }
    out
}

pub fn system_prompt(hint: Option<&str>) -> String {
    match hint {
        Some(hint) => format!("{SYSTEM_PROMPT}\n\n## Format correction\n{hint}"),
        None => SYSTEM_PROMPT.to_string(),
    }
}

/// Recent conversation, then the system prompt, then the user prompt.
pub fn decision_messages(
    goal: &str,
    ctx: &AgentContext,
    tools: &[ToolDescriptor],
    handlers: &HandlerTable,
    windows: (usize, usize),
    hint: Option<&str>,
) -> Vec<Message> {
    let (message_window, execution_window) = windows;
    let mut messages: Vec<Message> = ctx.recent_messages(message_window).to_vec();
    messages.push(Message::system(system_prompt(hint)));
    messages.push(Message::user(user_prompt(goal, ctx, tools, handlers, execution_window, hint)));
    messages
}
