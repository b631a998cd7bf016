//! Decision parser.
//!
//! Models wrap JSON in code fences, prepend prose, and get cut off mid-object
//! when they hit a token limit. Extraction works in three steps:
//!
//! 1. strip code fences and try a direct parse
//! 2. scan for the first balanced `{...}` with a string-aware state machine
//! 3. if the scan runs off the end, close the open string and brackets and
//!    parse the repaired text
//!
//! Anything still unparseable becomes a [`ParseError`] whose
//! [`retry_hint`](ParseError::retry_hint) is fed back to the model.

use reagent_core::action::ActionKind;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorCode {
    JsonParse,
    ActionsMissing,
    ActionsEmpty,
    ActionItemInvalid,
    ActionTypeMissing,
    ActionTypeInvalid,
    ToolParamsMissing,
    ToolNameMissing,
    RetrieveParamsMissing,
    RetrieveQueryMissing,
    GenerateParamsMissing,
    GeneratePromptMissing,
    DirectParamsMissing,
    DirectContentMissing,
    ToolNotFound,
}

impl ParseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonParse => "JSON_PARSE",
            Self::ActionsMissing => "ACTIONS_MISSING",
            Self::ActionsEmpty => "ACTIONS_EMPTY",
            Self::ActionItemInvalid => "ACTION_ITEM_INVALID",
            Self::ActionTypeMissing => "ACTION_TYPE_MISSING",
            Self::ActionTypeInvalid => "ACTION_TYPE_INVALID",
            Self::ToolParamsMissing => "TOOL_PARAMS_MISSING",
            Self::ToolNameMissing => "TOOL_NAME_MISSING",
            Self::RetrieveParamsMissing => "RAG_PARAMS_MISSING",
            Self::RetrieveQueryMissing => "RAG_QUERY_MISSING",
            Self::GenerateParamsMissing => "LLM_PARAMS_MISSING",
            Self::GeneratePromptMissing => "LLM_PROMPT_MISSING",
            Self::DirectParamsMissing => "DIRECT_PARAMS_MISSING",
            Self::DirectContentMissing => "DIRECT_CONTENT_MISSING",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::JsonParse => "Reply with exactly one JSON object and nothing else: no prose, no code fences.",
            Self::ActionsMissing | Self::ActionsEmpty => {
                "The object must contain a non-empty \"actions\" array."
            }
            Self::ActionItemInvalid | Self::ActionTypeMissing | Self::ActionTypeInvalid => {
                "Every action must be an object whose \"actionType\" is one of TOOL_CALL, RAG_RETRIEVE, LLM_GENERATE, DIRECT_RESPONSE."
            }
            Self::ToolParamsMissing | Self::ToolNameMissing => {
                "TOOL_CALL actions need \"toolCallParams\" with \"toolName\" and \"toolParams\"."
            }
            Self::ToolNotFound => "Only call tools listed under \"Available tools\".",
            Self::RetrieveParamsMissing | Self::RetrieveQueryMissing => {
                "RAG_RETRIEVE actions need \"ragRetrieveParams\" with a non-empty \"query\"."
            }
            Self::GenerateParamsMissing | Self::GeneratePromptMissing => {
                "LLM_GENERATE actions need \"llmGenerateParams\" with a non-empty \"prompt\"."
            }
            Self::DirectParamsMissing | Self::DirectContentMissing => {
                "DIRECT_RESPONSE actions need \"directResponseParams\" with non-empty \"content\"."
            }
        }
    }
}

impl fmt::Display for ParseErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a model reply could not be turned into a batch of actions.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ParseError {
    pub code: ParseErrorCode,
    pub message: String,
    /// Start of the offending text, at most 200 characters
    pub excerpt: String,
}

impl ParseError {
    pub fn new(code: ParseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            excerpt: String::new(),
        }
    }

    pub fn with_excerpt(mut self, text: &str) -> Self {
        self.excerpt = text.chars().take(EXCERPT_CHARS).collect();
        self
    }

    /// Correction text appended to the next decision prompt.
    pub fn retry_hint(&self) -> String {
        let mut hint = format!(
            "Your previous reply was rejected ({}): {}. {}",
            self.code,
            self.message,
            self.code.instruction()
        );
        if !self.excerpt.is_empty() {
            hint.push_str("\nRejected reply began with: ");
            hint.push_str(&self.excerpt);
        }
        hint
    }
}

/// A parsed, not yet validated, decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub thinking: String,
    pub actions: Vec<RawAction>,
}

/// One entry of the `actions` array with its kind resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAction {
    pub kind: ActionKind,
    pub name: Option<String>,
    pub reasoning: Option<String>,
    /// The whole entry, for kind-specific decoding
    pub fields: Map<String, Value>,
}

impl RawAction {
    /// The first of `keys` holding an object, else the generic `params` object.
    pub fn params(&self, keys: &[&str]) -> Option<&Map<String, Value>> {
        keys.iter()
            .chain(std::iter::once(&"params"))
            .find_map(|key| self.fields.get(*key).and_then(Value::as_object))
    }
}

/// First non-blank string among `keys`.
pub(crate) fn string_field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// First non-blank string among `keys`, whitespace kept.
pub(crate) fn text_field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Default,
    InString,
    Escaped,
}

#[derive(Debug)]
enum Span<'a> {
    Balanced(&'a str),
    Truncated {
        fragment: &'a str,
        state: ScanState,
        open: Vec<char>,
    },
}

/// Find the first `{` and walk to its matching `}`, ignoring brackets that
/// appear inside string literals.
fn scan_object(text: &str) -> Option<Span<'_>> {
    let start = text.find('{')?;
    let mut state = ScanState::Default;
    let mut open = Vec::new();

    for (offset, ch) in text[start..].char_indices() {
        match state {
            ScanState::Escaped => state = ScanState::InString,
            ScanState::InString => match ch {
                '\\' => state = ScanState::Escaped,
                '"' => state = ScanState::Default,
                _ => {}
            },
            ScanState::Default => match ch {
                '"' => state = ScanState::InString,
                '{' | '[' => open.push(ch),
                '}' | ']' => {
                    open.pop();
                    if open.is_empty() {
                        let end = start + offset + 1;
                        return Some(Span::Balanced(&text[start..end]));
                    }
                }
                _ => {}
            },
        }
    }

    Some(Span::Truncated {
        fragment: &text[start..],
        state,
        open,
    })
}

fn close_truncated(fragment: &str, state: ScanState, open: &[char]) -> String {
    let mut repaired = fragment.to_string();
    match state {
        ScanState::Escaped => {
            repaired.pop();
            repaired.push('"');
        }
        ScanState::InString => repaired.push('"'),
        ScanState::Default => {}
    }

    let kept = repaired.trim_end().len();
    repaired.truncate(kept);
    if repaired.ends_with(',') {
        repaired.pop();
    } else if repaired.ends_with(':') {
        repaired.push_str(" null");
    }

    for bracket in open.iter().rev() {
        repaired.push(if *bracket == '{' { '}' } else { ']' });
    }
    repaired
}

/// Cut the first JSON object out of `text`, closing it if it was truncated.
///
/// Applying this to its own output returns the output unchanged.
pub fn repair_json(text: &str) -> Option<String> {
    match scan_object(text)? {
        Span::Balanced(object) => Some(object.to_string()),
        Span::Truncated { fragment, state, open } => Some(close_truncated(fragment, state, &open)),
    }
}

/// Parse model output into JSON, tolerating fences, surrounding prose and
/// truncation.
pub fn extract_json(text: &str) -> Result<Value, ParseError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(ParseError::new(ParseErrorCode::JsonParse, "empty reply"));
    }
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }

    let Some(candidate) = repair_json(cleaned) else {
        return Err(ParseError::new(ParseErrorCode::JsonParse, "no JSON object found").with_excerpt(cleaned));
    };
    debug!(original_len = cleaned.len(), candidate_len = candidate.len(), "Parsing extracted JSON span");
    serde_json::from_str(&candidate)
        .map_err(|e| ParseError::new(ParseErrorCode::JsonParse, e.to_string()).with_excerpt(cleaned))
}

/// Parse a decision object: `{ thinking, actions: [...] }`.
pub fn parse_decision(text: &str) -> Result<Decision, ParseError> {
    let value = extract_json(text)?;
    decision_from_value(value).map_err(|e| {
        if e.excerpt.is_empty() {
            e.with_excerpt(strip_code_fences(text))
        } else {
            e
        }
    })
}

fn decision_from_value(value: Value) -> Result<Decision, ParseError> {
    let root = match value {
        Value::Object(map) => map,
        // A bare array is taken as the action list
        Value::Array(items) => {
            let mut map = Map::new();
            map.insert("actions".into(), Value::Array(items));
            map
        }
        _ => return Err(ParseError::new(ParseErrorCode::JsonParse, "expected a JSON object")),
    };

    let thinking = root
        .get("thinking")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let Some(Value::Array(items)) = root.get("actions") else {
        return Err(ParseError::new(ParseErrorCode::ActionsMissing, "\"actions\" array is missing"));
    };
    if items.is_empty() {
        return Err(ParseError::new(ParseErrorCode::ActionsEmpty, "\"actions\" array is empty"));
    }

    let actions = items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_action(index, item))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Decision { thinking, actions })
}

fn parse_action(index: usize, item: &Value) -> Result<RawAction, ParseError> {
    let Some(fields) = item.as_object() else {
        return Err(ParseError::new(
            ParseErrorCode::ActionItemInvalid,
            format!("actions[{index}] is not an object"),
        ));
    };

    let Some(type_name) = string_field(fields, &["actionType", "action", "type"]) else {
        return Err(ParseError::new(
            ParseErrorCode::ActionTypeMissing,
            format!("actions[{index}] has no actionType"),
        ));
    };
    let Some(kind) = ActionKind::from_wire(type_name) else {
        return Err(ParseError::new(
            ParseErrorCode::ActionTypeInvalid,
            format!("actions[{index}] has unknown actionType '{type_name}'"),
        ));
    };

    Ok(RawAction {
        kind,
        name: string_field(fields, &["actionName", "name"]).map(str::to_string),
        reasoning: string_field(fields, &["reasoning"]).map(str::to_string),
        fields: fields.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WEATHER_DECISION: &str = r#"{"thinking":"Need live data","actions":[{"actionType":"TOOL_CALL","actionName":"get_weather","reasoning":"weather lookup","toolCallParams":{"toolName":"get_weather","toolParams":{"city":"Paris"}}}]}"#;

    #[test]
    fn clean_decision_parses() {
        let decision = parse_decision(WEATHER_DECISION).unwrap();
        assert_eq!(decision.thinking, "Need live data");
        assert_eq!(decision.actions.len(), 1);

        let action = &decision.actions[0];
        assert_eq!(action.kind, ActionKind::ToolCall);
        assert_eq!(action.name.as_deref(), Some("get_weather"));
        let params = action.params(&["toolCallParams"]).unwrap();
        assert_eq!(params["toolParams"]["city"], "Paris");
    }

    #[test]
    fn fenced_and_prose_wrapped_replies_parse() {
        let fenced = format!("```json\n{WEATHER_DECISION}\n```");
        assert_eq!(parse_decision(&fenced).unwrap().actions.len(), 1);

        let prose = format!("Sure, here is my plan:\n{WEATHER_DECISION}\nLet me know!");
        assert_eq!(parse_decision(&prose).unwrap().actions.len(), 1);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let text = r#"note {"thinking":"use } and { freely \" ok","actions":[{"actionType":"DIRECT_RESPONSE","directResponseParams":{"content":"a } b"}}]} trailing }"#;
        let decision = parse_decision(text).unwrap();
        assert_eq!(decision.thinking, "use } and { freely \" ok");
        assert_eq!(decision.actions[0].kind, ActionKind::DirectResponse);
    }

    #[test]
    fn truncated_reply_is_repaired() {
        let text = r#"{"thinking":"The user wants a greeting","actions":[{"actionType":"DIRECT_RESPONSE","directResponseParams":{"content":"Hello there"#;
        let decision = parse_decision(text).unwrap();
        let params = decision.actions[0].params(&["directResponseParams"]).unwrap();
        assert_eq!(params["content"], "Hello there");
    }

    #[test]
    fn repair_handles_dangling_separators() {
        assert_eq!(repair_json(r#"{"a":1,"#).unwrap(), r#"{"a":1}"#);
        assert_eq!(repair_json(r#"{"a":"#).unwrap(), r#"{"a": null}"#);
        assert_eq!(repair_json(r#"{"a":["x","y"#).unwrap(), r#"{"a":["x","y"]}"#);
        assert_eq!(repair_json(r#"{"a":"line\"#).unwrap(), r#"{"a":"line"}"#);
        assert!(repair_json("no braces here").is_none());
    }

    #[test]
    fn repair_is_idempotent() {
        let inputs = [
            r#"{"thinking":"abc","actions":[{"actionType":"TOOL_CALL""#,
            r#"{"a":{"b":[1,2,"#,
            r#"{"s":"unterminated \"quote"#,
            r#"prefix {"done":true} suffix"#,
            r#"{"k":"#,
        ];
        for input in inputs {
            let once = repair_json(input).unwrap();
            let twice = repair_json(&once).unwrap();
            assert_eq!(once, twice, "repair not idempotent for {input}");
        }
    }

    #[test]
    fn structural_errors_have_codes() {
        let cases = [
            ("not json at all", ParseErrorCode::JsonParse),
            (r#"{"thinking":"x"}"#, ParseErrorCode::ActionsMissing),
            (r#"{"actions":[]}"#, ParseErrorCode::ActionsEmpty),
            (r#"{"actions":["oops"]}"#, ParseErrorCode::ActionItemInvalid),
            (r#"{"actions":[{"reasoning":"x"}]}"#, ParseErrorCode::ActionTypeMissing),
            (r#"{"actions":[{"actionType":"DANCE"}]}"#, ParseErrorCode::ActionTypeInvalid),
        ];
        for (text, code) in cases {
            let err = parse_decision(text).unwrap_err();
            assert_eq!(err.code, code, "for {text}");
        }
    }

    #[test]
    fn lenient_aliases_are_accepted() {
        let text = r#"{"actions":[
            {"action":"rag","name":"lookup","params":{"query":"react loop"}},
            {"type":"generate","params":{"prompt":"Summarize"}}
        ]}"#;
        let decision = parse_decision(text).unwrap();
        assert_eq!(decision.actions[0].kind, ActionKind::Retrieve);
        assert_eq!(decision.actions[0].name.as_deref(), Some("lookup"));
        assert_eq!(
            decision.actions[0].params(&["ragRetrieveParams"]).unwrap()["query"],
            json!("react loop")
        );
        assert_eq!(decision.actions[1].kind, ActionKind::Generate);
    }

    #[test]
    fn bare_array_is_an_action_list() {
        let decision = parse_decision(r#"[{"actionType":"COMPLETE"}]"#).unwrap();
        assert_eq!(decision.actions[0].kind, ActionKind::Complete);
        assert!(decision.thinking.is_empty());
    }

    #[test]
    fn excerpt_is_bounded_and_hint_mentions_code() {
        let long = "x".repeat(1000);
        let err = parse_decision(&long).unwrap_err();
        assert_eq!(err.excerpt.chars().count(), 200);

        let hint = err.retry_hint();
        assert!(hint.contains("JSON_PARSE"));
        assert!(hint.contains("exactly one JSON object"));
    }
}
