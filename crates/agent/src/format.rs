//! Canonical rendering of action results for prompts.

use reagent_core::action::ActionResult;

use crate::actions::HandlerTable;

const OUTPUT_CHARS: usize = 500;

/// Cut `text` to at most `max` characters, marking the cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte, _)) => format!("{}...", &text[..byte]),
        None => text.to_string(),
    }
}

/// Fold line breaks into a visible marker so a value stays on one line.
pub fn single_line(text: &str) -> String {
    text.trim().replace("\r\n", "\n").replace('\n', " ⏎ ")
}

/// Three lines per result: status, input, output or error.
pub fn render_result(handlers: &HandlerTable, result: &ActionResult) -> String {
    let status = if result.success {
        format!("Status: success ({} `{}`, {} ms)", result.kind, result.name, result.duration_ms)
    } else {
        let kind = result.error_kind.map(|k| k.as_str()).unwrap_or("UNKNOWN");
        format!("Status: failed [{kind}] ({} `{}`, {} ms)", result.kind, result.name, result.duration_ms)
    };

    let input = format!("Input: {}", single_line(&handlers.describe_input(result)));

    let outcome = if result.success {
        let output = result.data_text();
        if output.trim().is_empty() {
            "Output: (empty)".to_string()
        } else {
            format!("Output: {}", single_line(&truncate_chars(&output, OUTPUT_CHARS)))
        }
    } else {
        let error = result.error.as_deref().unwrap_or("unknown error");
        format!("Error: {}", single_line(&truncate_chars(error, OUTPUT_CHARS)))
    };

    format!("{status}\n{input}\n{outcome}")
}
