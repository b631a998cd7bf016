//! Prompts for turning raw results into a user-facing answer.

use reagent_core::action::{ActionKind, ActionResult};
use reagent_core::context::AgentContext;
use serde_json::Value;
use std::fmt::Write;

use crate::format::truncate_chars;

pub const FAST_PATH_SYSTEM: &str = "You turn raw tool output into a short, friendly answer. \
Use only the data given. Do not mention tools, JSON or internal steps.";

pub const SUMMARY_SYSTEM: &str = "You write the final answer for the user from the results an agent gathered. \
Answer the original question directly, use only the information provided, and say plainly when something could not be found.";

/// Returned without a model call when every raw result came back empty.
pub const NO_INFORMATION_ANSWER: &str = "I could not find any information matching your request. \
Try rephrasing the question or narrowing it down.";

pub fn fast_path_prompt(goal: &str, output: &str) -> String {
    let data = match output.trim() {
        "" => "(no data)".to_string(),
        trimmed => truncate_chars(trimmed, 1500),
    };
    format!("User request: {goal}\n\nTool output:\n{data}\n\nWrite the answer.")
}

pub fn summary_prompt(goal: &str, ctx: &AgentContext, results: &[ActionResult]) -> String {
    let mut out = format!("## Original question\n{goal}\n");

    if !ctx.tool_call_history.is_empty() {
        out.push_str("\n## Tool calls\n");
        for record in &ctx.tool_call_history {
            let status = if record.success { "ok" } else { "failed" };
            let _ = writeln!(
                out,
                "- {} {} [{status}]: {}",
                record.tool_name,
                record.params,
                truncate_chars(&record.result, 500)
            );
        }
    }

    if !ctx.retrieval_history.is_empty() {
        out.push_str("\n## Knowledge searches\n");
        for record in &ctx.retrieval_history {
            let _ = writeln!(out, "- \"{}\": {} results", record.query, record.result_count);
        }
    }

    out.push_str("\n## Latest results\n");
    for result in results {
        if result.success {
            let _ = writeln!(out, "- {}: {}", result.kind, truncate_chars(&result.data_text(), 1000));
        } else {
            let _ = writeln!(
                out,
                "- {} failed: {}",
                result.kind,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    out.push_str(
        "\n## Guidance\nAnswer in plain language. If the results are empty or unrelated, \
         say that no matching information was found instead of guessing.",
    );
    out
}

/// Whether `text` is a response that found nothing.
pub fn is_empty_payload(text: &str) -> bool {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    compact.is_empty()
        || ["\"resources\":[]", "\"totalCount\":0", "\"count\":0", "\"documents\":[]"]
            .iter()
            .any(|marker| compact.contains(marker))
}

/// Whether a successful raw result carries no usable data.
pub fn is_empty_result(result: &ActionResult) -> bool {
    if result.kind == ActionKind::Retrieve
        && result.metadata.get("result_count").and_then(Value::as_u64) == Some(0)
    {
        return true;
    }
    is_empty_payload(&result.data_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_context;
    use reagent_core::action::{AgentAction, ErrorKind};
    use serde_json::Map;

    #[test]
    fn empty_payload_markers() {
        assert!(is_empty_payload(""));
        assert!(is_empty_payload("   \n"));
        assert!(is_empty_payload(r#"{"resources": [], "page": 1}"#));
        assert!(is_empty_payload(r#"{ "totalCount" : 0 }"#));
        assert!(is_empty_payload(r#"{"documents":[ ]}"#));
        assert!(!is_empty_payload(r#"{"count": 3}"#));
        assert!(!is_empty_payload("Sunny, 18 degrees"));
    }

    #[test]
    fn retrieval_with_no_documents_is_empty() {
        let action = AgentAction::retrieve("q", vec![]);
        let result = ActionResult::success(&action, "No relevant knowledge found.").with_metadata("result_count", 0);
        assert!(is_empty_result(&result));

        let found = ActionResult::success(&action, "Retrieved 1 items:").with_metadata("result_count", 1);
        assert!(!is_empty_result(&found));
    }

    #[test]
    fn fast_path_prompt_bounds_output() {
        let prompt = fast_path_prompt("Weather?", &"x".repeat(4000));
        assert!(prompt.contains("User request: Weather?"));
        assert!(prompt.len() < 1700);
        assert!(fast_path_prompt("Weather?", "").contains("(no data)"));
    }

    #[test]
    fn summary_prompt_lists_history_and_results() {
        let mut ctx = test_context();
        let call = AgentAction::tool_call("get_weather", Map::new());
        let search = AgentAction::retrieve("paris", vec![]);
        let call_result = ActionResult::success(&call, r#"{"temp":18}"#);
        let search_result = ActionResult::success(&search, "Retrieved 2 items:").with_metadata("result_count", 2);
        ctx.record_batch(&[call, search.clone()], &[call_result, search_result.clone()]);
        let failed = ActionResult::failure(&search, "index offline", ErrorKind::RetrieveError);

        let prompt = summary_prompt("Weather in Paris?", &ctx, &[search_result, failed]);

        assert!(prompt.starts_with("## Original question\nWeather in Paris?"));
        assert!(prompt.contains(r#"- get_weather {} [ok]: {"temp":18}"#));
        assert!(prompt.contains("- \"paris\": 2 results"));
        assert!(prompt.contains("- RAG_RETRIEVE failed: index offline"));
        assert!(prompt.contains("## Guidance"));
    }
}
