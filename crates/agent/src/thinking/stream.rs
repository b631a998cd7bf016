//! Live reasoning extraction from a streaming decision.
//!
//! While the model streams its JSON decision, the partial `"thinking"`
//! string is pulled out of the accumulated text and only the characters not
//! yet reported are published. The first sighting of the `"actions"` key
//! switches the status to planning.

use reagent_core::event::AgentEvent;

#[derive(Debug, Default)]
pub struct ThinkingTracker {
    buffer: String,
    sent: String,
    planning: bool,
}

impl ThinkingTracker {
    /// Feed one streamed chunk; returns the events it produces.
    pub fn push(&mut self, delta: &str) -> Vec<AgentEvent> {
        self.buffer.push_str(delta);
        let mut events = Vec::new();

        if let Some(current) = partial_string_field(&self.buffer, "thinking")
            && current.len() > self.sent.len()
            && current.starts_with(self.sent.as_str())
        {
            let fresh = current[self.sent.len()..].to_string();
            self.sent = current;
            events.push(AgentEvent::ThinkingDelta { delta: fresh });
        }

        if !self.planning && self.buffer.contains("\"actions\"") {
            self.planning = true;
            events.push(AgentEvent::Planning);
        }
        events
    }

    pub fn thinking(&self) -> &str {
        &self.sent
    }
}

/// The decoded value of string field `key` as far as it has been written.
/// An escape sequence cut off by the end of the text is left out until the
/// rest of it arrives.
pub fn partial_string_field(text: &str, key: &str) -> Option<String> {
    let needle = format!("\"{key}\"");
    let after_key = &text[text.find(&needle)? + needle.len()..];
    let after_colon = after_key.trim_start().strip_prefix(':')?;
    let body = after_colon.trim_start().strip_prefix('"')?;

    let mut value = String::new();
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => break,
            '\\' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    if hex.len() < 4 {
                        break;
                    }
                    if let Some(decoded) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        value.push(decoded);
                    }
                }
                Some(other) => value.push(other),
                None => break,
            },
            _ => value.push(ch),
        }
    }
    Some(value)
}
