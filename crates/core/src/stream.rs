//! Token-level output sink for user-facing text.

/// Receives generated answer text as it is produced.
///
/// Callbacks run on the engine's tasks and must return quickly; forward to a
/// channel if the consumer does real work.
pub trait StreamSink: Send + Sync {
    fn on_start(&self) {}

    fn on_token(&self, token: &str);

    fn on_complete(&self, _full_text: &str) {}

    fn on_error(&self, _error: &str) {}
}
