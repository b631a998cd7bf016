//! Bounded calls to the text generator.
//!
//! Every model call the engine makes goes through [`Generator`], which caps
//! the whole call (including draining a stream) at the configured timeout.

use reagent_core::error::ProviderError;
use reagent_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn Provider>,
    timeout: Duration,
}

impl Generator {
    pub fn new(provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn timed_out(&self) -> ProviderError {
        ProviderError::Timeout(format!("no reply within {}s", self.timeout.as_secs()))
    }

    /// Blocking completion; returns the reply text.
    pub async fn complete_text(&self, request: ProviderRequest) -> Result<String, ProviderError> {
        debug!(provider = self.provider.name(), model = %request.model, messages = request.messages.len(), "Generator call");
        let response = tokio::time::timeout(self.timeout, self.provider.complete(request))
            .await
            .map_err(|_| self.timed_out())??;
        Ok(response.message.content)
    }

    /// Streaming completion. `on_delta` sees each non-empty chunk as it
    /// arrives; the full text is returned at the end.
    pub async fn stream_text<F>(&self, mut request: ProviderRequest, mut on_delta: F) -> Result<String, ProviderError>
    where
        F: FnMut(&str) + Send,
    {
        debug!(provider = self.provider.name(), model = %request.model, "Streaming generator call");
        request.stream = true;
        let drain = async {
            let mut chunks = self.provider.stream(request).await?;
            let mut text = String::new();
            while let Some(chunk) = chunks.recv().await {
                let chunk = chunk?;
                if let Some(delta) = chunk.content.filter(|d| !d.is_empty()) {
                    text.push_str(&delta);
                    on_delta(&delta);
                }
                if chunk.done {
                    break;
                }
            }
            Ok(text)
        };
        tokio::time::timeout(self.timeout, drain)
            .await
            .map_err(|_| self.timed_out())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, StalledProvider};
    use reagent_core::message::Message;

    fn request() -> ProviderRequest {
        ProviderRequest::new("test-model", vec![Message::user("hi")])
    }

    #[tokio::test]
    async fn complete_returns_text() {
        let provider = Arc::new(SequentialMockProvider::texts(&["hello"]));
        let generator = Generator::new(provider.clone(), Duration::from_secs(5));
        assert_eq!(generator.complete_text(request()).await.unwrap(), "hello");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn stream_reports_deltas() {
        let provider = Arc::new(SequentialMockProvider::texts(&["streamed reply"]));
        let generator = Generator::new(provider, Duration::from_secs(5));
        let mut seen = Vec::new();
        let text = generator
            .stream_text(request(), |delta| seen.push(delta.to_string()))
            .await
            .unwrap();
        assert_eq!(text, "streamed reply");
        assert_eq!(seen.concat(), "streamed reply");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let generator = Generator::new(Arc::new(StalledProvider), Duration::from_secs(120));
        let err = generator.complete_text(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));

        let err = generator.stream_text(request(), |_| {}).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
