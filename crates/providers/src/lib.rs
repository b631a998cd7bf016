//! Text generator implementations for Reagent.
//!
//! All providers implement the `reagent_core::Provider` trait.
//! [`build_from_config`] wires the configured endpoint.

pub mod openai_compat;

use reagent_config::AppConfig;
use reagent_core::error::ProviderError;
use reagent_core::provider::Provider;
use std::sync::Arc;
use std::time::Duration;

pub use openai_compat::OpenAiCompatProvider;

/// Build the text generator described by `config`.
///
/// Local endpoints (`localhost`, `127.0.0.1`) work without an API key; any
/// other endpoint requires one.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let is_local = config.base_url.contains("localhost") || config.base_url.contains("127.0.0.1");
    let api_key = match (&config.api_key, is_local) {
        (Some(key), _) => key.clone(),
        (None, true) => "local".to_string(),
        (None, false) => {
            return Err(ProviderError::NotConfigured(
                "No API key. Set REAGENT_API_KEY or api_key in ~/.reagent/config.toml".into(),
            ));
        }
    };

    let name = if is_local { "local" } else { "openai-compatible" };
    tracing::debug!(provider = name, base_url = %config.base_url, "Building provider");
    Ok(Arc::new(OpenAiCompatProvider::with_timeout(
        name,
        config.base_url.clone(),
        api_key,
        Duration::from_secs(config.engine.generation_timeout_secs),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_endpoint_needs_a_key() {
        let config = AppConfig::default();
        assert!(matches!(
            build_from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn local_endpoint_works_without_key() {
        let config = AppConfig {
            base_url: "http://localhost:11434/v1".into(),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "local");
    }

    #[test]
    fn configured_key_is_used() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai-compatible");
    }
}
