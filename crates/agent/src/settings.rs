//! Runtime knobs for the engine, derived from [`AppConfig`].

use reagent_config::{AppConfig, ReflectionConfig};
use reagent_core::action::ActionKind;
use std::time::Duration;

/// Which successful results let reflection skip the model judge.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionPolicy {
    /// A lone successful result of one of these kinds counts as achieved
    pub shortcut_kinds: Vec<ActionKind>,
    /// Shortcut results of these kinds get a synthesis pass before answering
    pub summary_kinds: Vec<ActionKind>,
    /// Ask the model when no shortcut applies; otherwise keep iterating
    pub judge_with_model: bool,
}

impl Default for ReflectionPolicy {
    fn default() -> Self {
        Self::from(&ReflectionConfig::default())
    }
}

impl From<&ReflectionConfig> for ReflectionPolicy {
    fn from(config: &ReflectionConfig) -> Self {
        Self {
            shortcut_kinds: config.shortcut_kinds.clone(),
            summary_kinds: config.summary_kinds.clone(),
            judge_with_model: config.judge_with_model,
        }
    }
}

impl ReflectionPolicy {
    pub fn is_shortcut(&self, kind: ActionKind) -> bool {
        self.shortcut_kinds.contains(&kind)
    }

    pub fn needs_summary(&self, kind: ActionKind) -> bool {
        self.summary_kinds.contains(&kind)
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_iterations: u32,
    pub max_actions_per_batch: usize,
    pub worker_pool_size: usize,
    pub confirmation_timeout: Duration,
    /// Total decision attempts per iteration, including the first
    pub parse_retries: u32,
    pub history_window: usize,
    pub execution_history_window: usize,
    pub generation_history_window: usize,
    pub fast_path: bool,
    pub anomaly_guard: bool,
    pub generation_timeout: Duration,
    pub token_delay_min: Duration,
    pub token_delay_max: Duration,
    pub temperature: f32,
    pub reflection: ReflectionPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        let engine = &config.engine;
        Self {
            max_iterations: engine.max_iterations,
            max_actions_per_batch: engine.max_actions_per_batch,
            worker_pool_size: engine.worker_pool_size,
            confirmation_timeout: Duration::from_secs(engine.confirmation_timeout_secs),
            parse_retries: engine.parse_retries.max(1),
            history_window: engine.history_window,
            execution_history_window: engine.execution_history_window,
            generation_history_window: engine.generation_history_window,
            fast_path: engine.fast_path,
            anomaly_guard: engine.anomaly_guard,
            generation_timeout: Duration::from_secs(engine.generation_timeout_secs),
            token_delay_min: Duration::from_millis(engine.token_delay_min_ms),
            token_delay_max: Duration::from_millis(engine.token_delay_max_ms.max(engine.token_delay_min_ms)),
            temperature: config.default_temperature,
            reflection: ReflectionPolicy::from(&config.reflection),
        }
    }
}

impl EngineSettings {
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_reflection(mut self, policy: ReflectionPolicy) -> Self {
        self.reflection = policy;
        self
    }

    pub fn with_fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    /// Stream direct responses without pauses between tokens.
    pub fn without_token_delay(mut self) -> Self {
        self.token_delay_min = Duration::ZERO;
        self.token_delay_max = Duration::ZERO;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_config_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.max_iterations, 10);
        assert_eq!(settings.max_actions_per_batch, 5);
        assert_eq!(settings.confirmation_timeout, Duration::from_secs(60));
        assert_eq!(settings.parse_retries, 3);
        assert_eq!(settings.token_delay_min, Duration::from_millis(15));
        assert_eq!(settings.token_delay_max, Duration::from_millis(25));
        assert!(settings.reflection.is_shortcut(ActionKind::Generate));
        assert!(settings.reflection.needs_summary(ActionKind::ToolCall));
        assert!(!settings.reflection.needs_summary(ActionKind::DirectResponse));
    }

    #[test]
    fn zero_parse_retries_still_allows_one_attempt() {
        let mut config = AppConfig::default();
        config.engine.parse_retries = 0;
        assert_eq!(EngineSettings::from(&config).parse_retries, 1);
    }
}
