//! Provider registry and factory.
//!
//! Maps the configured provider name to a concrete [`LlmProvider`].

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::AgentError;
use crate::llm::provider::LlmProvider;
use crate::llm::providers::OpenAiProvider;

/// Creates an [`LlmProvider`] based on `config.provider`.
///
/// # Supported providers
///
/// - `"openai"` (default) — `OpenAI`-compatible APIs via `async-openai`.
///
/// # Errors
///
/// Returns [`AgentError::UnsupportedProvider`] for unknown provider names.
pub fn create_provider(config: &EngineConfig) -> Result<Arc<dyn LlmProvider>, AgentError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config))),
        other => Err(AgentError::UnsupportedProvider {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_create_openai_provider() {
        let config = EngineConfig::builder()
            .api_key("test")
            .provider("openai")
            .build()
            .unwrap_or_else(|e| panic!("build should succeed: {e}"));
        let provider = create_provider(&config)
            .unwrap_or_else(|e| panic!("create_provider should succeed: {e}"));
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_create_unknown_provider_errors() {
        let config = EngineConfig::builder()
            .api_key("test")
            .provider("unknown")
            .build()
            .unwrap_or_else(|e| panic!("build should succeed: {e}"));
        assert!(create_provider(&config).is_err());
    }
}
