//! Engine configuration: provider credentials, concurrency ceilings, and
//! the sandbox/wire limits that keep a runaway query from consuming the
//! host. Built via [`EngineConfig::builder`] or [`EngineConfig::from_env`].

use std::time::Duration;

use crate::error::AgentError;

/// Default bound on concurrent workers inside `llm_query_batched`.
pub const DEFAULT_MAX_CONCURRENCY: usize = 50;
/// Default per-request timeout for LLM provider calls.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Default retry count for transient provider failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default wall-clock ceiling for a single `exec` call inside the sandbox.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300;
/// Default character ceiling on a single `llm_query`/`llm_query_batched` prompt.
pub const DEFAULT_MAX_SUBCALL_CHARS: usize = 500_000;
/// Default character ceiling on stdout/repr captured from one `exec` call.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 20_000;
/// Default maximum wire-frame size, in bytes (50 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 52_428_800;
/// Default number of warm sandbox children kept in the executor pool.
pub const DEFAULT_POOL_SIZE: usize = 4;
/// Default ceiling on driver loop iterations before `BudgetExhausted`.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Configuration for the RLM engine: provider credentials plus every
/// numeric ceiling that bounds a query's cost and blast radius.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// LLM provider identifier (currently only `"openai"` is implemented).
    pub provider: String,
    /// API key for the configured provider.
    pub api_key: String,
    /// Optional override for the provider's base URL (self-hosted/proxy endpoints).
    pub base_url: Option<String>,
    /// Model id used for the driver conversation.
    pub driver_model: String,
    /// Model id used for sub-LLM calls (`llm_query`/`llm_query_batched`). Falls
    /// back to `driver_model` when unset.
    pub sub_model: Option<String>,
    /// Maximum concurrent workers for `llm_query_batched`.
    pub max_concurrency: usize,
    /// Per-request timeout for LLM provider calls.
    pub timeout: Duration,
    /// Retry count for transient provider failures.
    pub max_retries: u32,
    /// Wall-clock ceiling for a single sandbox `exec` call.
    pub exec_timeout: Duration,
    /// Character ceiling on a single sub-LLM call's prompt.
    pub max_subcall_chars: usize,
    /// Character ceiling on captured stdout/repr per `exec` call.
    pub max_output_chars: usize,
    /// Maximum wire-frame size in bytes; larger frames are a protocol error.
    pub max_frame_bytes: u32,
    /// Number of warm sandbox children kept in the executor pool.
    pub pool_size: usize,
    /// Maximum driver-loop iterations before the query ends in `BudgetExhausted`.
    pub max_iterations: usize,
    /// Whether the Citation Verifier runs before a `FINAL` answer is accepted.
    pub verify_citations: bool,
}

impl EngineConfig {
    /// Starts a new [`EngineConfigBuilder`] with no fields set.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Builds a config from environment variables, falling back to defaults.
    ///
    /// Recognized variables: `RLM_PROVIDER`, `OPENAI_API_KEY` or
    /// `RLM_API_KEY`, `OPENAI_BASE_URL` or `RLM_BASE_URL`,
    /// `SHESHA_DRIVER_MODEL`, `SHESHA_SUB_MODEL`, `SHESHA_MAX_CONCURRENCY`,
    /// `SHESHA_POOL_SIZE`, `SHESHA_MAX_ITERATIONS`.
    pub fn from_env() -> Result<Self, AgentError> {
        EngineConfigBuilder::default().from_env().build()
    }
}

/// Chainable builder for [`EngineConfig`]. All fields default to `None` and
/// are filled in with the constants above at [`build`](Self::build) time.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    driver_model: Option<String>,
    sub_model: Option<String>,
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    exec_timeout: Option<Duration>,
    max_subcall_chars: Option<usize>,
    max_output_chars: Option<usize>,
    max_frame_bytes: Option<u32>,
    pool_size: Option<usize>,
    max_iterations: Option<usize>,
    verify_citations: Option<bool>,
}

impl EngineConfigBuilder {
    /// Sets the provider identifier.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets a provider base-URL override.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the driver-conversation model id.
    #[must_use]
    pub fn driver_model(mut self, model: impl Into<String>) -> Self {
        self.driver_model = Some(model.into());
        self
    }

    /// Sets the sub-LLM model id.
    #[must_use]
    pub fn sub_model(mut self, model: impl Into<String>) -> Self {
        self.sub_model = Some(model.into());
        self
    }

    /// Sets the `llm_query_batched` concurrency ceiling.
    #[must_use]
    pub const fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    /// Sets the provider request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the provider retry count.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the per-`exec` wall-clock ceiling.
    #[must_use]
    pub const fn exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = Some(timeout);
        self
    }

    /// Sets the sub-LLM call character ceiling.
    #[must_use]
    pub const fn max_subcall_chars(mut self, n: usize) -> Self {
        self.max_subcall_chars = Some(n);
        self
    }

    /// Sets the captured-output character ceiling.
    #[must_use]
    pub const fn max_output_chars(mut self, n: usize) -> Self {
        self.max_output_chars = Some(n);
        self
    }

    /// Sets the maximum wire-frame size in bytes.
    #[must_use]
    pub const fn max_frame_bytes(mut self, n: u32) -> Self {
        self.max_frame_bytes = Some(n);
        self
    }

    /// Sets the executor pool size.
    #[must_use]
    pub const fn pool_size(mut self, n: usize) -> Self {
        self.pool_size = Some(n);
        self
    }

    /// Sets the driver-loop iteration budget.
    #[must_use]
    pub const fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Enables or disables the Citation Verifier pass.
    #[must_use]
    pub const fn verify_citations(mut self, enabled: bool) -> Self {
        self.verify_citations = Some(enabled);
        self
    }

    /// Fills unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("RLM_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("RLM_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("OPENAI_BASE_URL")
                .or_else(|_| std::env::var("RLM_BASE_URL"))
                .ok();
        }
        if self.driver_model.is_none() {
            self.driver_model = std::env::var("SHESHA_DRIVER_MODEL").ok();
        }
        if self.sub_model.is_none() {
            self.sub_model = std::env::var("SHESHA_SUB_MODEL").ok();
        }
        if self.max_concurrency.is_none() {
            self.max_concurrency = std::env::var("SHESHA_MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.pool_size.is_none() {
            self.pool_size = std::env::var("SHESHA_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.max_iterations.is_none() {
            self.max_iterations = std::env::var("SHESHA_MAX_ITERATIONS")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        self
    }

    /// Validates required fields and applies defaults for the rest.
    ///
    /// # Errors
    /// Returns [`AgentError::ApiKeyMissing`] if no API key was configured.
    pub fn build(self) -> Result<EngineConfig, AgentError> {
        let api_key = self.api_key.ok_or(AgentError::ApiKeyMissing)?;
        Ok(EngineConfig {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self.base_url,
            driver_model: self
                .driver_model
                .unwrap_or_else(|| "gpt-5.2-2025-12-11".to_string()),
            sub_model: self.sub_model,
            max_concurrency: self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
            timeout: self
                .timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            exec_timeout: self
                .exec_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS)),
            max_subcall_chars: self.max_subcall_chars.unwrap_or(DEFAULT_MAX_SUBCALL_CHARS),
            max_output_chars: self.max_output_chars.unwrap_or(DEFAULT_MAX_OUTPUT_CHARS),
            max_frame_bytes: self.max_frame_bytes.unwrap_or(DEFAULT_MAX_FRAME_BYTES),
            pool_size: self.pool_size.unwrap_or(DEFAULT_POOL_SIZE),
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            verify_citations: self.verify_citations.unwrap_or(true),
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfig::builder()
            .api_key("test-key")
            .build()
            .unwrap_or_else(|e| panic!("build should succeed: {e}"));
        assert_eq!(config.provider, "openai");
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(config.verify_citations);
        assert!(config.sub_model.is_none());
    }

    #[test]
    fn test_builder_missing_api_key() {
        let result = EngineConfigBuilder::default().build();
        assert!(matches!(result, Err(AgentError::ApiKeyMissing)));
    }

    #[test]
    fn test_builder_custom_values() {
        let config = EngineConfig::builder()
            .api_key("test-key")
            .driver_model("gpt-5.2-2025-12-11")
            .sub_model("gpt-5-mini-2025-08-07")
            .max_concurrency(8)
            .pool_size(2)
            .max_iterations(5)
            .verify_citations(false)
            .build()
            .unwrap_or_else(|e| panic!("build should succeed: {e}"));
        assert_eq!(config.sub_model.as_deref(), Some("gpt-5-mini-2025-08-07"));
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.max_iterations, 5);
        assert!(!config.verify_citations);
    }
}
