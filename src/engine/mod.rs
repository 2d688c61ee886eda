//! The RLM Engine: owns the driver conversation, mediates between the
//! driver and the sandbox, and terminates a query into a [`QueryResult`]
//! that always carries a terminal state tag — no failure mode here
//! propagates as a bare `Result::Err` past [`Engine::query`].

pub mod parsing;
pub mod prompts;
pub mod rlm;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::{Query, QueryResult};
use crate::executor::pool::Pool;
use crate::llm::provider::LlmProvider;
use crate::storage::TraceStorage;

/// Wires together the collaborators a query needs: the executor pool,
/// the driver/sub-LLM provider, trace storage, and process-wide config.
pub struct Engine {
    pool: Pool,
    provider: Arc<dyn LlmProvider>,
    storage: Arc<dyn TraceStorage>,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine from its collaborators.
    #[must_use]
    pub const fn new(
        pool: Pool,
        provider: Arc<dyn LlmProvider>,
        storage: Arc<dyn TraceStorage>,
        config: EngineConfig,
    ) -> Self {
        Self {
            pool,
            provider,
            storage,
            config,
        }
    }

    /// Runs one query to completion. Always returns a [`QueryResult`];
    /// every internal failure mode degrades to a terminal state tag
    /// rather than propagating as an error to the caller.
    pub async fn query(&self, query: Query) -> QueryResult {
        rlm::run(&self.pool, &self.provider, self.storage.as_ref(), &self.config, query).await
    }
}
