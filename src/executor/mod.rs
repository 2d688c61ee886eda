//! Executor: the host side of the sandbox boundary. Owns the pool of
//! warmed children, enforces the wall-clock/frame-size ceilings, and
//! gives the RLM Engine a simple acquire/load/exec/release surface.

pub mod child;
pub mod pool;

use std::time::Duration;

use tracing::warn;

use crate::core::capture::{CaptureRecord, SubCallRecord};
use crate::core::query::TokenUsage;
use crate::error::SandboxError;
use crate::gateway::SubLlmGateway;
use pool::{Pool, PooledChild};

/// One query's checked-out sandbox: a pooled child plus the ceilings
/// this query's engine loop should apply when driving it.
pub struct Executor {
    pooled: PooledChild,
    exec_timeout: Duration,
}

impl Executor {
    /// Acquires a child from `pool` and loads `docs` into its namespace.
    pub async fn acquire(
        pool: &Pool,
        docs: Vec<String>,
        exec_timeout: Duration,
    ) -> Result<Self, SandboxError> {
        let mut pooled = pool.acquire().await?;
        pooled.child_mut().load_documents(docs).await?;
        Ok(Self { pooled, exec_timeout })
    }

    /// Runs one code block to completion, servicing nested sub-LLM
    /// callbacks through `gateway`.
    pub async fn exec(
        &mut self,
        code: &str,
        gateway: &SubLlmGateway,
    ) -> Result<(CaptureRecord, Vec<SubCallRecord>, TokenUsage), SandboxError> {
        self.pooled
            .child_mut()
            .exec(code, self.exec_timeout, gateway)
            .await
    }

    /// Releases the child back to the pool (after a successful `reset`),
    /// consuming this handle. Call this on the happy path.
    pub async fn release(self) {
        self.pooled.release().await;
    }

    /// Destroys the child outright, consuming this handle. Call this
    /// after a protocol failure or a cancellation that may have left
    /// the child mid-exec in an unknown state.
    pub async fn destroy(self) {
        self.pooled.destroy().await;
    }
}

/// Re-acquires a fresh executor and reloads `docs`, for the "executor
/// death mid-loop, pool available" recovery path (§4.D). The caller is
/// responsible for preserving driver conversation history across this
/// call; only the sandbox-side state is rebuilt here.
pub async fn reacquire(pool: &Pool, docs: Vec<String>, exec_timeout: Duration) -> Result<Executor, SandboxError> {
    warn!("reacquiring sandbox executor after child death");
    Executor::acquire(pool, docs, exec_timeout).await
}
