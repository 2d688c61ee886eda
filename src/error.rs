//! Crate-wide error types.
//!
//! Three concerns, three enums: [`AgentError`] is the LLM-provider boundary
//! (inherited almost unchanged from the teacher this engine grew out of),
//! [`SandboxError`] is the wire/process boundary between the Executor and a
//! sandbox child, and [`EngineError`] is what the RLM iteration loop
//! surfaces to callers. Sandbox-exec failures (user code raising inside
//! `exec`) are deliberately **not** a variant of any of these — they are
//! captured into a `CaptureRecord` and fed back to the driver, never
//! propagated as a Rust error.

use thiserror::Error;

/// Errors from the LLM-provider boundary (driver and sub-LLM calls alike).
#[derive(Debug, Error)]
pub enum AgentError {
    /// The provider name in configuration does not match a known client.
    #[error("unsupported LLM provider: {name}")]
    UnsupportedProvider {
        /// The unrecognized provider name.
        name: String,
    },

    /// No API key was available when building the provider configuration.
    #[error("no API key configured (set OPENAI_API_KEY or RLM_API_KEY)")]
    ApiKeyMissing,

    /// The underlying HTTP/SDK call to the provider failed.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Human-readable failure description from the SDK.
        message: String,
        /// HTTP status code, if the SDK exposed one.
        status: Option<u16>,
    },

    /// A streaming response could not be read.
    #[error("stream error: {message}")]
    Stream {
        /// Description of the stream failure.
        message: String,
    },

    /// A response could not be parsed into the expected shape.
    #[error("failed to parse response: {message} (content: {content})")]
    ResponseParse {
        /// Parser failure description.
        message: String,
        /// Truncated preview of the offending content.
        content: String,
    },
}

/// Errors from the Executor ↔ sandbox-child wire boundary.
///
/// These correspond to the *protocol* failure kind: framing, oversized
/// frames, and child death. They never reach user code; they terminate
/// an `exec` call at the Executor and are turned into [`EngineError`]s
/// (or trigger pool recovery) by the caller.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The frame length prefix or payload could not be decoded.
    #[error("malformed frame: {0}")]
    Framing(String),

    /// A frame exceeded the configured maximum frame size.
    #[error("frame of {actual} bytes exceeds the {limit} byte ceiling")]
    OversizedFrame {
        /// Actual frame size in bytes.
        actual: u32,
        /// Configured ceiling in bytes.
        limit: u32,
    },

    /// The sandbox child process exited or its pipes closed unexpectedly.
    #[error("sandbox child died: {0}")]
    ChildDied(String),

    /// An I/O error occurred reading or writing the framed stream.
    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The per-exec wall-clock budget elapsed before a response arrived.
    #[error("sandbox exec timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Spawning the child process itself failed.
    #[error("failed to spawn sandbox child: {0}")]
    Spawn(String),
}

/// Errors the RLM Engine surfaces to the caller of `query(...)`.
///
/// Each variant corresponds to one entry in the engine-visible failure
/// taxonomy. `SandboxExec` and `Size` are handled inside the engine (fed
/// back to the driver) and therefore do not appear here; an `EngineError`
/// is only ever constructed for failures that end the query.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A framing/oversized-frame/child-death failure with no pool to recover from.
    #[error("protocol failure: {0}")]
    Protocol(#[from] SandboxError),

    /// The per-exec wall-clock ceiling was exceeded and no recovery was possible.
    #[error("execution timed out")]
    Timeout,

    /// The driver or sub-LLM provider failed after exhausting retries.
    #[error("provider failure: {0}")]
    Provider(#[from] AgentError),

    /// The cooperative cancel signal was observed.
    #[error("query cancelled")]
    Cancelled,

    /// The iteration budget was exhausted without a resolved answer.
    #[error("iteration budget of {max_iterations} exhausted")]
    BudgetExhausted {
        /// The configured iteration ceiling.
        max_iterations: usize,
    },

    /// Any other unexpected internal failure.
    #[error("internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Maps this error onto the `QueryResult.terminal` state tags from §6.
    #[must_use]
    pub const fn terminal_state(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "executor_failed",
            Self::Timeout => "executor_failed",
            Self::Provider(_) => "provider_failed",
            Self::Cancelled => "cancelled",
            Self::BudgetExhausted { .. } => "budget_exhausted",
            Self::Internal(_) => "executor_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_state_mapping() {
        assert_eq!(EngineError::Cancelled.terminal_state(), "cancelled");
        assert_eq!(
            EngineError::BudgetExhausted { max_iterations: 20 }.terminal_state(),
            "budget_exhausted"
        );
        assert_eq!(
            EngineError::Protocol(SandboxError::ChildDied("eof".to_string())).terminal_state(),
            "executor_failed"
        );
    }

    #[test]
    fn test_agent_error_display() {
        let err = AgentError::UnsupportedProvider {
            name: "bogus".to_string(),
        };
        assert!(err.to_string().contains("bogus"));
    }
}
