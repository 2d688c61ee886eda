//! Typed payloads carried inside wire frames. A single `command`/`status`
//! tag field at the payload top level selects the operation, as the
//! wire contract requires; everything else is command-specific.

use serde::{Deserialize, Serialize};

use crate::core::CaptureRecord;

/// A command sent from the Executor to the Sandbox Runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Health check.
    Ping,
    /// Bind `context` in the namespace to the given ordered documents.
    LoadDocuments {
        /// Document contents, in order.
        docs: Vec<String>,
    },
    /// Execute one code block against the persistent namespace.
    Exec {
        /// The code to execute.
        code: String,
        /// Wall-clock ceiling for this exec, in seconds.
        exec_timeout_s: u64,
    },
    /// Clear user bindings, keeping builtins and the API surface.
    Reset,
    /// Terminate cleanly.
    Shutdown,
    /// A resolved sub-LLM response, delivered in answer to a
    /// `Response::SubcallRequest` the runner is blocked on.
    SubcallResponse {
        /// The resolved responses, in request order.
        response: SubCallResponse,
    },
}

/// A response sent from the Sandbox Runner to the Executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Reply to `Ping`.
    Ok,
    /// Reply to `LoadDocuments`.
    Loaded {
        /// Number of documents bound.
        loaded: usize,
    },
    /// Reply to `Exec`.
    Capture(CaptureRecord),
    /// Reply to `Reset`.
    Reset,
    /// A nested request issued mid-`Exec`, when sandbox code calls
    /// `llm_query`/`llm_query_batched`. The Executor must answer with a
    /// `Command::SubcallResponse` before the runner continues.
    SubcallRequest(SubCallRequest),
    /// The runner encountered a protocol-level problem with the
    /// command itself (not a user code exception).
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// One or more sub-LLM calls issued by sandbox code mid-`Exec`. A single
/// `llm_query` is represented as a one-element batch so the Executor's
/// concurrent-dispatch path is the only path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCallRequest {
    /// One entry per `llm_query` call (or per element of a `llm_query_batched`).
    pub calls: Vec<SubCallItem>,
}

/// One sub-LLM call within a [`SubCallRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCallItem {
    /// The instruction text.
    pub instruction: String,
    /// Optional untrusted content, already wrapped in the envelope by
    /// the Sub-LLM Gateway before this message was constructed.
    pub content: Option<String>,
    /// Sub-model override, if the caller requested one.
    pub model_override: Option<String>,
}

/// The resolved results for a [`SubCallRequest`], in the same order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCallResponse {
    /// One entry per request item, in request order.
    pub results: Vec<SubCallResult>,
}

/// The outcome of one sub-LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubCallResult {
    /// The call succeeded.
    Text {
        /// The sub-LLM's response text.
        text: String,
    },
    /// The call was rejected for exceeding the per-call character
    /// ceiling; the runner must raise this inside user code, not
    /// return it as a plain string.
    SizeExceeded {
        /// Human-readable message; always contains the word "exceeds".
        message: String,
    },
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serde_tag() {
        let cmd = Command::Exec {
            code: "1+1".to_string(),
            exec_timeout_s: 300,
        };
        let json = serde_json::to_string(&cmd).unwrap_or_default();
        assert!(json.contains("\"command\":\"exec\""));
        let back: Command = serde_json::from_str(&json).unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(back, Command::Exec { .. }));
    }

    #[test]
    fn test_response_serde_tag() {
        let resp = Response::Loaded { loaded: 3 };
        let json = serde_json::to_string(&resp).unwrap_or_default();
        assert!(json.contains("\"status\":\"loaded\""));
    }

    #[test]
    fn test_size_exceeded_message_contains_exceeds() {
        let result = SubCallResult::SizeExceeded {
            message: "content length 600000 exceeds the 500000 character ceiling".to_string(),
        };
        if let SubCallResult::SizeExceeded { message } = result {
            assert!(message.contains("exceeds"));
        }
    }
}
