//! Sub-LLM Gateway: services `llm_query`/`llm_query_batched` calls
//! issued by sandbox code, wrapping untrusted content and fanning out
//! batches across a bounded worker set.

pub mod envelope;

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::core::capture::SubCallRecord;
use crate::core::query::TokenUsage;
use crate::error::AgentError;
use crate::llm::message::{ChatRequest, TokenUsage as ModelTokenUsage, system_message, user_message};
use crate::llm::provider::LlmProvider;
use crate::wire::message::{SubCallItem, SubCallRequest, SubCallResponse, SubCallResult};

/// Services the sandbox's sub-LLM surface for one query: wraps
/// document-derived content in the [`envelope`], enforces the per-call
/// character ceiling, and runs batched calls concurrently in input order.
pub struct SubLlmGateway {
    provider: Arc<dyn LlmProvider>,
    sub_model: String,
    max_concurrency: usize,
    max_subcall_chars: usize,
    envelope_token: String,
}

impl SubLlmGateway {
    /// Creates a gateway bound to one query's sub-model, concurrency
    /// bound, character ceiling, and envelope token.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        sub_model: impl Into<String>,
        max_concurrency: usize,
        max_subcall_chars: usize,
        envelope_token: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            sub_model: sub_model.into(),
            max_concurrency: max_concurrency.max(1),
            max_subcall_chars,
            envelope_token: envelope_token.into(),
        }
    }

    /// The per-query envelope token, advertised in system prompts.
    #[must_use]
    pub fn envelope_token(&self) -> &str {
        &self.envelope_token
    }

    /// Answers one `SubCallRequest` (a single `llm_query` or the whole
    /// batch of a `llm_query_batched`), returning results in the same
    /// order as the request's items, the token usage spent, and one
    /// [`SubCallRecord`] per item for trace recording.
    pub async fn handle(&self, request: SubCallRequest) -> (SubCallResponse, TokenUsage, Vec<SubCallRecord>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let futures = request.calls.into_iter().map(|item| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed while futures hold a reference");
                self.dispatch_one(item).await
            }
        });

        let dispatched = join_all(futures).await;
        let mut results = Vec::with_capacity(dispatched.len());
        let mut records = Vec::with_capacity(dispatched.len());
        let mut usage = TokenUsage::default();
        for (result, record, call_usage) in dispatched {
            if let Some(call_usage) = call_usage {
                usage.record(&record.model, &call_usage);
            }
            results.push(result);
            records.push(record);
        }
        (SubCallResponse { results }, usage, records)
    }

    async fn dispatch_one(&self, item: SubCallItem) -> (SubCallResult, SubCallRecord, Option<ModelTokenUsage>) {
        let model = item.model_override.clone().unwrap_or_else(|| self.sub_model.clone());
        let instruction = item.instruction.clone();

        let wrapped_content = item
            .content
            .as_deref()
            .map(|c| envelope::wrap(c, &self.envelope_token));

        let effective_len = item.instruction.chars().count()
            + wrapped_content.as_ref().map_or(0, |c| c.chars().count());

        if effective_len > self.max_subcall_chars {
            let message = format!(
                "content length {effective_len} exceeds the {} character ceiling",
                self.max_subcall_chars
            );
            let record = SubCallRecord {
                instruction,
                content_len: effective_len,
                model,
                size_exceeded: true,
                response: None,
                prompt_tokens: 0,
                completion_tokens: 0,
            };
            return (SubCallResult::SizeExceeded { message }, record, None);
        }

        let user_text = wrapped_content.map_or_else(
            || item.instruction.clone(),
            |content| format!("{}\n\n{content}", item.instruction),
        );

        let request = ChatRequest {
            model: model.clone(),
            messages: vec![
                system_message(&envelope::describe(&self.envelope_token)),
                user_message(&user_text),
            ],
            temperature: None,
            max_tokens: None,
            json_mode: false,
            stream: false,
        };

        match self.provider.chat(&request).await {
            Ok(response) => {
                let record = SubCallRecord {
                    instruction,
                    content_len: effective_len,
                    model: model.clone(),
                    size_exceeded: false,
                    response: Some(response.content.clone()),
                    prompt_tokens: response.usage.prompt_tokens,
                    completion_tokens: response.usage.completion_tokens,
                };
                (
                    SubCallResult::Text {
                        text: response.content,
                    },
                    record,
                    Some(response.usage),
                )
            }
            Err(err) => {
                let text = format!("(sub-LLM call failed: {})", provider_error_text(&err));
                let record = SubCallRecord {
                    instruction,
                    content_len: effective_len,
                    model: model.clone(),
                    size_exceeded: false,
                    response: Some(text.clone()),
                    prompt_tokens: 0,
                    completion_tokens: 0,
                };
                (SubCallResult::Text { text }, record, None)
            }
        }
    }
}

fn provider_error_text(err: &AgentError) -> String {
    err.to_string()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::pin::Pin;

    use crate::llm::message::{ChatResponse, TokenUsage as ModelTokenUsage};
    use futures_util::Stream;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
            Ok(ChatResponse {
                content: format!("echo:{}", request.messages.last().map_or("", |m| m.content.as_str())),
                usage: ModelTokenUsage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                },
                finish_reason: Some("stop".to_string()),
            })
        }

        async fn chat_stream(
            &self,
            _request: &ChatRequest,
        ) -> Result<Pin<Box<dyn Stream<Item = Result<String, AgentError>> + Send>>, AgentError>
        {
            unreachable!("not exercised in these tests")
        }
    }

    #[tokio::test]
    async fn test_size_exceeded_is_catchable_not_silent() {
        let gateway = SubLlmGateway::new(Arc::new(EchoProvider), "sub-model", 4, 10, "tok123");
        let request = SubCallRequest {
            calls: vec![SubCallItem {
                instruction: "summarize this please".to_string(),
                content: None,
                model_override: None,
            }],
        };
        let (response, _usage, records) = gateway.handle(request).await;
        assert_eq!(response.results.len(), 1);
        assert!(matches!(
            response.results[0],
            SubCallResult::SizeExceeded { .. }
        ));
        assert_eq!(records.len(), 1);
        assert!(records[0].size_exceeded);
    }

    #[tokio::test]
    async fn test_batched_preserves_order() {
        let gateway = SubLlmGateway::new(Arc::new(EchoProvider), "sub-model", 4, 10_000, "tok123");
        let request = SubCallRequest {
            calls: (0..5)
                .map(|i| SubCallItem {
                    instruction: format!("prompt-{i}"),
                    content: None,
                    model_override: None,
                })
                .collect(),
        };
        let (response, usage, records) = gateway.handle(request).await;
        assert_eq!(response.results.len(), 5);
        for (i, result) in response.results.iter().enumerate() {
            if let SubCallResult::Text { text } = result {
                assert!(text.contains(&format!("prompt-{i}")));
            } else {
                panic!("expected Text result");
            }
        }
        assert_eq!(usage.total.total_tokens, 10);
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| !r.size_exceeded));
    }

    #[tokio::test]
    async fn test_model_override_used() {
        let gateway = SubLlmGateway::new(Arc::new(EchoProvider), "default-model", 4, 10_000, "tok");
        let request = SubCallRequest {
            calls: vec![SubCallItem {
                instruction: "hi".to_string(),
                content: None,
                model_override: Some("special-model".to_string()),
            }],
        };
        let (response, usage, records) = gateway.handle(request).await;
        assert_eq!(response.results.len(), 1);
        assert!(usage.per_model.contains_key("special-model"));
        assert_eq!(records[0].model, "special-model");
    }
}
