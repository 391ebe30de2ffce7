use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ResponderError, ResponderResult, ServiceFailure};
use crate::openai::{ApiClient, OpenAiSettings};

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4-turbo";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
}

impl CompletionRequest {
    /// Sampling used for composing review replies.
    pub fn reply(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.65,
            max_tokens: 400,
            top_p: Some(0.9),
        }
    }

    /// Near-deterministic sampling for one-word classification answers.
    pub fn classification(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.0,
            max_tokens: 10,
            top_p: None,
        }
    }

    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A hosted text-generation service.
#[async_trait]
pub trait Generate: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> ResponderResult<String>;
}

// ── OpenAI chat completions ──

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Deserialize)]
struct ChatReply {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
}

pub struct OpenAiChat {
    api: ApiClient,
    model: String,
}

impl OpenAiChat {
    pub fn new(settings: OpenAiSettings, model: impl Into<String>) -> ResponderResult<Self> {
        Ok(Self {
            api: ApiClient::new(settings, "generation")?,
            model: model.into(),
        })
    }
}

#[async_trait]
impl Generate for OpenAiChat {
    async fn complete(&self, request: &CompletionRequest) -> ResponderResult<String> {
        let body = ChatBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
        };
        tracing::debug!(model = %self.model, messages = request.messages.len(), "chat completion request");

        let reply: ChatReply = self.api.post_json("chat/completions", &body).await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                ResponderError::external(
                    "generation",
                    ServiceFailure::Malformed,
                    "completion has no choices[0].message.content",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_for(server: &MockServer, timeout_secs: u64) -> OpenAiChat {
        let settings = OpenAiSettings::new("test-key")
            .with_base_url(server.uri())
            .with_timeout_secs(timeout_secs);
        OpenAiChat::new(settings, "gpt-test").unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest::reply(vec![ChatMessage::system("be nice"), ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({ "model": "gpt-test", "max_tokens": 400 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "Thanks for writing in." } }]
            })))
            .mount(&server)
            .await;

        let text = chat_for(&server, 5).complete(&request()).await.unwrap();
        assert_eq!(text, "Thanks for writing in.");
    }

    #[tokio::test]
    async fn rate_limit_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = chat_for(&server, 5).complete(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            ResponderError::ExternalService {
                failure: ServiceFailure::RateLimited,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn server_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = chat_for(&server, 5).complete(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            ResponderError::ExternalService {
                failure: ServiceFailure::Http(503),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_content_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = chat_for(&server, 5).complete(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            ResponderError::ExternalService {
                failure: ServiceFailure::Malformed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let err = chat_for(&server, 1).complete(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            ResponderError::ExternalService {
                failure: ServiceFailure::Timeout,
                ..
            }
        ));
    }
}
