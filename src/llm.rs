//! Language model client
//!
//! Single-turn, non-streaming chat completions at temperature 0 against an
//! OpenAI-compatible endpoint (Zhipu's BigModel API by default).

use crate::retry::{status_error, ExternalCallError, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

pub const DEFAULT_MODEL_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

/// Something that answers a single prompt with text
pub trait LanguageModel: Send + Sync {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExternalCallError>> + Send + 'a>>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        retry: RetryPolicy,
    ) -> Result<Self, ExternalCallError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cite-audit/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            retry,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, ExternalCallError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
            temperature: 0.0,
            stream: false,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.retry.timeout)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error("model", resp).await);
        }

        let body: ChatResponse = resp.json().await?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ExternalCallError::Malformed {
                service: "model",
                message: "response has no choices".to_string(),
            })?;
        let content = choice
            .message
            .content
            .ok_or_else(|| ExternalCallError::Malformed {
                service: "model",
                message: "first choice has empty content".to_string(),
            })?;

        Ok(content.trim().to_string())
    }
}

impl LanguageModel for ChatClient {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, ExternalCallError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::debug!(model = %self.model, chars = prompt.len(), "model request");
            self.retry
                .run("model call", || self.complete_once(prompt))
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries,
            initial_backoff: Duration::from_millis(1),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn test_complete_sends_deterministic_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "model": "glm-4",
                "temperature": 0.0,
                "stream": false,
                "messages": [{"role": "user", "content": "is it supported?"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  <是>\n")))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(&server.uri(), "secret", "glm-4", policy(0)).unwrap();
        let answer = client.complete("is it supported?").await.unwrap();
        assert_eq!(answer, "<是>");
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("<否>")))
            .mount(&server)
            .await;

        let client = ChatClient::new(&server.uri(), "k", "glm-4", policy(2)).unwrap();
        assert_eq!(client.complete("p").await.unwrap(), "<否>");
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(&server.uri(), "bad", "glm-4", policy(3)).unwrap();
        let err = client.complete("p").await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let client = ChatClient::new(&server.uri(), "k", "glm-4", policy(0)).unwrap();
        let err = client.complete("p").await.unwrap_err();
        assert!(matches!(err, ExternalCallError::Malformed { .. }));
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn test_null_content_is_reported_as_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": null}}]
            })))
            .mount(&server)
            .await;

        let client = ChatClient::new(&server.uri(), "k", "glm-4", policy(0)).unwrap();
        let err = client.complete("p").await.unwrap_err();
        assert!(matches!(err, ExternalCallError::Malformed { .. }));
        assert!(err.to_string().contains("empty content"));
        assert!(!err.to_string().contains("no choices"));
    }
}
