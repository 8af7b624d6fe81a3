//! Chat-completion client.
//!
//! The client is intentionally simple — one endpoint, one model, one
//! blocking completion call. The `ChatClient` trait is the seam the dialog
//! controller talks through, so tests substitute a mock and deployments can
//! point the concrete client at any OpenAI-compatible endpoint (including
//! the proxy-host variant).

use crate::error::LlmError;
use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Role of a message in the model context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of the model context window.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Completion interface consumed by the dialog controller.
pub trait ChatClient: Send + Sync + 'static {
    /// Run one completion over the given context window.
    fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

/// Client for OpenAI-style `/chat/completions` endpoints.
pub struct OpenAiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &crate::config::LlmConfig) -> crate::Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("llm.api_key is not configured (set LLM_API_KEY or the config field)");
        }

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .with_context(|| "failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl ChatClient for OpenAiClient {
    fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        let request = CompletionRequest {
            model: &self.model,
            temperature,
            messages,
        };
        let call = self
            .http_client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send();

        async move {
            let response = call.await?;
            let status = response.status();
            if !status.is_success() {
                return Err(LlmError::Status(status));
            }

            let body: CompletionResponse = response.json().await?;
            body.choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .filter(|text| !text.trim().is_empty())
                .ok_or(LlmError::EmptyCompletion)
        }
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_lowercase_roles() {
        let messages = vec![
            ChatMessage::system("persona"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let request = CompletionRequest {
            model: "gpt-4o-mini",
            temperature: 0.5,
            messages: &messages,
        };

        let value = serde_json::to_value(&request).expect("request should serialize");
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][2]["role"], "assistant");
        assert_eq!(value["messages"][1]["content"], "hello");
    }

    #[test]
    fn response_tolerates_missing_content() {
        let body: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{}}]}"#).expect("body should parse");
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);
        assert!(text.is_none());
    }
}
