//! Chat-completions client backing the reflection model boundary.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use ritual_core::model_contracts::{
    CompletionRequest, ModelError, ModelFailureKind, ReflectionModel,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(settings: &ModelSettings) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| ModelError::new(ModelFailureKind::Http, err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl ReflectionModel for OpenAiChatModel {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_text,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let kind = match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelFailureKind::Unauthorized,
                StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                    ModelFailureKind::Timeout
                }
                _ => ModelFailureKind::Http,
            };
            return Err(ModelError::new(
                kind,
                format!("{} - {}", status.as_u16(), detail.trim()),
            ));
        }

        let payload: ChatResponse = response.json().await.map_err(|err| {
            ModelError::new(ModelFailureKind::InvalidResponse, err.to_string())
        })?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                ModelError::new(ModelFailureKind::InvalidResponse, "response has no content")
            })?;

        debug!(event = "model_reply", model = %self.model, chars = content.chars().count());
        Ok(content)
    }
}

fn transport_error(err: reqwest::Error) -> ModelError {
    let kind = if err.is_timeout() {
        ModelFailureKind::Timeout
    } else {
        ModelFailureKind::Http
    };
    ModelError::new(kind, err.to_string())
}
