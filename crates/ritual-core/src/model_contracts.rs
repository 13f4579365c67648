use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelFailureKind {
    Timeout,
    Http,
    Unauthorized,
    InvalidResponse,
}

impl ModelFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Http => "http",
            Self::Unauthorized => "unauthorized",
            Self::InvalidResponse => "invalid_response",
        }
    }
}

impl std::fmt::Display for ModelFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A language-model call failed or timed out. Never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("model error ({kind}): {message}")]
pub struct ModelError {
    pub kind: ModelFailureKind,
    pub message: String,
}

impl ModelError {
    pub fn new(kind: ModelFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_text: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_text: user_text.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// The external language-model capability: one system instruction, one user
/// message, one text reply.
///
/// Implementations may suspend for a full network round trip; callers must not
/// hold any store lock across `complete`.
#[async_trait]
pub trait ReflectionModel: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_display_names_kind() {
        let err = ModelError::new(ModelFailureKind::Timeout, "no reply after 60s");
        assert_eq!(err.to_string(), "model error (timeout): no reply after 60s");
    }

    #[test]
    fn completion_request_builder_sets_sampling() {
        let request = CompletionRequest::new("system", "user")
            .with_max_tokens(400)
            .with_temperature(0.6);
        assert_eq!(request.max_tokens, Some(400));
        assert_eq!(request.temperature, Some(0.6));
        assert_eq!(request.system_prompt, "system");
    }
}
