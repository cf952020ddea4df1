//! Reasoning collaborator: the abstraction over text-completion backends.
//!
//! Two layers:
//! - [`Provider`]: one backend that turns a prompt into text, or fails.
//! - [`Reasoner`]: what the agent actually calls. It never fails; it returns
//!   a [`ReasoningOutcome`] envelope carrying either text or the list of
//!   errors collected while trying.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A single completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "openai/gpt-4o-mini")
    pub model: String,

    /// Optional system instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The user prompt
    pub prompt: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,

    /// The model that actually served the request
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One text-completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Check if the provider is reachable and configured correctly.
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Envelope returned by every reasoning call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningOutcome {
    pub success: bool,

    /// Raw model text. Not guaranteed to be structured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,

    pub attempts_made: u32,

    #[serde(default)]
    pub errors: Vec<String>,
}

impl ReasoningOutcome {
    pub fn succeeded(
        text: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        attempts_made: u32,
        errors: Vec<String>,
    ) -> Self {
        Self {
            success: true,
            data: Some(text.into()),
            model_used: Some(model.into()),
            provider_used: Some(provider.into()),
            attempts_made,
            errors,
        }
    }

    pub fn failed(attempts_made: u32, errors: Vec<String>) -> Self {
        Self {
            success: false,
            attempts_made,
            errors,
            ..Default::default()
        }
    }

    /// The model text, only when the call succeeded with non-blank output.
    pub fn text(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.data.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// The reasoning collaborator used by the agent loop, verifier and
/// orchestrator. Implementations must not fail; they report failure
/// through [`ReasoningOutcome::success`].
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, prompt: &str) -> ReasoningOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_requires_success_and_content() {
        let ok = ReasoningOutcome::succeeded("{\"done\": true}", "openrouter", "m", 1, vec![]);
        assert_eq!(ok.text(), Some("{\"done\": true}"));

        let blank = ReasoningOutcome::succeeded("   ", "openrouter", "m", 1, vec![]);
        assert_eq!(blank.text(), None);

        let failed = ReasoningOutcome::failed(2, vec!["timeout".into(), "401".into()]);
        assert_eq!(failed.text(), None);
        assert_eq!(failed.attempts_made, 2);
    }

    #[test]
    fn outcome_serializes_envelope_fields() {
        let ok = ReasoningOutcome::succeeded("hi", "groq", "llama", 2, vec!["first failed".into()]);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["provider_used"], "groq");
        assert_eq!(json["attempts_made"], 2);
        assert_eq!(json["errors"][0], "first failed");
    }
}
