//! Chat-completions provider.
//!
//! One request shape covers four hosted backends: OpenAI itself and the
//! OpenAI-compatible endpoints of Perplexity, Groq, and Together AI.
//! The full turn list goes out as `messages`, generation params are merged
//! into the body as-is, and the text comes back from
//! `choices[0].message.content`.

use async_trait::async_trait;
use lampkit_core::error::ProviderError;
use lampkit_core::message::Message;
use lampkit_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: http::client(120)?,
        })
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    /// Request body: model + messages, with every generation param at the
    /// top level (`max_tokens`, `temperature`, ...).
    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
        });
        if let Some(obj) = body.as_object_mut() {
            for (key, value) in request.params.as_map() {
                obj.insert(key.clone(), value.clone());
            }
        }
        body
    }

    /// Pull the first completion's text out of a response.
    fn extract_content(name: &str, response: ApiResponse) -> Result<String, ProviderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::malformed(name, "No choices in response"))?;

        choice
            .message
            .content
            .ok_or_else(|| ProviderError::malformed(name, "First choice has no message content"))
    }

    /// Text, model and usage of a decoded response. `model` stands in when
    /// the backend does not echo one.
    fn into_response(
        name: &str,
        model: &str,
        api_response: ApiResponse,
    ) -> Result<ProviderResponse, ProviderError> {
        let model = api_response
            .model
            .clone()
            .unwrap_or_else(|| model.to_string());
        let usage = api_response.usage.as_ref().map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        let content = Self::extract_content(name, api_response)?;

        Ok(ProviderResponse {
            content,
            model,
            usage,
        })
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let api_response: ApiResponse = http::decode(&self.name, response).await?;
        Self::into_response(&self.name, &request.model, api_response)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
