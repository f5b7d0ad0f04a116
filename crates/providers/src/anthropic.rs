//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not OpenAI-compatible proxy).
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - The first turn of a multi-turn prompt becomes the top-level `system`
//!   field; the remaining turns go out as `messages`
//! - `max_tokens` is mandatory on this API, so it is always filled in
//! - Token counting through `/v1/messages/count_tokens`

use async_trait::async_trait;
use lampkit_core::error::ProviderError;
use lampkit_core::message::{Message, Role};
use lampkit_core::params::{DEFAULT_MAX_OUTPUT_TOKENS, MaxTokensKey};
use lampkit_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    /// Model id used for token counting requests.
    count_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider. `count_model` is the model id
    /// sent along with token counting requests.
    pub fn new(
        api_key: impl Into<String>,
        count_model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            count_model: count_model.into(),
            client: http::client(300)?,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Split a turn list into the system field and the message list.
    ///
    /// A single turn is sent as-is with no system field. With two or more,
    /// the first turn's content is the system prompt whatever its role.
    fn split_system(messages: &[Message]) -> (Option<String>, Vec<ApiMessage>) {
        let (system, rest) = match messages {
            [first, rest @ ..] if !rest.is_empty() => (Some(first.content.clone()), rest),
            _ => (None, messages),
        };

        let api_messages = rest
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::Assistant => "assistant".into(),
                    Role::System | Role::User => "user".into(),
                },
                content: m.content.clone(),
            })
            .collect();

        (system, api_messages)
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let (system, messages) = Self::split_system(&request.messages);
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(system) = system {
                obj.insert("system".into(), serde_json::Value::String(system));
            }
            for (key, value) in request.params.as_map() {
                obj.insert(key.clone(), value.clone());
            }
            obj.entry(MaxTokensKey::MaxTokens.as_str())
                .or_insert(serde_json::Value::from(DEFAULT_MAX_OUTPUT_TOKENS));
        }
        body
    }

    /// The text of the first content block.
    fn extract_content(response: &ApiResponse) -> Result<String, ProviderError> {
        let first = response
            .content
            .first()
            .ok_or_else(|| ProviderError::malformed("anthropic", "Empty content list"))?;
        first
            .text
            .clone()
            .ok_or_else(|| ProviderError::malformed("anthropic", "First content block has no text"))
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        http::decode(&self.name, response).await
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request);

        debug!(model = %request.model, turns = request.messages.len(), "Sending Anthropic request");

        let api_response: ApiResponse = self.post("/v1/messages", &body).await?;
        let content = Self::extract_content(&api_response)?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ProviderResponse {
            content,
            model: api_response.model.unwrap_or(request.model),
            usage,
        })
    }
}

#[async_trait]
impl TokenCounter for AnthropicProvider {
    /// Counts the text as one user turn, the way it would be billed.
    async fn count_text(&self, text: &str) -> std::result::Result<usize, ProviderError> {
        let body = serde_json::json!({
            "model": self.count_model,
            "messages": [ApiMessage { role: "user".into(), content: text.to_string() }],
        });
        let counted: CountResponse = self.post("/v1/messages/count_tokens", &body).await?;
        Ok(counted.input_tokens as usize)
    }
}

// --- Anthropic API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    input_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lampkit_core::GenParams;

    #[test]
    fn first_turn_becomes_system() {
        let messages = vec![
            Message::user("You write titles."),
            Message::user("Abstract: ..."),
            Message::assistant("Title: ..."),
        ];
        let (system, rest) = AnthropicProvider::split_system(&messages);
        assert_eq!(system.as_deref(), Some("You write titles."));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].role, "user");
        assert_eq!(rest[1].role, "assistant");
    }

    #[test]
    fn single_turn_has_no_system() {
        let messages = vec![Message::user("Just one")];
        let (system, rest) = AnthropicProvider::split_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "Just one");
    }

    #[test]
    fn system_role_past_first_turn_is_sent_as_user() {
        let messages = vec![
            Message::system("sys"),
            Message::system("another"),
        ];
        let (_, rest) = AnthropicProvider::split_system(&messages);
        assert_eq!(rest[0].role, "user");
    }

    #[test]
    fn max_tokens_default_inserted() {
        let request = ProviderRequest {
            model: "claude-3-haiku-20240307".into(),
            messages: vec![Message::user("hi")],
            params: GenParams::new(),
        };
        let body = AnthropicProvider::build_body(&request);
        assert_eq!(body["max_tokens"], 512);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn max_tokens_from_params_kept() {
        let request = ProviderRequest {
            model: "claude-3-haiku-20240307".into(),
            messages: vec![Message::system("s"), Message::user("u")],
            params: GenParams::with_max_tokens(MaxTokensKey::MaxTokens, 64),
        };
        let body = AnthropicProvider::build_body(&request);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["system"], "s");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn extract_first_text_block() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "Hello!"}], "model": "claude-3-haiku-20240307",
                "usage": {"input_tokens": 10, "output_tokens": 3}}"#,
        )
        .unwrap();
        assert_eq!(AnthropicProvider::extract_content(&response).unwrap(), "Hello!");
    }

    #[test]
    fn empty_content_is_malformed() {
        let response: ApiResponse = serde_json::from_str(r#"{"content": []}"#).unwrap();
        assert!(matches!(
            AnthropicProvider::extract_content(&response),
            Err(ProviderError::MalformedResponse { .. })
        ));
    }
}
