//! Provider and TokenCounter traits: the abstraction over LLM backends.
//!
//! A Provider knows how to send a prompt to one backend family and pull the
//! generated text back out of whatever shape that backend answers in.
//! A TokenCounter knows how that backend measures text.
//!
//! Implementations: chat-completions (OpenAI and compatible hosts),
//! Anthropic messages, Gemini generateContent, local Candle pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, join_contents};
use crate::params::GenParams;

/// A normalized inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The backend-side model identifier (registry `repo_id`)
    pub model: String,

    /// The prompt turns, in order
    pub messages: Vec<Message>,

    /// Generation params, already normalized to the backend's canonical key
    #[serde(default)]
    pub params: GenParams,
}

/// The text a backend generated for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The extracted completion text
    pub content: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Token usage statistics, when the backend reports them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// Every backend family implements this. The experiment loop calls
/// `complete()` without knowing which family it is talking to.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get the generated text back.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;
}

/// Measures text in a backend's tokens.
#[async_trait]
pub trait TokenCounter: Send + Sync {
    /// Count the tokens in raw text.
    async fn count_text(&self, text: &str) -> std::result::Result<usize, ProviderError>;

    /// Count a turn sequence: contents newline-joined, roles ignored.
    async fn count_messages(
        &self,
        messages: &[Message],
    ) -> std::result::Result<usize, ProviderError> {
        self.count_text(&join_contents(messages)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CharCounter;

    #[async_trait]
    impl TokenCounter for CharCounter {
        async fn count_text(&self, text: &str) -> std::result::Result<usize, ProviderError> {
            Ok(text.chars().count())
        }
    }

    #[tokio::test]
    async fn count_messages_joins_with_newlines() {
        let msgs = vec![Message::system("ab"), Message::user("cd")];
        // "ab\ncd" → 5 chars
        assert_eq!(CharCounter.count_messages(&msgs).await.unwrap(), 5);
    }

    #[test]
    fn request_params_default_when_missing() {
        let req: ProviderRequest =
            serde_json::from_str(r#"{"model":"m","messages":[{"role":"user","content":"hi"}]}"#)
                .unwrap();
        assert!(req.params.is_empty());
        assert_eq!(req.messages[0].content, "hi");
    }
}
