//! Google Gemini provider (`generateContent`).
//!
//! Turns are sent as `contents`, each with a single text part. Gemini only
//! knows two roles, so system and user turns both go out as `user` and
//! everything else as `model`. Generation params travel inside
//! `generationConfig` under their camelCase names.

use async_trait::async_trait;
use lampkit_core::error::ProviderError;
use lampkit_core::message::{Message, Role};
use lampkit_core::params::GenParams;
use lampkit_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    /// Model id used for token counting requests.
    count_model: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(
        api_key: impl Into<String>,
        count_model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            count_model: count_model.into(),
            client: http::client(120)?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `models/<id>`, unless the id already carries the prefix.
    fn model_path(model: &str) -> String {
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        }
    }

    fn to_contents(messages: &[Message]) -> Vec<Content> {
        messages
            .iter()
            .map(|m| Content {
                role: match m.role {
                    Role::System | Role::User => "user".into(),
                    Role::Assistant => "model".into(),
                },
                parts: vec![Part {
                    text: Some(m.content.clone()),
                }],
            })
            .collect()
    }

    /// `max_output_tokens` -> `maxOutputTokens`.
    fn camel_case(key: &str) -> String {
        let mut out = String::with_capacity(key.len());
        let mut upper = false;
        for c in key.chars() {
            if c == '_' {
                upper = true;
            } else if upper {
                out.extend(c.to_uppercase());
                upper = false;
            } else {
                out.push(c);
            }
        }
        out
    }

    fn generation_config(params: &GenParams) -> serde_json::Map<String, serde_json::Value> {
        params
            .as_map()
            .iter()
            .map(|(k, v)| (Self::camel_case(k), v.clone()))
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "contents": Self::to_contents(&request.messages),
        });
        if !request.params.is_empty() {
            if let Some(obj) = body.as_object_mut() {
                obj.insert(
                    "generationConfig".into(),
                    serde_json::Value::Object(Self::generation_config(&request.params)),
                );
            }
        }
        body
    }

    /// The text of the first candidate, all parts concatenated.
    fn extract_content(response: &ApiResponse) -> Result<String, ProviderError> {
        let candidate = response
            .candidates
            .first()
            .ok_or_else(|| ProviderError::malformed("gemini", "No candidates in response"))?;
        let content = candidate
            .content
            .as_ref()
            .ok_or_else(|| ProviderError::malformed("gemini", "Candidate has no content"))?;

        let texts: Vec<&str> = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if texts.is_empty() {
            return Err(ProviderError::malformed("gemini", "Candidate has no text parts"));
        }
        Ok(texts.concat())
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        model: &str,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}:{}", self.base_url, Self::model_path(model), method);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        http::decode("gemini", response).await
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request);
        debug!(model = %request.model, turns = request.messages.len(), "Sending Gemini request");

        let api_response: ApiResponse = self.post(&request.model, "generateContent", &body).await?;
        let content = Self::extract_content(&api_response)?;

        let usage = api_response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        Ok(ProviderResponse {
            content,
            model: request.model,
            usage,
        })
    }
}

#[async_trait]
impl TokenCounter for GeminiProvider {
    async fn count_text(&self, text: &str) -> std::result::Result<usize, ProviderError> {
        let body = serde_json::json!({ "contents": Self::to_contents(&[Message::user(text)]) });
        let counted: CountResponse = self.post(&self.count_model, "countTokens", &body).await?;
        Ok(counted.total_tokens as usize)
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountResponse {
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lampkit_core::MaxTokensKey;

    #[test]
    fn roles_map_to_user_and_model() {
        let contents = GeminiProvider::to_contents(&[
            Message::system("s"),
            Message::user("u"),
            Message::assistant("a"),
        ]);
        let roles: Vec<_> = contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "user", "model"]);
        assert_eq!(contents[2].parts[0].text.as_deref(), Some("a"));
    }

    #[test]
    fn params_go_into_generation_config() {
        let mut params = GenParams::with_max_tokens(MaxTokensKey::MaxOutputTokens, 64);
        params.set("temperature", 0.5);
        let request = ProviderRequest {
            model: "gemini-1.5-flash".into(),
            messages: vec![Message::user("hi")],
            params,
        };
        let body = GeminiProvider::build_body(&request);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
        assert_eq!(body["generationConfig"]["temperature"], 0.5);
        assert!(body.get("max_output_tokens").is_none());
    }

    #[test]
    fn model_path_prefix_added_once() {
        assert_eq!(GeminiProvider::model_path("gemini-1.5-pro"), "models/gemini-1.5-pro");
        assert_eq!(GeminiProvider::model_path("models/gemini-1.5-pro"), "models/gemini-1.5-pro");
    }

    #[test]
    fn camel_case_conversion() {
        assert_eq!(GeminiProvider::camel_case("max_output_tokens"), "maxOutputTokens");
        assert_eq!(GeminiProvider::camel_case("temperature"), "temperature");
        assert_eq!(GeminiProvider::camel_case("top_p"), "topP");
    }

    #[test]
    fn parts_concatenated() {
        let response: ApiResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo"}]}}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}}"#,
        )
        .unwrap();
        assert_eq!(GeminiProvider::extract_content(&response).unwrap(), "Hello");
        assert_eq!(response.usage_metadata.unwrap().total_token_count, 6);
    }

    #[test]
    fn blocked_candidate_is_malformed() {
        let response: ApiResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#).unwrap();
        assert!(GeminiProvider::extract_content(&response).is_err());

        let empty: ApiResponse = serde_json::from_str("{}").unwrap();
        assert!(GeminiProvider::extract_content(&empty).is_err());
    }
}
