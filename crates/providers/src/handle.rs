//! Model handles: one registry entry bound to a backend and a token counter.
//!
//! A handle is built once per model per run and released before the next
//! model's loop starts. Building fails fast on a missing API key or an
//! unloadable tokenizer.

use std::sync::Arc;

use async_trait::async_trait;
use lampkit_config::{ApiKeys, CountingMethod, DispatchStyle, ModelConfig};
use lampkit_core::error::ProviderError;
use lampkit_core::message::Message;
use lampkit_core::params::{DEFAULT_MAX_OUTPUT_TOKENS, GenParams};
use lampkit_core::provider::{Provider, ProviderRequest, TokenCounter};
use tracing::{debug, info};

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::tokenizer::{HfTokenizerCounter, TiktokenCounter};

pub struct ModelHandle {
    config: ModelConfig,
    provider: Arc<dyn Provider>,
    counter: Arc<dyn TokenCounter>,
    gen_params: GenParams,
    #[cfg(feature = "local")]
    local: Option<Arc<crate::local::LocalProvider>>,
}

impl ModelHandle {
    /// Build the provider and counter the entry's family calls for.
    ///
    /// `gen_params` become the handle's defaults, renamed to the family's
    /// canonical max-output key; `None` means `{canonical: 512}`.
    pub fn build(
        config: ModelConfig,
        keys: &ApiKeys,
        gen_params: Option<GenParams>,
    ) -> Result<Self, lampkit_core::Error> {
        let gen_params = GenParams::resolve(gen_params, config.canonical_key());
        let api_key = keys.require(config.family)?;
        let endpoint = config.endpoint().map(str::to_string);

        #[cfg(feature = "local")]
        let mut local = None;

        let (provider, remote_counter): (Arc<dyn Provider>, Option<Arc<dyn TokenCounter>>) =
            match config.dispatch_style() {
                DispatchStyle::ChatCompletion => {
                    let base = endpoint.ok_or_else(|| {
                        ProviderError::NotConfigured(format!("No endpoint for {}", config.name))
                    })?;
                    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::new(
                        config.family.as_str(),
                        base,
                        api_key,
                    )?);
                    (provider, None)
                }
                DispatchStyle::DualTurnSystem => {
                    let mut provider = AnthropicProvider::new(api_key, config.repo_id.clone())?;
                    if let Some(base) = endpoint {
                        provider = provider.with_base_url(base);
                    }
                    let provider = Arc::new(provider);
                    let counter: Arc<dyn TokenCounter> = provider.clone();
                    (provider, Some(counter))
                }
                DispatchStyle::TurnBasedGenerative => {
                    let mut provider = GeminiProvider::new(api_key, config.repo_id.clone())?;
                    if let Some(base) = endpoint {
                        provider = provider.with_base_url(base);
                    }
                    let provider = Arc::new(provider);
                    let counter: Arc<dyn TokenCounter> = provider.clone();
                    (provider, Some(counter))
                }
                #[cfg(feature = "local")]
                DispatchStyle::LocalPipeline => {
                    let provider = Arc::new(crate::local::LocalProvider::new(&config, keys.hf_token()));
                    local = Some(provider.clone());
                    let provider: Arc<dyn Provider> = provider;
                    (provider, None)
                }
                #[cfg(not(feature = "local"))]
                DispatchStyle::LocalPipeline => {
                    return Err(ProviderError::NotConfigured(format!(
                        "{} is a local model; rebuild with the `local` feature",
                        config.name
                    ))
                    .into());
                }
            };

        let counter: Arc<dyn TokenCounter> = match (config.counting_method(), remote_counter) {
            (CountingMethod::Remote, Some(counter)) => counter,
            (CountingMethod::Tiktoken, _) => Arc::new(TiktokenCounter::for_model(&config.repo_id)?),
            _ => Arc::new(HfTokenizerCounter::load(config.tokenizer_repo(), keys.hf_token())?),
        };

        info!(
            model = %config.name,
            family = %config.family,
            context_length = config.context_length,
            "Model handle ready"
        );

        Ok(Self {
            config,
            provider,
            counter,
            gen_params,
            #[cfg(feature = "local")]
            local,
        })
    }

    /// Assemble a handle from parts (tests, custom backends).
    pub fn from_parts(
        config: ModelConfig,
        provider: Arc<dyn Provider>,
        counter: Arc<dyn TokenCounter>,
        gen_params: Option<GenParams>,
    ) -> Self {
        let gen_params = GenParams::resolve(gen_params, config.canonical_key());
        Self {
            config,
            provider,
            counter,
            gen_params,
            #[cfg(feature = "local")]
            local: None,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn context_length(&self) -> usize {
        self.config.context_length
    }

    pub fn gen_params(&self) -> &GenParams {
        &self.gen_params
    }

    /// Tokens held back for the answer: the default params' max-output value.
    pub fn reserved_generation_tokens(&self) -> usize {
        self.gen_params
            .max_output_tokens(self.config.canonical_key())
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS) as usize
    }

    /// Send `messages` and return the generated text.
    ///
    /// Per-call params replace the handle defaults entirely and are
    /// normalized the same way. Any failure is final for this call.
    pub async fn prompt(
        &self,
        messages: Vec<Message>,
        gen_params: Option<GenParams>,
    ) -> Result<String, ProviderError> {
        let params = match gen_params {
            Some(p) => p.normalized(self.config.canonical_key()),
            None => self.gen_params.clone(),
        };
        debug!(model = %self.config.name, turns = messages.len(), "Dispatching prompt");

        let response = self
            .provider
            .complete(ProviderRequest {
                model: self.config.repo_id.clone(),
                messages,
                params,
            })
            .await?;
        Ok(response.content)
    }

    /// Release the backend. Local weights are dropped before returning.
    pub async fn release(self) {
        #[cfg(feature = "local")]
        if let Some(local) = &self.local {
            local.unload().await;
        }
        info!(model = %self.config.name, "Model handle released");
    }
}

#[async_trait]
impl TokenCounter for ModelHandle {
    async fn count_text(&self, text: &str) -> Result<usize, ProviderError> {
        self.counter.count_text(text).await
    }

    async fn count_messages(&self, messages: &[Message]) -> Result<usize, ProviderError> {
        self.counter.count_messages(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lampkit_config::ModelRegistry;
    use lampkit_core::MaxTokensKey;
    use lampkit_core::provider::ProviderResponse;
    use std::sync::Mutex;

    /// Records the last request and answers with a fixed text.
    struct RecordingProvider {
        last: Mutex<Option<ProviderRequest>>,
    }

    #[async_trait]
    impl Provider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let model = request.model.clone();
            *self.last.lock().unwrap() = Some(request);
            Ok(ProviderResponse {
                content: "ok".into(),
                model,
                usage: None,
            })
        }
    }

    struct WordCounter;

    #[async_trait]
    impl TokenCounter for WordCounter {
        async fn count_text(&self, text: &str) -> Result<usize, ProviderError> {
            Ok(text.split_whitespace().count())
        }
    }

    fn handle(name: &str, params: Option<GenParams>) -> (ModelHandle, Arc<RecordingProvider>) {
        let config = ModelRegistry::builtin().unwrap().get(name).unwrap();
        let provider = Arc::new(RecordingProvider {
            last: Mutex::new(None),
        });
        let handle = ModelHandle::from_parts(config, provider.clone(), Arc::new(WordCounter), params);
        (handle, provider)
    }

    #[test]
    fn default_params_use_canonical_key() {
        let (h, _) = handle("GEMINI-1.5-FLASH", None);
        assert_eq!(h.gen_params().max_output_tokens(MaxTokensKey::MaxOutputTokens), Some(512));
        assert_eq!(h.reserved_generation_tokens(), 512);
    }

    #[test]
    fn caller_params_renamed_at_build() {
        let (h, _) = handle(
            "GPT-4o",
            Some(GenParams::with_max_tokens(MaxTokensKey::MaxNewTokens, 100)),
        );
        assert!(h.gen_params().contains("max_tokens"));
        assert!(!h.gen_params().contains("max_new_tokens"));
        assert_eq!(h.reserved_generation_tokens(), 100);
    }

    #[tokio::test]
    async fn prompt_sends_repo_id_and_params() {
        let (h, provider) = handle("CLAUDE-3-HAIKU", None);
        let text = h
            .prompt(
                vec![Message::user("hi")],
                Some(GenParams::with_max_tokens(MaxTokensKey::MaxOutputTokens, 64)),
            )
            .await
            .unwrap();
        assert_eq!(text, "ok");

        let last = provider.last.lock().unwrap().take().unwrap();
        assert_eq!(last.model, h.config().repo_id);
        assert_eq!(last.params.max_output_tokens(MaxTokensKey::MaxTokens), Some(64));
        assert!(!last.params.contains("max_output_tokens"));
    }

    #[tokio::test]
    async fn counts_through_counter() {
        let (h, _) = handle("GPT-4o", None);
        assert_eq!(h.count_text("a b c").await.unwrap(), 3);
        let n = h
            .count_messages(&[Message::system("a b"), Message::user("c")])
            .await
            .unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn missing_api_key_fails_build() {
        let config = ModelRegistry::builtin().unwrap().get("GPT-4o").unwrap();
        let keys = ApiKeys::from_lookup(|_| None);
        let err = ModelHandle::build(config, &keys, None).err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[cfg(not(feature = "local"))]
    #[test]
    fn local_model_needs_feature() {
        let config = ModelRegistry::builtin().unwrap().get("GEMMA-2-2B").unwrap();
        let keys = ApiKeys::from_lookup(|_| None);
        assert!(ModelHandle::build(config, &keys, None).is_err());
    }

    #[tokio::test]
    async fn release_consumes_handle() {
        let (h, _) = handle("GPT-4o-MINI", None);
        h.release().await;
    }
}
