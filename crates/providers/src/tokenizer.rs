//! Local token counters.
//!
//! OpenAI models are measured with their tiktoken encoding; open-weight
//! models (local or hosted by Groq, Together, Perplexity) with the
//! HuggingFace tokenizer published alongside the weights.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hf_hub::api::sync::ApiBuilder;
use lampkit_core::error::ProviderError;
use lampkit_core::provider::TokenCounter;
use tiktoken_rs::CoreBPE;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

/// Counts tokens with a tiktoken BPE.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// The encoding registered for `model`; unknown ids get `cl100k_base`.
    pub fn for_model(model: &str) -> Result<Self, ProviderError> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                warn!(model, error = %e, "No tiktoken encoding for model, using cl100k_base");
                tiktoken_rs::cl100k_base()
                    .map_err(|e| ProviderError::Tokenizer(format!("cl100k_base: {e}")))?
            }
        };
        Ok(Self { bpe })
    }
}

#[async_trait]
impl TokenCounter for TiktokenCounter {
    async fn count_text(&self, text: &str) -> Result<usize, ProviderError> {
        Ok(self.bpe.encode_ordinary(text).len())
    }
}

/// Counts tokens with a HuggingFace `tokenizer.json`, special tokens included.
pub struct HfTokenizerCounter {
    tokenizer: Tokenizer,
}

impl HfTokenizerCounter {
    /// Load from a local `tokenizer.json` (or a directory holding one), or
    /// download it from the hub repo `repo_or_path`.
    pub fn load(repo_or_path: &str, hf_token: Option<&str>) -> Result<Self, ProviderError> {
        Ok(Self {
            tokenizer: load_tokenizer(repo_or_path, hf_token)?,
        })
    }
}

#[async_trait]
impl TokenCounter for HfTokenizerCounter {
    async fn count_text(&self, text: &str) -> Result<usize, ProviderError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ProviderError::Tokenizer(format!("Tokenization failed: {e}")))?;
        Ok(encoding.get_ids().len())
    }
}

/// Resolve and parse a tokenizer. Shared with the local pipeline.
pub fn load_tokenizer(repo_or_path: &str, hf_token: Option<&str>) -> Result<Tokenizer, ProviderError> {
    let path = tokenizer_path(repo_or_path, hf_token)?;
    debug!(path = %path.display(), "Loading tokenizer");
    Tokenizer::from_file(&path)
        .map_err(|e| ProviderError::Tokenizer(format!("Failed to load {}: {e}", path.display())))
}

fn tokenizer_path(repo_or_path: &str, hf_token: Option<&str>) -> Result<PathBuf, ProviderError> {
    let local = Path::new(repo_or_path);
    if local.is_file() {
        return Ok(local.to_path_buf());
    }
    if local.is_dir() {
        return Ok(local.join("tokenizer.json"));
    }
    hub_file(repo_or_path, "tokenizer.json", hf_token)
}

/// Fetch one file from a HuggingFace Hub model repo (cached by hf-hub).
pub fn hub_file(repo: &str, file: &str, hf_token: Option<&str>) -> Result<PathBuf, ProviderError> {
    info!(repo, file, "Fetching from HuggingFace Hub");
    let api = ApiBuilder::new()
        .with_token(hf_token.map(str::to_string))
        .build()
        .map_err(|e| ProviderError::Network(format!("Failed to initialize HuggingFace Hub API: {e}")))?;
    api.model(repo.to_string())
        .get(file)
        .map_err(|e| ProviderError::Network(format!("Failed to download '{file}' from '{repo}': {e}")))
}
