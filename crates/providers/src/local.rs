//! Local inference provider: open-weight models run in-process through Candle.
//!
//! Weights come from the registry's `repo_id` on the HuggingFace Hub (or a
//! local path), the tokenizer from the entry's tokenizer repo. Loading
//! happens on first use or through [`LocalProvider::load`];
//! [`LocalProvider::unload`] drops the weights.
//!
//! Two layouts load: a quantized llama-architecture `.gguf` file
//! (`quantized_llama`, the Llama 3 and Mistral entries) and a Gemma-2
//! safetensors checkpoint (`gemma2`).

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::gemma2;
use candle_transformers::models::quantized_llama as qlm;
use lampkit_config::{ModelConfig, WeightFormat};
use lampkit_core::error::ProviderError;
use lampkit_core::params::MaxTokensKey;
use lampkit_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use serde::Deserialize;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chat_template::{ChatTemplate, fold_turns};
use crate::tokenizer::{hub_file, load_tokenizer};

const DEFAULT_SEED: u64 = 42;
const SAFETENSORS_INDEX: &str = "model.safetensors.index.json";
const SAFETENSORS_SINGLE: &str = "model.safetensors";

/// A provider that runs an open-weight model locally via Candle.
///
/// The model sits behind a Mutex because Candle inference mutates the
/// KV cache and is CPU-bound.
pub struct LocalProvider {
    inner: Arc<Mutex<Option<LocalModelState>>>,
    source: ModelSource,
    template: ChatTemplate,
    merge_turns: bool,
}

/// Where the weights and tokenizer come from.
#[derive(Debug, Clone)]
struct ModelSource {
    name: String,
    repo_id: String,
    file_name: Option<String>,
    weights: WeightFormat,
    tokenizer: String,
    hf_token: Option<String>,
}

/// Loaded weights of either supported architecture.
enum LocalWeights {
    Llama(qlm::ModelWeights),
    Gemma2(gemma2::Model),
}

impl LocalWeights {
    /// Logits for the last input position, shape `(vocab,)`.
    fn forward(&mut self, input: &Tensor, index_pos: usize) -> candle_core::Result<Tensor> {
        match self {
            LocalWeights::Llama(model) => model.forward(input, index_pos)?.squeeze(0),
            LocalWeights::Gemma2(model) => model.forward(input, index_pos)?.squeeze(0)?.squeeze(0),
        }
    }

    /// Forget the previous prompt. The llama cache resets itself at position 0.
    fn clear_cache(&mut self) {
        if let LocalWeights::Gemma2(model) = self {
            model.clear_kv_cache();
        }
    }
}

/// The part of `model.safetensors.index.json` naming the shards.
#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// Distinct shard files of a sharded checkpoint, in name order.
fn shard_files(index_json: &str) -> Result<Vec<String>, ProviderError> {
    let index: SafetensorsIndex = serde_json::from_str(index_json)
        .map_err(|e| ProviderError::NotConfigured(format!("Invalid {SAFETENSORS_INDEX}: {e}")))?;
    let files: BTreeSet<String> = index.weight_map.into_values().collect();
    Ok(files.into_iter().collect())
}

/// Check `config.json` describes a Gemma-2 model and parse it.
fn gemma2_config(config_json: &str) -> Result<gemma2::Config, ProviderError> {
    let value: serde_json::Value = serde_json::from_str(config_json)
        .map_err(|e| ProviderError::NotConfigured(format!("Invalid config.json: {e}")))?;
    let model_type = value.get("model_type").and_then(|t| t.as_str()).unwrap_or_default();
    if model_type != "gemma2" {
        return Err(ProviderError::NotConfigured(format!(
            "Safetensors checkpoints must be Gemma-2, found model_type '{model_type}'"
        )));
    }
    serde_json::from_value(value)
        .map_err(|e| ProviderError::NotConfigured(format!("Unsupported Gemma-2 config: {e}")))
}

struct LocalModelState {
    model: LocalWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_ids: Vec<u32>,
}

impl LocalProvider {
    /// Bind a registry entry; nothing is loaded yet.
    pub fn new(config: &ModelConfig, hf_token: Option<&str>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            source: ModelSource {
                name: config.name.clone(),
                repo_id: config.repo_id.clone(),
                file_name: config.file_name.clone(),
                weights: config.weights,
                tokenizer: config.tokenizer_repo().to_string(),
                hf_token: hf_token.map(str::to_string),
            },
            template: ChatTemplate::resolve(config.chat_template.as_deref(), &config.name),
            merge_turns: config.merge_turns,
        }
    }

    /// Load the weights now instead of on the first request.
    pub async fn load(&self) -> Result<(), ProviderError> {
        let mut guard = self.inner.lock().await;
        if guard.is_none() {
            info!(model = %self.source.name, "Loading local model");
            let source = self.source.clone();
            let template = self.template;
            let loaded = tokio::task::spawn_blocking(move || LocalModelState::load(&source, template))
                .await
                .map_err(|e| ProviderError::Inference(format!("Model loading task failed: {e}")))??;
            *guard = Some(loaded);
        }
        Ok(())
    }

    /// Drop the weights. A later request loads them again.
    pub async fn unload(&self) {
        let mut guard = self.inner.lock().await;
        if guard.take().is_some() {
            info!(model = %self.source.name, "Local model unloaded");
        }
    }
}

impl ModelSource {
    fn gguf_path(&self) -> Result<PathBuf, ProviderError> {
        let local = Path::new(&self.repo_id);
        if local.is_file() {
            return Ok(local.to_path_buf());
        }
        let file = self.file_name.as_deref().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Model '{}' needs a file_name to locate its GGUF weights",
                self.name
            ))
        })?;
        let in_dir = local.join(file);
        if in_dir.is_file() {
            return Ok(in_dir);
        }
        hub_file(&self.repo_id, file, self.hf_token.as_deref())
    }

    /// A file of the model repo: from `repo_id` as a local directory, else the hub.
    fn repo_file(&self, file: &str) -> Result<PathBuf, ProviderError> {
        let dir = Path::new(&self.repo_id);
        if dir.is_dir() {
            let local = dir.join(file);
            return if local.is_file() {
                Ok(local)
            } else {
                Err(ProviderError::NotConfigured(format!("{} not found", local.display())))
            };
        }
        hub_file(&self.repo_id, file, self.hf_token.as_deref())
    }

    fn safetensors_paths(&self) -> Result<Vec<PathBuf>, ProviderError> {
        let Ok(index) = self.repo_file(SAFETENSORS_INDEX) else {
            return Ok(vec![self.repo_file(SAFETENSORS_SINGLE)?]);
        };
        let content = std::fs::read_to_string(&index)
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to read {}: {e}", index.display())))?;
        shard_files(&content)?
            .iter()
            .map(|file| self.repo_file(file))
            .collect()
    }
}

impl LocalModelState {
    fn load(source: &ModelSource, template: ChatTemplate) -> Result<Self, ProviderError> {
        let device = Device::Cpu;
        let tokenizer = load_tokenizer(&source.tokenizer, source.hf_token.as_deref())?;
        let model = match source.weights {
            WeightFormat::Gguf => Self::load_gguf(source, &device)?,
            WeightFormat::Safetensors => Self::load_gemma2(source, &device)?,
        };

        let eos_token_ids: Vec<u32> = template
            .stop_tokens()
            .iter()
            .chain(["</s>", "<eos>"].iter())
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();

        info!(model = %source.name, eos = ?eos_token_ids, "Local model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            eos_token_ids,
        })
    }

    fn load_gguf(source: &ModelSource, device: &Device) -> Result<LocalWeights, ProviderError> {
        let model_path = source.gguf_path()?;
        info!(path = %model_path.display(), "Model file ready");

        let mut file = std::fs::File::open(&model_path)
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to open model file: {e}")))?;
        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to parse GGUF file: {e}")))?;
        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, device).map_err(|e| {
            ProviderError::NotConfigured(format!("Failed to load model weights: {e}"))
        })?;
        Ok(LocalWeights::Llama(model))
    }

    fn load_gemma2(source: &ModelSource, device: &Device) -> Result<LocalWeights, ProviderError> {
        let config_path = source.repo_file("config.json")?;
        let config_json = std::fs::read_to_string(&config_path)
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to read config.json: {e}")))?;
        let config = gemma2_config(&config_json)?;

        let mut tensors = HashMap::new();
        for path in source.safetensors_paths()? {
            debug!(path = %path.display(), "Reading safetensors shard");
            let shard = candle_core::safetensors::load(&path, device).map_err(|e| {
                ProviderError::NotConfigured(format!("Failed to read {}: {e}", path.display()))
            })?;
            tensors.extend(shard);
        }
        info!(model = %source.name, tensors = tensors.len(), "Checkpoint ready");

        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let model = gemma2::Model::new(false, &config, vb).map_err(|e| {
            ProviderError::NotConfigured(format!("Failed to load model weights: {e}"))
        })?;
        Ok(LocalWeights::Gemma2(model))
    }

    /// Tokenize, sample up to `max_tokens`, decode.
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: u64,
        temperature: f64,
    ) -> Result<(String, u32, u32), ProviderError> {
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| ProviderError::Tokenizer(format!("Tokenization failed: {e}")))?;
        let prompt_tokens = encoding.get_ids();
        let prompt_len = prompt_tokens.len();

        debug!(prompt_tokens = prompt_len, max_tokens, temperature, "Starting local generation");

        let mut logits_processor = if temperature <= 0.0 {
            LogitsProcessor::new(DEFAULT_SEED, None, None)
        } else {
            LogitsProcessor::new(DEFAULT_SEED, Some(temperature), None)
        };

        self.model.clear_cache();
        let mut generated: Vec<u32> = Vec::new();
        let mut input = Tensor::new(prompt_tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;
        let mut index_pos = 0;

        for _ in 0..max_tokens {
            let step_len = input.dim(1).map_err(map_candle_err)?;
            let logits = self.model.forward(&input, index_pos).map_err(map_candle_err)?;
            index_pos += step_len;

            let next = logits_processor.sample(&logits).map_err(map_candle_err)?;
            if self.eos_token_ids.contains(&next) {
                break;
            }
            generated.push(next);

            input = Tensor::new(&[next][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        let output = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| ProviderError::Tokenizer(format!("Detokenization failed: {e}")))?;

        Ok((output, prompt_len as u32, generated.len() as u32))
    }
}

fn map_candle_err(e: candle_core::Error) -> ProviderError {
    ProviderError::Inference(format!("Candle inference error: {e}"))
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.load().await?;

        let max_tokens = request
            .params
            .max_output_tokens(MaxTokensKey::MaxNewTokens)
            .unwrap_or(lampkit_core::params::DEFAULT_MAX_OUTPUT_TOKENS);
        let temperature = request.params.get_f64("temperature").unwrap_or(0.0);
        let messages = if self.merge_turns {
            fold_turns(&request.messages)
        } else {
            request.messages.clone()
        };
        let prompt = self.template.format(&messages);

        let inner = self.inner.clone();
        let (output, prompt_tokens, completion_tokens) = tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let state = guard
                .as_mut()
                .ok_or_else(|| ProviderError::Inference("Model was unloaded mid-request".into()))?;
            state.generate(&prompt, max_tokens, temperature)
        })
        .await
        .map_err(|e| ProviderError::Inference(format!("Inference task panicked: {e}")))??;

        let mut content = output.trim();
        for stop in self.template.stop_tokens() {
            content = content.trim_end_matches(stop);
        }

        Ok(ProviderResponse {
            content: content.trim().to_string(),
            model: request.model,
            usage: Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lampkit_config::ModelRegistry;

    #[test]
    fn binds_registry_entry() {
        let registry = ModelRegistry::builtin().unwrap();
        let config = registry.get("GEMMA-2-2B").unwrap();
        let provider = LocalProvider::new(&config, None);
        assert_eq!(provider.template, ChatTemplate::Gemma);
        assert!(provider.merge_turns);
        assert_eq!(provider.name(), "local");
    }

    #[test]
    fn missing_file_name_is_not_configured() {
        let source = ModelSource {
            name: "X".into(),
            repo_id: "someone/missing-repo".into(),
            file_name: None,
            weights: WeightFormat::Gguf,
            tokenizer: "someone/missing-repo".into(),
            hf_token: None,
        };
        assert!(matches!(source.gguf_path(), Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn gemma_entries_load_from_safetensors() {
        let registry = ModelRegistry::builtin().unwrap();
        for name in ["GEMMA-2-2B", "GEMMA-2-9B", "GEMMA-2-27B"] {
            let provider = LocalProvider::new(&registry.get(name).unwrap(), None);
            assert_eq!(provider.source.weights, WeightFormat::Safetensors, "{name}");
        }
    }

    #[test]
    fn shards_are_distinct_and_ordered() {
        let index = r#"{
            "metadata": {"total_size": 1},
            "weight_map": {
                "model.norm.weight": "model-00002-of-00002.safetensors",
                "model.embed_tokens.weight": "model-00001-of-00002.safetensors",
                "model.layers.0.mlp.up_proj.weight": "model-00001-of-00002.safetensors"
            }
        }"#;
        assert_eq!(
            shard_files(index).unwrap(),
            ["model-00001-of-00002.safetensors", "model-00002-of-00002.safetensors"]
        );
    }

    #[test]
    fn safetensors_config_must_be_gemma2() {
        let err = gemma2_config(r#"{"model_type": "llama"}"#).unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(msg) if msg.contains("llama")));
    }

    #[test]
    fn single_file_checkpoint_in_local_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SAFETENSORS_SINGLE), b"").unwrap();
        let source = ModelSource {
            name: "X".into(),
            repo_id: dir.path().to_string_lossy().into_owned(),
            file_name: None,
            weights: WeightFormat::Safetensors,
            tokenizer: String::new(),
            hf_token: None,
        };
        let paths = source.safetensors_paths();
        assert!(matches!(paths.as_deref(), Ok([p]) if p.ends_with(SAFETENSORS_SINGLE)));
    }

    #[tokio::test]
    async fn unload_without_load_is_noop() {
        let registry = ModelRegistry::builtin().unwrap();
        let provider = LocalProvider::new(&registry.get("LLAMA-3.2-3B").unwrap(), None);
        provider.unload().await;
        assert!(provider.inner.lock().await.is_none());
    }
}
