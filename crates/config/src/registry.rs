//! Model registry: static per-model descriptors.
//!
//! Each entry names a backend-side model, its context window, and how to
//! tokenize for it. The backend family, dispatch style, counting method, and
//! canonical max-output key are all pure functions of the entry, computed
//! once when a handle is built and never mutated afterwards.

use lampkit_core::MaxTokensKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ConfigError;

/// The built-in registry, shipped alongside this crate.
const BUILTIN_REGISTRY: &str = include_str!("../models.toml");

/// A class of LLM providers sharing one request/response shape and auth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendFamily {
    OpenAi,
    Anthropic,
    Gemini,
    Perplexity,
    Groq,
    Together,
    Local,
}

/// The request/response shape a family speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStyle {
    /// Full turn list in, `choices[0].message.content` out.
    ChatCompletion,
    /// First turn split out as a `system` parameter.
    DualTurnSystem,
    /// Roles remapped to user/model, content wrapped in `parts`.
    TurnBasedGenerative,
    /// In-process text generation over a chat template.
    LocalPipeline,
}

/// How a family's tokens are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountingMethod {
    /// Exact byte-pair encoding via tiktoken.
    Tiktoken,
    /// The vendor's token counting endpoint.
    Remote,
    /// A HuggingFace fast tokenizer.
    HfTokenizer,
}

impl BackendFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendFamily::OpenAi => "openai",
            BackendFamily::Anthropic => "anthropic",
            BackendFamily::Gemini => "gemini",
            BackendFamily::Perplexity => "perplexity",
            BackendFamily::Groq => "groq",
            BackendFamily::Together => "together",
            BackendFamily::Local => "local",
        }
    }

    /// Derive the family from a research-style model name.
    ///
    /// `GPT-*`, `CLAUDE-*`, `GEMINI-*` are proprietary; `*-PPLX`, `*-GROQ`,
    /// `*-TGTR` are open-weight models behind a hosted OpenAI-compatible API;
    /// everything else runs locally.
    pub fn from_model_name(name: &str) -> Self {
        let upper = name.to_uppercase();
        if upper.ends_with("-PPLX") {
            return BackendFamily::Perplexity;
        }
        if upper.ends_with("-GROQ") {
            return BackendFamily::Groq;
        }
        if upper.ends_with("-TGTR") {
            return BackendFamily::Together;
        }
        match name_family(&upper).as_str() {
            "GPT" => BackendFamily::OpenAi,
            "CLAUDE" => BackendFamily::Anthropic,
            "GEMINI" => BackendFamily::Gemini,
            _ => BackendFamily::Local,
        }
    }

    pub fn dispatch_style(&self) -> DispatchStyle {
        match self {
            BackendFamily::OpenAi
            | BackendFamily::Perplexity
            | BackendFamily::Groq
            | BackendFamily::Together => DispatchStyle::ChatCompletion,
            BackendFamily::Anthropic => DispatchStyle::DualTurnSystem,
            BackendFamily::Gemini => DispatchStyle::TurnBasedGenerative,
            BackendFamily::Local => DispatchStyle::LocalPipeline,
        }
    }

    pub fn counting_method(&self) -> CountingMethod {
        match self {
            BackendFamily::OpenAi => CountingMethod::Tiktoken,
            BackendFamily::Anthropic | BackendFamily::Gemini => CountingMethod::Remote,
            _ => CountingMethod::HfTokenizer,
        }
    }

    /// Environment variable holding this family's API key, if it needs one.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            BackendFamily::OpenAi => Some("OPENAI_API_KEY"),
            BackendFamily::Anthropic => Some("ANTHROPIC_API_KEY"),
            BackendFamily::Gemini => Some("GOOGLE_API_KEY"),
            BackendFamily::Perplexity => Some("PPLX_API_KEY"),
            BackendFamily::Groq => Some("GROQ_API_KEY"),
            BackendFamily::Together => Some("TOGETHER_API_KEY"),
            BackendFamily::Local => None,
        }
    }

    /// Default endpoint for chat-completions style families.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            BackendFamily::OpenAi => Some("https://api.openai.com/v1"),
            BackendFamily::Perplexity => Some("https://api.perplexity.ai"),
            BackendFamily::Groq => Some("https://api.groq.com/openai/v1"),
            BackendFamily::Together => Some("https://api.together.xyz/v1"),
            BackendFamily::Anthropic => Some("https://api.anthropic.com"),
            BackendFamily::Gemini => Some("https://generativelanguage.googleapis.com/v1beta"),
            BackendFamily::Local => None,
        }
    }
}

impl std::fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical max-output key for a family.
pub fn canonical_key_for(family: BackendFamily) -> MaxTokensKey {
    match family {
        BackendFamily::Gemini => MaxTokensKey::MaxOutputTokens,
        BackendFamily::Local => MaxTokensKey::MaxNewTokens,
        _ => MaxTokensKey::MaxTokens,
    }
}

/// First dash-separated component of a model name, upper-cased
/// (`"GEMMA-2-9B"` → `"GEMMA"`).
pub fn name_family(name: &str) -> String {
    name.split('-').next().unwrap_or_default().to_uppercase()
}

/// Name families whose local pipeline folds a multi-turn prompt into one
/// user turn.
const MERGED_TURN_FAMILIES: [&str; 2] = ["MISTRAL", "GEMMA"];

/// On-disk layout of a local model's weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightFormat {
    /// One quantized `.gguf` file, llama architecture.
    Gguf,
    /// A HuggingFace `safetensors` checkpoint with `config.json`, Gemma-2 architecture.
    Safetensors,
}

impl WeightFormat {
    /// `.gguf` files are GGUF; anything else (or no file at all) is a
    /// safetensors repo.
    fn infer(file_name: Option<&str>) -> Self {
        match file_name {
            Some(f) if f.to_lowercase().ends_with(".gguf") => WeightFormat::Gguf,
            _ => WeightFormat::Safetensors,
        }
    }
}

/// A registry entry as written in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Backend-side model id (API model name or HuggingFace repo).
    pub repo_id: String,

    /// GGUF weights file inside `repo_id` (local models).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Weight layout; inferred from `file_name` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightFormat>,

    /// Maximum prompt + generation tokens per call.
    pub context_length: usize,

    /// HuggingFace repo holding `tokenizer.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,

    /// Explicit family; derived from the model name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<BackendFamily>,

    /// Chat template for local inference (`chatml`, `llama3`, `mistral`, `gemma`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_template: Option<String>,

    /// Override the turn-folding rule for local pipelines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_turns: Option<bool>,

    /// Override the family's default endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A resolved, immutable model descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    pub repo_id: String,
    pub file_name: Option<String>,
    pub weights: WeightFormat,
    pub context_length: usize,
    pub tokenizer: Option<String>,
    pub family: BackendFamily,
    pub chat_template: Option<String>,
    pub merge_turns: bool,
    pub base_url: Option<String>,
}

impl ModelConfig {
    fn resolve(name: &str, entry: &ModelEntry) -> Result<Self, ConfigError> {
        if entry.repo_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "model '{name}' has an empty repo_id"
            )));
        }
        if entry.context_length == 0 {
            return Err(ConfigError::ValidationError(format!(
                "model '{name}' must have context_length > 0"
            )));
        }

        let family = entry
            .family
            .unwrap_or_else(|| BackendFamily::from_model_name(name));
        let merge_turns = entry.merge_turns.unwrap_or_else(|| {
            family == BackendFamily::Local
                && MERGED_TURN_FAMILIES.contains(&name_family(name).as_str())
        });

        Ok(Self {
            name: name.to_string(),
            repo_id: entry.repo_id.clone(),
            file_name: entry.file_name.clone(),
            weights: entry
                .weights
                .unwrap_or_else(|| WeightFormat::infer(entry.file_name.as_deref())),
            context_length: entry.context_length,
            tokenizer: entry.tokenizer.clone(),
            family,
            chat_template: entry.chat_template.clone(),
            merge_turns,
            base_url: entry.base_url.clone(),
        })
    }

    pub fn dispatch_style(&self) -> DispatchStyle {
        self.family.dispatch_style()
    }

    pub fn counting_method(&self) -> CountingMethod {
        self.family.counting_method()
    }

    pub fn canonical_key(&self) -> MaxTokensKey {
        canonical_key_for(self.family)
    }

    /// Repo to fetch `tokenizer.json` from: the explicit tokenizer, else the
    /// model repo itself.
    pub fn tokenizer_repo(&self) -> &str {
        self.tokenizer.as_deref().unwrap_or(&self.repo_id)
    }

    /// Endpoint to talk to: the entry override, else the family default.
    pub fn endpoint(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .or_else(|| self.family.default_base_url())
    }
}

/// Registry file layout: `[models.<NAME>]` tables.
#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    models: BTreeMap<String, ModelEntry>,
}

/// Read-only lookup from model name to descriptor.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<String, ModelEntry>,
}

impl ModelRegistry {
    /// The registry shipped with lampkit.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml(BUILTIN_REGISTRY)
    }

    /// Parse a registry from `[models.<NAME>]` TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile = toml::from_str(content).map_err(|e| {
            ConfigError::ValidationError(format!("invalid model registry: {e}"))
        })?;
        Ok(Self::from_entries(file.models))
    }

    pub fn from_entries(entries: BTreeMap<String, ModelEntry>) -> Self {
        Self { entries }
    }

    /// Overlay entries; same-named entries replace existing ones.
    pub fn merge(&mut self, overrides: &BTreeMap<String, ModelEntry>) {
        for (name, entry) in overrides {
            self.entries.insert(name.clone(), entry.clone());
        }
    }

    /// Resolve a model by name. Unknown names and malformed entries fail.
    pub fn get(&self, name: &str) -> Result<ModelConfig, ConfigError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))?;
        ModelConfig::resolve(name, entry)
    }

    /// Validate every entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, entry) in &self.entries {
            ModelConfig::resolve(name, entry)?;
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
