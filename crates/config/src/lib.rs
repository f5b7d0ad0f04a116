//! Configuration loading, validation, and management for lampkit.
//!
//! Loads configuration from `~/.lampkit/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.

pub mod registry;

pub use registry::{
    BackendFamily, CountingMethod, DispatchStyle, ModelConfig, ModelEntry, ModelRegistry,
    WeightFormat, canonical_key_for, name_family,
};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where LaMP `<split>_<task>_questions.json` files live
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root of the per-model checkpoint tree
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Per-experiment JSONL logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Precomputed retrieval rankings and word lists
    #[serde(default = "default_retrieval_dir")]
    pub retrieval_dir: PathBuf,

    /// Inferred Big-Five answers to aggregate
    #[serde(default = "default_bfi_dir")]
    pub bfi_dir: PathBuf,

    /// Aggregated Big-Five results
    #[serde(default = "default_bfi_out_dir")]
    pub bfi_out_dir: PathBuf,

    /// Models to run when none are named on the command line
    #[serde(default = "default_models")]
    pub default_models: Vec<String>,

    /// Experiment loop settings
    #[serde(default)]
    pub experiment: ExperimentConfig,

    /// Registry entries layered over the built-in registry
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("res_pkls")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_retrieval_dir() -> PathBuf {
    PathBuf::from("retrieval")
}
fn default_bfi_dir() -> PathBuf {
    PathBuf::from("personality_analysis/files/inferred_bfi")
}
fn default_bfi_out_dir() -> PathBuf {
    PathBuf::from("personality_analysis/files/bfi_results")
}
fn default_models() -> Vec<String> {
    vec!["GEMMA-2-2B".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Generation length passed as `max_new_tokens` (renamed per backend)
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u64,

    /// Rewrite the checkpoint every N processed items
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    /// Fraction of the context window reserved for chat history
    #[serde(default = "default_history_fraction")]
    pub history_fraction: f64,

    /// Turns the history truncator never evicts
    #[serde(default)]
    pub min_retained_turns: usize,

    /// Seed for the `shuffle` k-modifier; unseeded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_max_new_tokens() -> u64 {
    64
}
fn default_checkpoint_every() -> usize {
    500
}
fn default_history_fraction() -> f64 {
    0.2
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            checkpoint_every: default_checkpoint_every(),
            history_fraction: default_history_fraction(),
            min_retained_turns: 0,
            seed: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or from `~/.lampkit/config.toml`.
    ///
    /// Environment overrides (highest priority):
    /// - `LAMPKIT_DATA_DIR`
    /// - `LAMPKIT_OUTPUT_DIR`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(path.unwrap_or(&default_path))?;

        if let Ok(dir) = std::env::var("LAMPKIT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("LAMPKIT_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lampkit")
    }

    /// The built-in registry with this config's `[models]` layered on top.
    pub fn registry(&self) -> Result<ModelRegistry, ConfigError> {
        let mut registry = ModelRegistry::builtin()?;
        registry.merge(&self.models);
        Ok(registry)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.experiment.history_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::ValidationError(
                "experiment.history_fraction must be in (0, 1]".into(),
            ));
        }

        if self.experiment.checkpoint_every == 0 {
            return Err(ConfigError::ValidationError(
                "experiment.checkpoint_every must be > 0".into(),
            ));
        }

        ModelRegistry::from_entries(self.models.clone()).validate()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            log_dir: default_log_dir(),
            retrieval_dir: default_retrieval_dir(),
            bfi_dir: default_bfi_dir(),
            bfi_out_dir: default_bfi_out_dir(),
            default_models: default_models(),
            experiment: ExperimentConfig::default(),
            models: BTreeMap::new(),
        }
    }
}

/// API keys per backend family, read once when a handle is built.
#[derive(Clone, Default)]
pub struct ApiKeys {
    keys: HashMap<BackendFamily, String>,
    hf_token: Option<String>,
}

impl ApiKeys {
    /// Read every family's key from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read keys through an arbitrary lookup (tests, alternate stores).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let families = [
            BackendFamily::OpenAi,
            BackendFamily::Anthropic,
            BackendFamily::Gemini,
            BackendFamily::Perplexity,
            BackendFamily::Groq,
            BackendFamily::Together,
        ];
        let keys = families
            .into_iter()
            .filter_map(|family| {
                let var = family.api_key_var()?;
                lookup(var)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (family, v))
            })
            .collect();

        Self {
            keys,
            hf_token: lookup("HF_API_KEY").filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn get(&self, family: BackendFamily) -> Option<&str> {
        self.keys.get(&family).map(String::as_str)
    }

    /// The key for `family`, or a configuration error naming the variable.
    pub fn require(&self, family: BackendFamily) -> Result<String, ConfigError> {
        match family.api_key_var() {
            None => Ok(String::new()),
            Some(var) => self
                .get(family)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::MissingApiKey {
                    family: family.to_string(),
                    var: var.to_string(),
                }),
        }
    }

    /// HuggingFace hub token for gated tokenizer/weight downloads.
    pub fn hf_token(&self) -> Option<&str> {
        self.hf_token.as_deref()
    }
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut families: Vec<_> = self.keys.keys().map(|f| f.as_str()).collect();
        families.sort_unstable();
        f.debug_struct("ApiKeys")
            .field("families", &families)
            .field("hf_token", &self.hf_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Unknown model '{0}' (not in the model registry)")]
    UnknownModel(String),

    #[error("Missing API key for {family}: set {var}")]
    MissingApiKey { family: String, var: String },
}

impl From<ConfigError> for lampkit_core::Error {
    fn from(e: ConfigError) -> Self {
        lampkit_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.experiment.max_new_tokens, 64);
        assert_eq!(config.experiment.checkpoint_every, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.output_dir, config.output_dir);
        assert_eq!(parsed.experiment.history_fraction, 0.2);
    }

    #[test]
    fn invalid_history_fraction_rejected() {
        let mut config = AppConfig::default();
        config.experiment.history_fraction = 1.5;
        assert!(config.validate().is_err());
        config.experiment.history_fraction = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_checkpoint_interval_rejected() {
        let mut config = AppConfig::default();
        config.experiment.checkpoint_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_models, vec!["GEMMA-2-2B".to_string()]);
    }

    #[test]
    fn config_file_models_extend_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
output_dir = "out"

[experiment]
checkpoint_every = 10
seed = 7

[models."QWEN-2-7B-TGTR"]
repo_id = "Qwen/Qwen2-7B-Instruct"
tokenizer = "Qwen/Qwen2-7B-Instruct"
context_length = 32768
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.experiment.seed, Some(7));

        let registry = config.registry().unwrap();
        let model = registry.get("QWEN-2-7B-TGTR").unwrap();
        assert_eq!(model.family, BackendFamily::Together);
        assert!(registry.get("GPT-4o").is_ok());
    }

    #[test]
    fn malformed_model_entry_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[models."BROKEN"]
repo_id = ""
context_length = 4096
"#,
        )
        .unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn api_keys_from_lookup() {
        let keys = ApiKeys::from_lookup(|var| match var {
            "OPENAI_API_KEY" => Some("sk-test".into()),
            "GROQ_API_KEY" => Some("   ".into()),
            _ => None,
        });
        assert_eq!(keys.get(BackendFamily::OpenAi), Some("sk-test"));
        assert_eq!(keys.get(BackendFamily::Groq), None);
        assert!(keys.require(BackendFamily::Local).is_ok());

        let err = keys.require(BackendFamily::Anthropic).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn api_keys_debug_is_redacted() {
        let keys = ApiKeys::from_lookup(|var| match var {
            "OPENAI_API_KEY" => Some("sk-secret".into()),
            "HF_API_KEY" => Some("hf-secret".into()),
            _ => None,
        });
        let debug = format!("{keys:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("hf-secret"));
        assert!(debug.contains("openai"));
    }
}
