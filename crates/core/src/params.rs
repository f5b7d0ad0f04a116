//! Generation parameters and max-output-length key normalization.
//!
//! Backends disagree on what the "maximum output length" knob is called.
//! Callers may use any of the three spellings; [`GenParams::normalized`]
//! renames it to the one the target backend accepts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The three spellings of the max-output-length parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxTokensKey {
    /// Local text-generation pipelines.
    MaxNewTokens,
    /// Chat-completions style and Anthropic messages.
    MaxTokens,
    /// Gemini generation config.
    MaxOutputTokens,
}

impl MaxTokensKey {
    pub const ALL: [MaxTokensKey; 3] = [
        MaxTokensKey::MaxNewTokens,
        MaxTokensKey::MaxTokens,
        MaxTokensKey::MaxOutputTokens,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaxTokensKey::MaxNewTokens => "max_new_tokens",
            MaxTokensKey::MaxTokens => "max_tokens",
            MaxTokensKey::MaxOutputTokens => "max_output_tokens",
        }
    }
}

impl std::fmt::Display for MaxTokensKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default generation length when the caller supplies no params at all.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u64 = 512;

/// Free-form generation parameters passed through to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenParams(Map<String, Value>);

impl GenParams {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Params holding only a max-output length under `key`.
    pub fn with_max_tokens(key: MaxTokensKey, value: u64) -> Self {
        let mut params = Self::new();
        params.set(key.as_str(), value);
        params
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rename whichever max-output spelling is present to `canonical`.
    ///
    /// The value moves; no alias key survives. If the canonical key is
    /// already set it wins and the aliases are dropped.
    pub fn normalized(mut self, canonical: MaxTokensKey) -> Self {
        for alias in MaxTokensKey::ALL {
            if alias == canonical {
                continue;
            }
            if let Some(value) = self.0.remove(alias.as_str()) {
                self.0.entry(canonical.as_str()).or_insert(value);
            }
        }
        self
    }

    /// Resolve caller params for a backend: `None` becomes the default
    /// length under the canonical key, anything else is normalized.
    pub fn resolve(params: Option<GenParams>, canonical: MaxTokensKey) -> Self {
        match params {
            None => Self::with_max_tokens(canonical, DEFAULT_MAX_OUTPUT_TOKENS),
            Some(p) => p.normalized(canonical),
        }
    }

    /// The max-output length under `key`, if it is a non-negative integer.
    pub fn max_output_tokens(&self, key: MaxTokensKey) -> Option<u64> {
        self.0.get(key.as_str()).and_then(Value::as_u64)
    }

    /// Params with `key` removed, for backends that place it elsewhere.
    pub fn without(&self, key: &str) -> Map<String, Value> {
        let mut map = self.0.clone();
        map.remove(key);
        map
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }
}

impl From<Map<String, Value>> for GenParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
