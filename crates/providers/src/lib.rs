//! LLM backend implementations for lampkit.
//!
//! Every backend implements `lampkit_core::Provider`; each dispatch style is
//! one concrete type. [`ModelHandle`] binds a registry entry to the provider
//! and token counter its family calls for.

pub mod anthropic;
pub mod chat_template;
pub mod gemini;
pub mod handle;
mod http;
#[cfg(feature = "local")]
pub mod local;
pub mod openai_compat;
pub mod tokenizer;

pub use anthropic::AnthropicProvider;
pub use chat_template::ChatTemplate;
pub use gemini::GeminiProvider;
pub use handle::ModelHandle;
#[cfg(feature = "local")]
pub use local::LocalProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use tokenizer::{HfTokenizerCounter, TiktokenCounter};
