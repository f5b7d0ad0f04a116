//! # lampkit Core
//!
//! Domain types, traits, and error definitions for the lampkit experiment
//! harness. This crate has **no HTTP or ML dependencies**; it defines the
//! model that the provider, context, and experiment crates implement against.
//!
//! ## Design Philosophy
//!
//! The two seams that vary per backend are traits here:
//! - [`Provider`] turns a prompt plus generation params into text
//! - [`TokenCounter`] measures text against a backend's tokenizer
//!
//! Everything downstream (budgeting, packing, the experiment loop) is written
//! against these traits, so tests swap in scripted implementations.

pub mod error;
pub mod message;
pub mod params;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result};
pub use message::{Message, Role, join_contents};
pub use params::{GenParams, MaxTokensKey};
pub use provider::{Provider, ProviderRequest, ProviderResponse, TokenCounter, Usage};
