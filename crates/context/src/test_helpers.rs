//! Shared test helpers for budgeting tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lampkit_core::error::ProviderError;
use lampkit_core::provider::TokenCounter;

/// One token per whitespace-separated word. Deterministic and easy to
/// reason about in fixtures.
pub struct WhitespaceCounter;

#[async_trait]
impl TokenCounter for WhitespaceCounter {
    async fn count_text(&self, text: &str) -> Result<usize, ProviderError> {
        Ok(text.split_whitespace().count())
    }
}

/// [`WhitespaceCounter`] that also records how often it was asked,
/// standing in for a metered remote endpoint.
#[derive(Default)]
pub struct CallCounter {
    calls: AtomicUsize,
}

impl CallCounter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenCounter for CallCounter {
    async fn count_text(&self, text: &str) -> Result<usize, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        WhitespaceCounter.count_text(text).await
    }
}

/// A counter whose remote call always fails.
pub struct FailingCounter;

#[async_trait]
impl TokenCounter for FailingCounter {
    async fn count_text(&self, _text: &str) -> Result<usize, ProviderError> {
        Err(ProviderError::Network("connection reset".into()))
    }
}

/// `n` distinct words.
pub fn words(prefix: &str, n: usize) -> String {
    (0..n)
        .map(|i| format!("{prefix}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}
