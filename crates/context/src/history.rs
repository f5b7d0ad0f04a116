//! Chat history truncation.

use std::collections::VecDeque;

use lampkit_core::error::ProviderError;
use lampkit_core::message::Message;
use lampkit_core::provider::TokenCounter;
use tracing::warn;

pub const DEFAULT_HISTORY_FRACTION: f64 = 0.2;

/// Evicts the oldest turns until the history fits
/// `floor(context_length * fraction)` tokens.
///
/// A turn larger than the whole budget is evicted like any other, so the
/// history can come back empty. `min_retained_turns` stops eviction
/// early for callers that always want the latest turns, at the cost of
/// exceeding the budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryTruncator {
    pub fraction: f64,
    pub min_retained_turns: usize,
}

impl Default for HistoryTruncator {
    fn default() -> Self {
        Self {
            fraction: DEFAULT_HISTORY_FRACTION,
            min_retained_turns: 0,
        }
    }
}

impl HistoryTruncator {
    pub fn new(fraction: f64, min_retained_turns: usize) -> Self {
        Self {
            fraction,
            min_retained_turns,
        }
    }

    pub fn budget(&self, context_length: usize) -> usize {
        (context_length as f64 * self.fraction).floor() as usize
    }

    /// Return the longest suffix of `history` that fits the budget.
    /// Each turn is counted once.
    pub async fn truncate<C: TokenCounter + ?Sized>(
        &self,
        counter: &C,
        history: Vec<Message>,
        context_length: usize,
    ) -> Result<Vec<Message>, ProviderError> {
        let budget = self.budget(context_length);

        let mut turns = VecDeque::with_capacity(history.len());
        let mut total = 0usize;
        for turn in history {
            let tokens = counter.count_text(&turn.content).await?;
            total += tokens;
            turns.push_back((turn, tokens));
        }

        while total > budget && turns.len() > self.min_retained_turns {
            let Some((_, tokens)) = turns.pop_front() else {
                break;
            };
            total -= tokens;
            warn!(evicted_tokens = tokens, remaining = turns.len(), budget, "Evicted oldest history turn");
        }

        Ok(turns.into_iter().map(|(turn, _)| turn).collect())
    }
}
