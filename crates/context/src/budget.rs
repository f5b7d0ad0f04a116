//! Context budget calculator.
//!
//! `context_length - reserved_generation - prompt_tokens - extra`. A result
//! at or below zero means nothing more can be placed, and is reported as
//! `None` rather than as a zero-sized budget.

use lampkit_core::error::ProviderError;
use lampkit_core::message::Message;
use lampkit_core::provider::TokenCounter;

/// Remaining space, or `None` when the raw formula is ≤ 0.
pub fn available_space(
    context_length: usize,
    reserved_generation: usize,
    prompt_tokens: usize,
    extra_reserved: usize,
) -> Option<usize> {
    context_length
        .checked_sub(reserved_generation)?
        .checked_sub(prompt_tokens)?
        .checked_sub(extra_reserved)
        .filter(|space| *space > 0)
}

/// The fixed half of a budget: window size and generation reserve.
///
/// The prompt-dependent half is supplied per call, so a budget is
/// recomputed every time the prompt changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub context_length: usize,
    pub reserved_generation: usize,
}

impl ContextBudget {
    pub fn new(context_length: usize, reserved_generation: usize) -> Self {
        Self {
            context_length,
            reserved_generation,
        }
    }

    pub fn available(&self, prompt_tokens: usize, extra_reserved: usize) -> Option<usize> {
        available_space(
            self.context_length,
            self.reserved_generation,
            prompt_tokens,
            extra_reserved,
        )
    }

    /// Count `messages` and return the space left after them.
    pub async fn available_for<C: TokenCounter + ?Sized>(
        &self,
        counter: &C,
        messages: &[Message],
        extra_reserved: usize,
    ) -> Result<Option<usize>, ProviderError> {
        let prompt_tokens = counter.count_messages(messages).await?;
        Ok(self.available(prompt_tokens, extra_reserved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::WhitespaceCounter;

    #[test]
    fn formula() {
        assert_eq!(available_space(1000, 50, 20, 0), Some(930));
        assert_eq!(available_space(1000, 50, 20, 30), Some(900));
    }

    #[test]
    fn zero_is_no_space() {
        assert_eq!(available_space(100, 50, 50, 0), None);
    }

    #[test]
    fn negative_is_no_space() {
        assert_eq!(available_space(100, 150, 0, 0), None);
        assert_eq!(available_space(100, 50, 60, 0), None);
        assert_eq!(available_space(100, 0, 0, 101), None);
    }

    #[test]
    fn monotonically_decreasing() {
        let mut last = usize::MAX;
        for prompt in 0..=100 {
            let space = available_space(100, 10, prompt, 0).unwrap_or(0);
            assert!(space <= last);
            last = space;
        }
        let mut last = usize::MAX;
        for reserved in 0..=100 {
            let space = available_space(100, reserved, 10, 0).unwrap_or(0);
            assert!(space <= last);
            last = space;
        }
    }

    #[tokio::test]
    async fn available_for_counts_joined_turns() {
        let budget = ContextBudget::new(100, 10);
        let messages = vec![Message::system("a b c"), Message::user("d e")];
        let space = budget.available_for(&WhitespaceCounter, &messages, 5).await.unwrap();
        assert_eq!(space, Some(80));
    }
}
