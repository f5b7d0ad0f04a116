//! Document fitting: drop documents from the tail until the rest fit.

use lampkit_core::error::ProviderError;
use lampkit_core::message::Message;
use lampkit_core::provider::TokenCounter;
use tracing::warn;

use crate::budget::ContextBudget;
use crate::history::HistoryTruncator;

/// Documents that survived fitting, newline-joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FittedDocuments {
    pub text: String,
    pub kept: usize,
    pub dropped: usize,
}

/// Keep the longest prefix of `documents` whose newline-joined text is
/// at most `space` tokens. Every dropped document is logged.
pub async fn fit_documents<C: TokenCounter + ?Sized>(
    counter: &C,
    documents: &[String],
    space: usize,
) -> Result<FittedDocuments, ProviderError> {
    let mut kept = documents.len();
    loop {
        let text = documents[..kept].join("\n");
        let tokens = counter.count_text(&text).await?;
        if tokens <= space || kept == 0 {
            return Ok(FittedDocuments {
                text,
                kept,
                dropped: documents.len() - kept,
            });
        }
        kept -= 1;
        warn!(tokens, space, remaining = kept, "Context exceeds context window, dropped last document");
    }
}

/// Fit `documents` around a prompt, its truncated chat history and an
/// optional query.
///
/// The history is truncated first; the space left after prompt, history
/// and query is what the documents get. `None` means no space at all.
pub async fn prepare_context<C: TokenCounter + ?Sized>(
    counter: &C,
    budget: &ContextBudget,
    truncator: &HistoryTruncator,
    prompt: &[Message],
    history: Vec<Message>,
    documents: &[String],
    query: Option<&str>,
) -> Result<Option<FittedDocuments>, ProviderError> {
    let history = if history.is_empty() {
        history
    } else {
        truncator.truncate(counter, history, budget.context_length).await?
    };

    let mut turns = prompt.to_vec();
    turns.extend(history);

    let query_tokens = match query {
        Some(q) => counter.count_text(q).await?,
        None => 0,
    };

    match budget.available_for(counter, &turns, query_tokens).await? {
        Some(space) => Ok(Some(fit_documents(counter, documents, space).await?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{WhitespaceCounter, words};

    fn docs(sizes: &[usize]) -> Vec<String> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, n)| words(&format!("d{i}w"), *n))
            .collect()
    }

    #[tokio::test]
    async fn everything_fits() {
        let fitted = fit_documents(&WhitespaceCounter, &docs(&[3, 4]), 10).await.unwrap();
        assert_eq!(fitted.kept, 2);
        assert_eq!(fitted.dropped, 0);
        assert_eq!(fitted.text.lines().count(), 2);
    }

    #[tokio::test]
    async fn drops_from_the_tail() {
        let documents = docs(&[5, 5, 5, 5]);
        let fitted = fit_documents(&WhitespaceCounter, &documents, 12).await.unwrap();
        assert_eq!(fitted.kept, 2);
        assert_eq!(fitted.dropped, 2);
        assert_eq!(fitted.text, format!("{}\n{}", documents[0], documents[1]));
    }

    #[tokio::test]
    async fn nothing_fits_gives_empty_text() {
        let fitted = fit_documents(&WhitespaceCounter, &docs(&[50]), 10).await.unwrap();
        assert_eq!(fitted.kept, 0);
        assert_eq!(fitted.text, "");
    }

    #[tokio::test]
    async fn prepare_accounts_for_prompt_history_and_query() {
        let budget = ContextBudget::new(100, 10);
        let prompt = vec![Message::user(words("p", 20))];
        let history = vec![Message::user(words("h", 10))];
        // 100 - 10 - 30 - 5 = 55 tokens for documents
        let fitted = prepare_context(
            &WhitespaceCounter,
            &budget,
            &HistoryTruncator::default(),
            &prompt,
            history,
            &docs(&[30, 20, 10]),
            Some(&words("q", 5)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(fitted.kept, 2);
    }

    #[tokio::test]
    async fn prepare_truncates_history_first() {
        let budget = ContextBudget::new(100, 10);
        // 40 history tokens > floor(100 * 0.2) = 20, so the turn is evicted.
        let history = vec![Message::user(words("h", 40))];
        let fitted = prepare_context(
            &WhitespaceCounter,
            &budget,
            &HistoryTruncator::default(),
            &[Message::user("p")],
            history,
            &docs(&[80]),
            None,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(fitted.kept, 1);
    }

    #[tokio::test]
    async fn prepare_without_space_is_none() {
        let budget = ContextBudget::new(50, 10);
        let result = prepare_context(
            &WhitespaceCounter,
            &budget,
            &HistoryTruncator::default(),
            &[Message::user(words("p", 40))],
            Vec::new(),
            &docs(&[1]),
            None,
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }
}
