//! Example packing: first-fit-stop insertion of retrieved examples.
//!
//! Examples are tried in the order given. Before each candidate the
//! prompt is re-rendered with the examples accepted so far and the budget
//! recomputed from it. The candidate is kept iff
//!
//! ```text
//! count(accepted + "\n" + candidate + query) < available_space
//! ```
//!
//! and the first rejection ends packing, even if a later, shorter
//! candidate would fit.

use lampkit_core::error::ProviderError;
use lampkit_core::message::Message;
use lampkit_core::provider::TokenCounter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::budget::ContextBudget;

/// A retrieved profile entry and its ground-truth label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamplePair {
    pub text: String,
    pub label: String,
}

impl ExamplePair {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}

/// How one example is laid out inside the examples block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExampleFormat {
    /// `"{Text}:\n{text}\n{Label}:\n{label}\n"`
    Pair { text_name: String, label_name: String },
    /// `"{Text}:\n{text}"`; the label is ignored.
    TextOnly { text_name: String },
}

impl ExampleFormat {
    pub fn pair(text_name: impl Into<String>, label_name: impl Into<String>) -> Self {
        ExampleFormat::Pair {
            text_name: text_name.into(),
            label_name: label_name.into(),
        }
    }

    pub fn text_only(text_name: impl Into<String>) -> Self {
        ExampleFormat::TextOnly {
            text_name: text_name.into(),
        }
    }

    pub fn render(&self, example: &ExamplePair) -> String {
        match self {
            ExampleFormat::Pair {
                text_name,
                label_name,
            } => format!(
                "{}:\n{}\n{}:\n{}\n",
                capitalize(text_name),
                example.text,
                capitalize(label_name),
                example.label
            ),
            ExampleFormat::TextOnly { text_name } => {
                format!("{}:\n{}", capitalize(text_name), example.text)
            }
        }
    }
}

/// First letter upper-cased, the rest lower-cased.
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// What the packer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackOutcome {
    /// The examples block to interpolate, and how many examples it holds.
    Packed { block: String, included: usize },
    /// The prompt leaves no space even with zero examples.
    InsufficientSpace,
}

impl PackOutcome {
    /// The block, with insufficient space read as an empty one.
    pub fn block_or_empty(&self) -> &str {
        match self {
            PackOutcome::Packed { block, .. } => block,
            PackOutcome::InsufficientSpace => "",
        }
    }

    pub fn included(&self) -> usize {
        match self {
            PackOutcome::Packed { included, .. } => *included,
            PackOutcome::InsufficientSpace => 0,
        }
    }
}

/// Pack `examples` into an examples block for `query`.
///
/// `render` builds the full prompt for a given examples block; it is
/// called again after every accepted example so the budget tracks the
/// growing prompt.
pub async fn pack_examples<C, R>(
    counter: &C,
    budget: &ContextBudget,
    examples: &[ExamplePair],
    format: &ExampleFormat,
    query: &str,
    render: R,
) -> Result<PackOutcome, ProviderError>
where
    C: TokenCounter + ?Sized,
    R: Fn(&str) -> Vec<Message>,
{
    let mut block = String::new();
    let mut included = 0;

    let Some(mut space) = budget.available_for(counter, &render(&block), 0).await? else {
        debug!("No space for examples before packing");
        return Ok(PackOutcome::InsufficientSpace);
    };

    for example in examples {
        // the block only changes after an acceptance
        if included > 0 {
            match budget.available_for(counter, &render(&block), 0).await? {
                Some(now) => space = now,
                None => break,
            }
        }

        let candidate = format.render(example);
        let tentative = format!("{block}\n{candidate}{query}");
        let tokens = counter.count_text(&tentative).await?;

        if tokens < space {
            block.push('\n');
            block.push_str(&candidate);
            included += 1;
        } else {
            debug!(tokens, space, included, "Example does not fit, packing stopped");
            break;
        }
    }

    debug!(included, offered = examples.len(), "Examples packed");
    Ok(PackOutcome::Packed { block, included })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{CallCounter, FailingCounter, WhitespaceCounter, words};

    /// Renders the prompt as `{examples}\n{query}` so its size is exactly
    /// the examples plus the query.
    fn renderer(query: &str) -> impl Fn(&str) -> Vec<Message> + '_ {
        move |examples| vec![Message::user(format!("{examples}\n{query}"))]
    }

    /// A text-only example of `n` words (the "Tweet:" prefix adds one).
    fn example(tag: &str, n: usize) -> ExamplePair {
        let text = words(tag, n - 1);
        ExamplePair::new(text.clone(), text)
    }

    #[tokio::test]
    async fn three_by_three_hundred_packs_two() {
        let query = words("q", 20);
        let budget = ContextBudget::new(1000, 50);
        let examples = vec![example("a", 300), example("b", 300), example("c", 300)];
        let format = ExampleFormat::text_only("tweet");

        let outcome = pack_examples(&WhitespaceCounter, &budget, &examples, &format, &query, renderer(&query))
            .await
            .unwrap();

        assert_eq!(outcome.included(), 2);
        let block = outcome.block_or_empty();
        assert!(block.contains("a0") && block.contains("b0"));
        assert!(!block.contains("c0"));
    }

    #[tokio::test]
    async fn packed_block_respects_budget_and_next_would_not() {
        let query = words("q", 20);
        let budget = ContextBudget::new(1000, 50);
        let examples = vec![example("a", 300), example("b", 300), example("c", 300)];
        let format = ExampleFormat::text_only("tweet");
        let counter = WhitespaceCounter;

        let outcome = pack_examples(&counter, &budget, &examples, &format, &query, renderer(&query))
            .await
            .unwrap();
        let block = outcome.block_or_empty().to_string();

        // The last accepted example satisfied the bound against the budget
        // computed before it was added.
        let before_last = format!("\n{}", format.render(&examples[0]));
        let space = budget
            .available_for(&counter, &renderer(&query)(&before_last), 0)
            .await
            .unwrap()
            .unwrap();
        let used = counter.count_text(&format!("{block}{query}")).await.unwrap();
        assert!(used < space);

        // Forcing the rejected candidate in breaks the bound.
        let space_now = budget
            .available_for(&counter, &renderer(&query)(&block), 0)
            .await
            .unwrap()
            .unwrap();
        let forced = format!("{block}\n{}{query}", format.render(&examples[2]));
        assert!(counter.count_text(&forced).await.unwrap() >= space_now);
    }

    #[tokio::test]
    async fn empty_block_prompt_is_counted_once() {
        let query = words("q", 20);
        let budget = ContextBudget::new(1000, 50);
        let examples = vec![example("a", 300), example("b", 300), example("c", 300)];
        let counter = CallCounter::default();

        let outcome = pack_examples(
            &counter,
            &budget,
            &examples,
            &ExampleFormat::text_only("tweet"),
            &query,
            renderer(&query),
        )
        .await
        .unwrap();
        assert_eq!(outcome.included(), 2);
        // one budget per distinct block, one count per candidate
        assert_eq!(counter.calls(), 3 + 3);

        let counter = CallCounter::default();
        pack_examples(&counter, &budget, &[], &ExampleFormat::text_only("tweet"), &query, renderer(&query))
            .await
            .unwrap();
        assert_eq!(counter.calls(), 1);
    }

    #[tokio::test]
    async fn first_fit_stop_skips_later_short_examples() {
        let query = words("q", 10);
        let budget = ContextBudget::new(500, 50);
        let examples = vec![example("a", 100), example("big", 400), example("tiny", 2)];
        let format = ExampleFormat::text_only("tweet");

        let outcome = pack_examples(&WhitespaceCounter, &budget, &examples, &format, &query, renderer(&query))
            .await
            .unwrap();
        assert_eq!(outcome.included(), 1);
        assert!(!outcome.block_or_empty().contains("tiny"));
    }

    #[tokio::test]
    async fn no_space_before_first_example() {
        let query = words("q", 100);
        let budget = ContextBudget::new(120, 20);
        let outcome = pack_examples(
            &WhitespaceCounter,
            &budget,
            &[example("a", 5)],
            &ExampleFormat::text_only("tweet"),
            &query,
            renderer(&query),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PackOutcome::InsufficientSpace);
        assert_eq!(outcome.block_or_empty(), "");
    }

    #[tokio::test]
    async fn empty_candidate_list_packs_nothing() {
        let query = words("q", 5);
        let outcome = pack_examples(
            &WhitespaceCounter,
            &ContextBudget::new(100, 10),
            &[],
            &ExampleFormat::text_only("tweet"),
            &query,
            renderer(&query),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            PackOutcome::Packed {
                block: String::new(),
                included: 0
            }
        );
    }

    #[tokio::test]
    async fn counting_failure_propagates() {
        let result = pack_examples(
            &FailingCounter,
            &ContextBudget::new(100, 10),
            &[example("a", 3)],
            &ExampleFormat::text_only("tweet"),
            "q",
            renderer("q"),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn pair_format_layout() {
        let format = ExampleFormat::pair("abstract", "title");
        let rendered = format.render(&ExamplePair::new("Some text", "A Title"));
        assert_eq!(rendered, "Abstract:\nSome text\nTitle:\nA Title\n");
    }

    #[test]
    fn text_only_ignores_label() {
        let format = ExampleFormat::text_only("tweet");
        let rendered = format.render(&ExamplePair::new("hello", "ignored"));
        assert_eq!(rendered, "Tweet:\nhello");
    }
}
