//! Context-window budgeting and prompt assembly.
//!
//! Everything here measures text through a [`TokenCounter`], so the same
//! packing logic serves every backend family.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`ContextBudget`] | space left after generation and prompt tokens |
//! | [`HistoryTruncator`] | oldest-first eviction down to a fraction of the window |
//! | [`KSpec`] | `k` strings: count, skip prefix, shuffle/reverse |
//! | [`pack_examples`] | first-fit-stop example packing |
//! | [`fit_documents`] | tail-drop document fitting |
//!
//! [`TokenCounter`]: lampkit_core::TokenCounter

pub mod budget;
pub mod documents;
pub mod history;
pub mod kspec;
pub mod packing;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use budget::{ContextBudget, available_space};
pub use documents::{FittedDocuments, fit_documents, prepare_context};
pub use history::HistoryTruncator;
pub use kspec::{DocCount, KSpec, KSpecError};
pub use packing::{ExampleFormat, ExamplePair, PackOutcome, pack_examples};
