//! LaMP experiment driver.
//!
//! Loads a task split, ranks each user's profile, packs the best examples
//! into the task's prompt template within the model's context window and
//! records formatted answers in resumable checkpoints. Also aggregates
//! Big-Five personality answers produced by separate inference runs.

pub mod bfi;
pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod exp_log;
pub mod formatter;
pub mod prompts;
pub mod retrieval;
pub mod runner;

pub use bfi::{AggregateSummary, aggregate_bfi, extract_bfi_scores};
pub use checkpoint::{Checkpoint, Gold, checkpoint_path};
pub use dataset::{DataItem, Dataset, Split, Task};
pub use error::{ExperimentError, Result};
pub use exp_log::{ExperimentLog, LogRecord};
pub use formatter::format_output;
pub use prompts::{Method, PromptTemplate};
pub use retrieval::{OVERLAP_RETRIEVER, overlap_rank, rank_all};
pub use runner::{ApiHandleFactory, HandleFactory, ModelReport, RunSpec, Runner};
