//! Retrieval rankings and CWMap word lists.
//!
//! Rankings are either precomputed files (`<split>_<task>_<retriever>.json`,
//! one list of profile indices per query) or produced by the built-in
//! `overlap` retriever.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::info;

use crate::dataset::{Dataset, Split, Task};
use crate::error::{ExperimentError, Result};

/// Name of the built-in term-overlap retriever.
pub const OVERLAP_RETRIEVER: &str = "overlap";

/// One ranked list of profile indices per dataset item.
pub type Rankings = Vec<Vec<usize>>;

pub fn rankings_path(retrieval_dir: &Path, split: Split, task: Task, retriever: &str) -> PathBuf {
    retrieval_dir.join(format!("{split}_{task}_{retriever}.json"))
}

pub fn words_path(retrieval_dir: &Path, split: Split, task: Task) -> PathBuf {
    retrieval_dir.join(format!("{split}_{task}_words.json"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| ExperimentError::Retrieval {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ExperimentError::Retrieval {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn check_len<T>(path: &Path, values: &[T], expected: usize) -> Result<()> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(ExperimentError::Retrieval {
            path: path.to_path_buf(),
            reason: format!("{} entries for {expected} dataset items", values.len()),
        })
    }
}

/// Load precomputed rankings; there must be one list per item.
pub fn load_rankings(
    retrieval_dir: &Path,
    dataset: &Dataset,
    retriever: &str,
) -> Result<Rankings> {
    let path = rankings_path(retrieval_dir, dataset.split, dataset.task, retriever);
    let rankings: Rankings = read_json(&path)?;
    check_len(&path, &rankings, dataset.len())?;
    info!(path = %path.display(), "Loaded retrieval rankings");
    Ok(rankings)
}

/// Rankings for every item: built-in for `overlap`, from disk otherwise.
pub fn rank_all(retrieval_dir: &Path, dataset: &Dataset, retriever: &str) -> Result<Rankings> {
    if retriever != OVERLAP_RETRIEVER {
        return load_rankings(retrieval_dir, dataset, retriever);
    }

    let fields = dataset.task.profile_fields();
    let rankings = dataset
        .items
        .iter()
        .map(|item| {
            let corpus = if dataset.task.ranks_by_label() {
                item.profile_labels(&fields)
            } else {
                item.profile_texts(&fields)
            };
            overlap_rank(&item.input, &corpus)
        })
        .collect();
    info!(items = dataset.len(), "Ranked profiles by term overlap");
    Ok(rankings)
}

/// Load the CWMap word list of each item.
pub fn load_word_lists(retrieval_dir: &Path, dataset: &Dataset) -> Result<Vec<Vec<String>>> {
    let path = words_path(retrieval_dir, dataset.split, dataset.task);
    let words: Vec<Vec<String>> = read_json(&path)?;
    check_len(&path, &words, dataset.len())?;
    Ok(words)
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Rank `corpus` by how many lower-cased terms each entry shares with
/// `query`, most shared first. Ties keep corpus order.
pub fn overlap_rank(query: &str, corpus: &[String]) -> Vec<usize> {
    let query_terms = terms(query);
    let mut scored: Vec<(usize, usize)> = corpus
        .iter()
        .enumerate()
        .map(|(i, doc)| (i, terms(doc).intersection(&query_terms).count()))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(i, _)| i).collect()
}
