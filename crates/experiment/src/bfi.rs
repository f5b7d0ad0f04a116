//! Big-Five Inventory (BFI) result aggregation.
//!
//! Inferred BFI answers live as `<tag>_..._<a>_<b>.json` files, each a JSON
//! array of raw model answers. Aggregation parses the five trait scores
//! out of every answer and collects them in `bfi_<tag>.json`, keyed by file
//! stem, so later runs only process new files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

pub const TRAITS: [&str; 5] = [
    "openness",
    "conscientiousness",
    "extraversion",
    "agreeableness",
    "neuroticism",
];

static SCORE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(openness|conscientiousness|extraversion|agreeableness|neuroticism)\b[^0-9\n]{0,20}(\d+(?:\.\d+)?)",
    )
    .ok()
});

/// Trait scores found in `text`. The first score given for a trait wins;
/// traits without a score are absent.
pub fn extract_bfi_scores(text: &str) -> BTreeMap<String, f64> {
    let mut scores = BTreeMap::new();
    let Some(re) = SCORE.as_ref() else {
        return scores;
    };
    for caps in re.captures_iter(text) {
        let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if let Ok(value) = value.as_str().parse::<f64>() {
            scores.entry(name.as_str().to_lowercase()).or_insert(value);
        }
    }
    scores
}

/// What a result file's name says about the run that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BfiParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retriever: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    pub bfi_model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BfiResult {
    pub params: BfiParams,
    pub bfi: Vec<BTreeMap<String, f64>>,
}

/// Parse a file stem of the form `<tag>_<model>_<retriever>_K<k>_<bfi_model>_<a>_<b>`
/// or `<tag>_UP_<a>_<b>`. The trailing two components are ignored.
pub fn parse_result_name(stem: &str, tag: &str) -> BfiParams {
    let parts: Vec<&str> = stem.split('_').collect();
    let processed = parts[..parts.len().saturating_sub(2)].join("_");
    let bfi_model = processed.rsplit('_').next().unwrap_or_default().to_string();

    if processed == format!("{tag}_UP") {
        return BfiParams {
            bfi_model,
            ..Default::default()
        };
    }

    let rest = processed
        .strip_prefix(tag)
        .map(|r| r.trim_start_matches('_'))
        .unwrap_or(&processed);
    let fields: Vec<&str> = rest.split('_').collect();
    if fields.len() < 4 {
        warn!(stem, "Unrecognised BFI result name");
        return BfiParams {
            bfi_model,
            ..Default::default()
        };
    }

    let k = fields[2..fields.len() - 1].join("_");
    BfiParams {
        model: Some(fields[0].to_string()),
        retriever: Some(fields[1].to_string()),
        k: Some(k.strip_prefix('K').unwrap_or(&k).to_string()),
        bfi_model,
    }
}

/// Counts from one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateSummary {
    pub added: usize,
    pub already_done: usize,
    pub wrong_length: usize,
}

/// Aggregate every `<tag>*.json` file in `bfi_dir` into `out_file`.
///
/// Files already present in `out_file` are skipped, as are files whose
/// answer count differs from `expected_len`. The output is rewritten after
/// each new file.
pub fn aggregate_bfi(
    bfi_dir: &Path,
    tag: &str,
    expected_len: usize,
    out_file: &Path,
) -> Result<AggregateSummary> {
    let mut results: BTreeMap<String, BfiResult> = if out_file.exists() {
        serde_json::from_str(&std::fs::read_to_string(out_file)?)?
    } else {
        BTreeMap::new()
    };
    if let Some(parent) = out_file.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut files: Vec<_> = std::fs::read_dir(bfi_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(tag))
        })
        .collect();
    files.sort();

    let mut summary = AggregateSummary::default();
    for path in files {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        if results.contains_key(&stem) {
            info!(file = %stem, "BFI results already aggregated");
            summary.already_done += 1;
            continue;
        }

        let answers: Vec<String> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        if answers.len() != expected_len {
            warn!(file = %stem, answers = answers.len(), expected = expected_len, "Skipping incomplete BFI file");
            summary.wrong_length += 1;
            continue;
        }

        let params = parse_result_name(&stem, tag);
        let bfi = answers.iter().map(|a| extract_bfi_scores(a)).collect();
        results.insert(stem, BfiResult { params, bfi });
        std::fs::write(out_file, serde_json::to_string(&results)?)?;
        summary.added += 1;
    }

    info!(
        added = summary.added,
        already_done = summary.already_done,
        wrong_length = summary.wrong_length,
        "BFI aggregation finished"
    );
    Ok(summary)
}
