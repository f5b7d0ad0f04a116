//! Per-experiment JSONL log: one record per processed item.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub prompt: String,
    pub output: String,
    pub formatted_output: String,
    /// Wall time of the inference call, in seconds
    pub model_inf_time: f64,
    pub logged_at: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(
        id: impl Into<String>,
        prompt: impl Into<String>,
        output: impl Into<String>,
        formatted_output: impl Into<String>,
        inference_secs: f64,
    ) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            output: output.into(),
            formatted_output: formatted_output.into(),
            model_inf_time: (inference_secs * 100.0).round() / 100.0,
            logged_at: Utc::now(),
        }
    }
}

/// `<split>_<task>_<model>_K<k>[_<retriever>]`
pub fn experiment_name(
    split: &str,
    task: &str,
    model: &str,
    k: &str,
    retriever: Option<&str>,
) -> String {
    match retriever {
        Some(r) => format!("{split}_{task}_{model}_K{k}_{r}"),
        None => format!("{split}_{task}_{model}_K{k}"),
    }
}

/// Append-only writer for one experiment's log file.
pub struct ExperimentLog {
    path: PathBuf,
    file: File,
}

impl ExperimentLog {
    /// Open `<log_dir>/<name>.jsonl` for appending, creating it if needed.
    pub fn open(log_dir: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{name}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        Ok(())
    }
}
