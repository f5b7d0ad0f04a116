//! Resumable result files.
//!
//! A checkpoint is `{"task": "LaMP_<n>", "golds": [{"id", "output"}, ...]}`.
//! The runner resumes from `golds.len()` and rewrites the whole file
//! periodically. Writes go to a sibling temp file that is then renamed
//! over the checkpoint, so a crash mid-write leaves the previous one intact.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ExperimentError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gold {
    pub id: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task: String,
    #[serde(default)]
    pub golds: Vec<Gold>,
}

impl Checkpoint {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            golds: Vec::new(),
        }
    }

    /// Load `path`, or start an empty checkpoint for `task` if it is absent.
    pub fn load_or_new(path: &Path, task: &str) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(task));
        }
        let content = std::fs::read_to_string(path).map_err(|e| ExperimentError::Checkpoint {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let checkpoint: Self =
            serde_json::from_str(&content).map_err(|e| ExperimentError::Checkpoint {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if checkpoint.task != task {
            return Err(ExperimentError::Checkpoint {
                path: path.to_path_buf(),
                reason: format!("holds task {}, expected {task}", checkpoint.task),
            });
        }
        debug!(path = %path.display(), done = checkpoint.golds.len(), "Checkpoint loaded");
        Ok(checkpoint)
    }

    pub fn len(&self) -> usize {
        self.golds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.golds.is_empty()
    }

    pub fn push(&mut self, id: impl Into<String>, output: impl Into<String>) {
        self.golds.push(Gold {
            id: id.into(),
            output: output.into(),
        });
    }

    /// Rewrite the file at `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(self)?)?;
        std::fs::rename(&tmp, path)?;
        info!(path = %path.display(), done = self.golds.len(), "Checkpoint written");
        Ok(())
    }
}

/// `<output_dir>/D<task>/<split>/K<k>[/<retriever>]/<model>.json`
pub fn checkpoint_path(
    output_dir: &Path,
    task: &str,
    split: &str,
    k: &str,
    retriever: Option<&str>,
    model: &str,
) -> PathBuf {
    let mut dir = output_dir
        .join(format!("D{task}"))
        .join(split)
        .join(format!("K{k}"));
    if let Some(retriever) = retriever {
        dir = dir.join(retriever);
    }
    dir.join(format!("{model}.json"))
}
