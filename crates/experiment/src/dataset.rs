//! LaMP datasets.
//!
//! Each task ships `<split>_questions.json`: an array of
//! `{id, input, profile: [...]}` items, where the profile is the user's
//! history and its field names depend on the task.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use lampkit_context::{ExampleFormat, ExamplePair};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ExperimentError, Result};

/// A benchmark task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Citation identification
    Lamp1,
    /// Movie tagging
    Lamp2,
    /// Product rating
    Lamp3,
    /// News headline generation
    Lamp4,
    /// Scholarly title generation
    Lamp5,
    /// Tweet paraphrasing
    Lamp7,
    /// Amazon review generation
    Amazon,
}

/// Which profile fields hold the example text and label, and how they are
/// named inside the examples block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileFields {
    pub text: &'static str,
    pub label: Option<&'static str>,
    pub text_name: &'static str,
    pub label_name: &'static str,
}

impl Task {
    pub const ALL: [Task; 7] = [
        Task::Lamp1,
        Task::Lamp2,
        Task::Lamp3,
        Task::Lamp4,
        Task::Lamp5,
        Task::Lamp7,
        Task::Amazon,
    ];

    /// The identifier used in file names (`"1"`, ..., `"amazon"`).
    pub fn id(&self) -> &'static str {
        match self {
            Task::Lamp1 => "1",
            Task::Lamp2 => "2",
            Task::Lamp3 => "3",
            Task::Lamp4 => "4",
            Task::Lamp5 => "5",
            Task::Lamp7 => "7",
            Task::Amazon => "amazon",
        }
    }

    /// Value of the checkpoint's `task` field.
    pub fn checkpoint_name(&self) -> String {
        match self {
            Task::Amazon => "amazon".into(),
            _ => format!("LaMP_{}", self.id()),
        }
    }

    /// Directory under `data_dir` holding this task's files.
    pub fn data_subdir(&self) -> String {
        self.checkpoint_name()
    }

    pub fn profile_fields(&self) -> ProfileFields {
        let (text, label, text_name, label_name) = match self {
            Task::Lamp1 => ("abstract", Some("title"), "abstract", "title"),
            Task::Lamp2 => ("description", Some("tag"), "description", "tag"),
            Task::Lamp3 => ("text", Some("score"), "review", "score"),
            Task::Lamp4 => ("text", Some("title"), "article", "title"),
            Task::Lamp5 => ("abstract", Some("title"), "abstract", "title"),
            Task::Lamp7 => ("text", None, "tweet", "tweet"),
            Task::Amazon => ("title", Some("text"), "product", "review"),
        };
        ProfileFields {
            text,
            label,
            text_name,
            label_name,
        }
    }

    pub fn example_format(&self) -> ExampleFormat {
        let fields = self.profile_fields();
        match fields.label {
            Some(_) => ExampleFormat::pair(fields.text_name, fields.label_name),
            None => ExampleFormat::text_only(fields.text_name),
        }
    }

    /// Citation identification retrieves by profile titles, everything
    /// else by profile texts.
    pub fn ranks_by_label(&self) -> bool {
        matches!(self, Task::Lamp1)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Task {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        let normalized = normalized.trim_start_matches("lamp_").trim_start_matches("lamp");
        Task::ALL
            .into_iter()
            .find(|t| t.id() == normalized)
            .ok_or_else(|| ExperimentError::UnknownTask(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "dev" | "val" | "validation" => Ok(Split::Dev),
            "test" => Ok(Split::Test),
            _ => Err(ExperimentError::UnknownSplit(s.to_string())),
        }
    }
}

/// One benchmark item.
#[derive(Debug, Clone, Deserialize)]
pub struct DataItem {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub input: String,
    #[serde(default)]
    pub profile: Vec<serde_json::Map<String, Value>>,
}

fn id_as_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(value_text(&Value::deserialize(deserializer)?))
}

/// A field's value as text; numbers and other scalars are stringified.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl DataItem {
    fn field(&self, index: usize, name: &str) -> Option<String> {
        self.profile.get(index)?.get(name).map(value_text)
    }

    /// Profile texts, in profile order.
    pub fn profile_texts(&self, fields: &ProfileFields) -> Vec<String> {
        (0..self.profile.len())
            .map(|i| self.field(i, fields.text).unwrap_or_default())
            .collect()
    }

    /// Profile labels; text-only tasks use the texts themselves.
    pub fn profile_labels(&self, fields: &ProfileFields) -> Vec<String> {
        match fields.label {
            Some(label) => (0..self.profile.len())
                .map(|i| self.field(i, label).unwrap_or_default())
                .collect(),
            None => self.profile_texts(fields),
        }
    }

    /// The profile entries at `indices`, as example pairs.
    /// Indices past the end of the profile are ignored.
    pub fn example_pairs(&self, fields: &ProfileFields, indices: &[usize]) -> Vec<ExamplePair> {
        let texts = self.profile_texts(fields);
        let labels = self.profile_labels(fields);
        indices
            .iter()
            .filter(|&&i| i < texts.len())
            .map(|&i| ExamplePair::new(texts[i].clone(), labels[i].clone()))
            .collect()
    }
}

/// A loaded task split.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub task: Task,
    pub split: Split,
    pub items: Vec<DataItem>,
}

impl Dataset {
    pub fn path(data_dir: &Path, task: Task, split: Split) -> PathBuf {
        data_dir
            .join(task.data_subdir())
            .join(format!("{split}_questions.json"))
    }

    pub fn load(data_dir: &Path, task: Task, split: Split) -> Result<Self> {
        let path = Self::path(data_dir, task, split);
        let content = std::fs::read_to_string(&path).map_err(|e| ExperimentError::Dataset {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let items: Vec<DataItem> =
            serde_json::from_str(&content).map_err(|e| ExperimentError::Dataset {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        tracing::info!(task = %task, split = %split, items = items.len(), "Dataset loaded");
        Ok(Self { task, split, items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
