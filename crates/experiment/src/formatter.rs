//! Per-task cleanup of raw model answers.

use crate::dataset::Task;

/// Tags a movie-tagging answer may name.
pub const MOVIE_TAGS: [&str; 15] = [
    "sci-fi",
    "based on a book",
    "comedy",
    "action",
    "twist ending",
    "dystopia",
    "dark comedy",
    "classic",
    "psychology",
    "fantasy",
    "romance",
    "thought-provoking",
    "social commentary",
    "violence",
    "true story",
];

/// Leading labels a generation task's answer is often prefixed with.
const ANSWER_LABELS: [&str; 7] = [
    "paraphrased tweet",
    "tweet",
    "title",
    "review",
    "response",
    "answer",
    "output",
];

/// Turn a raw answer into the value stored in the checkpoint.
pub fn format_output(raw: &str, task: Task) -> String {
    let text = raw.trim();
    match task {
        Task::Lamp1 => text.to_string(),
        Task::Lamp2 => format_tag(text),
        Task::Lamp3 => format_score(text),
        Task::Lamp4 | Task::Lamp5 | Task::Lamp7 | Task::Amazon => strip_label(text),
    }
}

/// The known tag mentioned earliest; otherwise the lower-cased answer.
fn format_tag(text: &str) -> String {
    let lowered = text.to_lowercase();
    MOVIE_TAGS
        .iter()
        .filter_map(|tag| lowered.find(tag).map(|pos| (pos, *tag)))
        // at equal positions the longer tag wins ("dark comedy" over "dark")
        .min_by(|a, b| a.0.cmp(&b.0).then(b.1.len().cmp(&a.1.len())))
        .map(|(_, tag)| tag.to_string())
        .unwrap_or(lowered)
}

/// The first digit between 1 and 5; otherwise the trimmed answer.
fn format_score(text: &str) -> String {
    text.chars()
        .find(|c| ('1'..='5').contains(c))
        .map(String::from)
        .unwrap_or_else(|| text.to_string())
}

/// Drop a leading `Label:` and any quotes wrapping the rest.
fn strip_label(text: &str) -> String {
    let mut rest = text;
    if let Some((head, tail)) = text.split_once(':') {
        let head = head.trim().trim_matches('*').trim().to_lowercase();
        if ANSWER_LABELS.contains(&head.as_str()) {
            rest = tail.trim_start_matches(|c: char| c == '*' || c.is_whitespace());
        }
    }
    let rest = rest.trim();
    rest.trim_matches(|c| matches!(c, '"' | '\'' | '\u{201c}' | '\u{201d}'))
        .trim()
        .to_string()
}
