//! Prompt templates.
//!
//! RAG templates carry `{examples}` and `{query}`; CWMap templates carry
//! `{words}` and `{query}`. Every template renders to a single user turn.

use std::fmt;
use std::str::FromStr;

use lampkit_core::message::Message;

use crate::dataset::Task;

/// How the user's history enters the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Retrieved examples packed into the prompt.
    #[default]
    Rag,
    /// A list of characteristic words fitted into the prompt.
    CwMap,
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rag" => Ok(Method::Rag),
            "cwmap" | "cw" => Ok(Method::CwMap),
            other => Err(format!("unknown method '{other}' (expected rag or cwmap)")),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Rag => "rag",
            Method::CwMap => "cwmap",
        })
    }
}

const TAG_LIST: &str = "[sci-fi, based on a book, comedy, action, twist ending, dystopia, dark comedy, classic, psychology, fantasy, romance, thought-provoking, social commentary, violence, true story]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: &str) -> Self {
        Self {
            text: strip_lines(text),
        }
    }

    pub fn for_task(task: Task, method: Method) -> Self {
        let text = match (method, task) {
            (Method::Rag, Task::Lamp1) => "Here are a couple of abstract-title pairs of a scholar.
                <EXAMPLES>
                {examples}
                </EXAMPLES>
                With the given examples, complete the following task. Only output the response of the task and nothing else.
                Task:
                {query}
                ",
            (Method::Rag, Task::Lamp2) => &format!(
                "Here are a couple of movie description-tag pairs created by a user.
                <EXAMPLES>
                {{examples}}
                </EXAMPLES>
                With the given examples, choose the correct category tag for the following movie description by the same user between these tags:
                {TAG_LIST}
                Only output the tag and nothing else.
                Description:
                {{query}}
                Tag:"
            ),
            (Method::Rag, Task::Lamp3) => "Here are a couple of review-rating pairs of a user.
                <EXAMPLES>
                {examples}
                </EXAMPLES>
                With the given examples, give a score between [1, 2, 3, 4, 5] to the following review by the same user. Only output the score and nothing else.
                Review:
                {query}
                Score:",
            (Method::Rag, Task::Lamp4) => "Here are a couple of article-title pairs of a user.
                <EXAMPLES>
                {examples}
                </EXAMPLES>
                With the given examples, generate a title for the given article by the same author. Only output the title and nothing else.
                Article:
                {query}
                Title:",
            (Method::Rag, Task::Lamp5) => "Here are a couple of abstract-title pairs of a scholar:
                <EXAMPLES>
                {examples}
                </EXAMPLES>
                With the given examples, generate a title for the given abstract by the same author. Only output the title and nothing else.
                Abstract:
                {query}
                Title:",
            (Method::Rag, Task::Lamp7) => "Here are a couple of tweets of a person:
                <EXAMPLES>
                {examples}
                </EXAMPLES>
                With the given examples, paraphrase the given tweet by the same person. Only output the tweet and nothing else.
                Tweet:
                {query}
                Paraphrased Tweet:",
            (Method::Rag, Task::Amazon) => "Here are a couple of product reviews of an Amazon customer:
                <EXAMPLES>
                {examples}
                </EXAMPLES>
                With the given examples, generate a review for the given product purchased by the customer. Only output the review and nothing else.
                Product Name:
                {query}
                Review:",
            (Method::CwMap, Task::Lamp1) => "Here is a list of words that a scholar uses frequently:
                {words}
                Looking at the words the scholar uses, complete the following task. You can use other words besides the ones listed, but give priority to them. Only output the response of the task and nothing else.
                Task:
                {query}
                Response:",
            (Method::CwMap, Task::Lamp2) => &format!(
                "Here is a movie description:
                {{query}}
                Derived from the previous description-tag pairs of the user, here is the list of tags that are most suitable for the description sorted from the most suitable to the least:
                {{words}}
                Looking at the description and user's previous interactions, choose the correct category tag for the description between these tags:
                {TAG_LIST}
                Only output the tag and nothing else.
                Tag:"
            ),
            (Method::CwMap, Task::Lamp3) => "Here is a review:
                {query}
                Derived from the previous review-score pairs of the user, here is the list of scores that are most suitable for the description sorted from the most suitable to the least:
                {words}
                Looking at the review and user's previous interactions, give a score between [1, 2, 3, 4, 5] to the review. Only output the score and nothing else.
                Score:",
            (Method::CwMap, Task::Lamp4) => "Here is a list of words that an author frequently uses in their articles:
                {words}
                Looking at these words, generate a title for the given article. You can use other words besides the ones listed, but give priority to them. Only output the title and nothing else.
                Article:
                {query}
                Title:",
            (Method::CwMap, Task::Lamp5) => "Here is a list of words that an author uses frequently:
                {words}
                Here is an abstract from the author:
                {query}
                Looking at the words the author uses, generate a title for the abstract. You can use other words besides the ones listed, but give priority to them. Only output the title and nothing else.
                Title:",
            (Method::CwMap, Task::Lamp7) => "Here is a list of words that a person frequently uses in their tweets:
                {words}
                Looking at these words, paraphrase the given tweet. You can use other words besides the ones listed, but give priority to them. Only output the paraphrased tweet and nothing else.
                Tweet:
                {query}
                Paraphrased Tweet:",
            (Method::CwMap, Task::Amazon) => "Here is a list of words an Amazon customer uses frequently:
                {words}
                Looking at the words, generate a review for the given product purchased by the customer. You can use other words besides the ones listed, but give priority to them. Only output the review and nothing else.
                Product:
                {query}
                Review:",
        };
        Self::new(text)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Render with an examples block (RAG, or zero-shot with `""`).
    pub fn render(&self, query: &str, examples: &str) -> Vec<Message> {
        vec![Message::user(fill(
            &self.text,
            &[("query", query), ("examples", examples)],
        ))]
    }

    /// Render with a word list (CWMap).
    pub fn render_words(&self, query: &str, words: &str) -> Vec<Message> {
        vec![Message::user(fill(&self.text, &[("query", query), ("words", words)]))]
    }
}

/// Trim every line.
fn strip_lines(text: &str) -> String {
    text.lines().map(str::trim).collect::<Vec<_>>().join("\n")
}

/// Substitute `{name}` placeholders in one pass, so braces inside the
/// substituted values are never expanded.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
