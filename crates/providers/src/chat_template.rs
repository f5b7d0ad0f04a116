//! Chat templates for the local pipeline.
//!
//! Local GGUF models take one flat string, so the turn list has to be
//! rendered in the markup the model was trained on.

use lampkit_core::message::{Message, Role, join_contents};

/// Chat template format used to structure messages for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<|im_start|>user\n{content}<|im_end|>\n<|im_start|>assistant\n`
    ChatML,
    /// `<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\n{content}<|eot_id|>`
    Llama3,
    /// `<s>[INST] {content} [/INST]`
    Mistral,
    /// `<start_of_turn>user\n{content}<end_of_turn>\n<start_of_turn>model\n`
    Gemma,
}

impl ChatTemplate {
    /// Template from a registry value (`"llama3"`, `"mistral"`, ...), falling
    /// back to the model's name family, then ChatML.
    pub fn resolve(configured: Option<&str>, model_name: &str) -> Self {
        if let Some(t) = configured.and_then(Self::parse) {
            return t;
        }
        let upper = model_name.to_uppercase();
        if upper.starts_with("LLAMA-3") {
            ChatTemplate::Llama3
        } else if upper.starts_with("MISTRAL") || upper.starts_with("MINISTRAL") {
            ChatTemplate::Mistral
        } else if upper.starts_with("GEMMA") {
            ChatTemplate::Gemma
        } else {
            ChatTemplate::ChatML
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "chatml" => Some(ChatTemplate::ChatML),
            "llama3" | "llama-3" => Some(ChatTemplate::Llama3),
            "mistral" => Some(ChatTemplate::Mistral),
            "gemma" => Some(ChatTemplate::Gemma),
            _ => None,
        }
    }

    /// Special tokens that end generation for this template.
    pub fn stop_tokens(&self) -> &'static [&'static str] {
        match self {
            ChatTemplate::ChatML => &["<|im_end|>", "<|endoftext|>"],
            ChatTemplate::Llama3 => &["<|eot_id|>", "<|end_of_text|>"],
            ChatTemplate::Mistral => &["</s>"],
            ChatTemplate::Gemma => &["<end_of_turn>", "<eos>"],
        }
    }

    /// Render the turns plus the opening of the assistant's reply.
    pub fn format(&self, messages: &[Message]) -> String {
        match self {
            ChatTemplate::ChatML => format_chatml(messages),
            ChatTemplate::Llama3 => format_llama3(messages),
            ChatTemplate::Mistral => format_mistral(messages),
            ChatTemplate::Gemma => format_gemma(messages),
        }
    }
}

/// Collapse a turn list into one user turn, contents newline-joined.
///
/// Mistral and Gemma templates reject a system turn or two user turns
/// in a row, which is exactly what a packed prompt looks like.
pub fn fold_turns(messages: &[Message]) -> Vec<Message> {
    if messages.len() <= 1 {
        return messages.to_vec();
    }
    vec![Message::user(join_contents(messages))]
}

fn format_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn format_llama3(messages: &[Message]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for msg in messages {
        prompt.push_str("<|start_header_id|>");
        prompt.push_str(msg.role.as_str());
        prompt.push_str("<|end_header_id|>\n\n");
        prompt.push_str(&msg.content);
        prompt.push_str("<|eot_id|>");
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

fn format_mistral(messages: &[Message]) -> String {
    let mut prompt = String::from("<s>");
    let mut pending_system = String::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                pending_system.push_str(&msg.content);
                pending_system.push_str("\n\n");
            }
            Role::User => {
                prompt.push_str("[INST] ");
                prompt.push_str(&pending_system);
                pending_system.clear();
                prompt.push_str(&msg.content);
                prompt.push_str(" [/INST]");
            }
            Role::Assistant => {
                prompt.push_str(&msg.content);
                prompt.push_str("</s>");
            }
        }
    }
    if !pending_system.is_empty() {
        prompt.push_str("[INST] ");
        prompt.push_str(pending_system.trim_end());
        prompt.push_str(" [/INST]");
    }
    prompt
}

fn format_gemma(messages: &[Message]) -> String {
    let mut prompt = String::from("<bos>");
    for msg in messages {
        let role = match msg.role {
            Role::Assistant => "model",
            Role::System | Role::User => "user",
        };
        prompt.push_str("<start_of_turn>");
        prompt.push_str(role);
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<end_of_turn>\n");
    }
    prompt.push_str("<start_of_turn>model\n");
    prompt
}
