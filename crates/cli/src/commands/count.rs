//! `lampkit count`: count tokens with a model's counter.

use std::path::PathBuf;

use lampkit_config::{ApiKeys, AppConfig};
use lampkit_core::TokenCounter;
use lampkit_providers::ModelHandle;

pub async fn run(
    config: &AppConfig,
    model: &str,
    text: Option<String>,
    file: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        (None, None) => return Err("pass --text or --file".into()),
    };

    let model_config = config.registry()?.get(model)?;
    let context_length = model_config.context_length;
    let handle = ModelHandle::build(model_config, &ApiKeys::from_env(), None)?;
    let tokens = handle.count_text(&text).await?;
    handle.release().await;

    println!("{tokens} tokens ({model}, context length {context_length})");
    Ok(())
}
