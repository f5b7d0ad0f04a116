//! End-to-end runs against a scripted backend and a whitespace counter.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lampkit_config::{AppConfig, ModelConfig, ModelRegistry};
use lampkit_core::params::GenParams;
use lampkit_core::provider::{Provider, ProviderRequest, ProviderResponse, TokenCounter};
use lampkit_core::ProviderError;
use lampkit_experiment::{
    Checkpoint, ExperimentError, HandleFactory, LogRecord, Method, RunSpec, Runner, Split, Task,
    checkpoint_path,
};
use lampkit_providers::ModelHandle;

const MODEL: &str = "TINY-GPT";

/// Answers from a fixed script; records every prompt it sees.
struct ScriptedProvider {
    answers: Vec<Result<String, ProviderError>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut prompts = self.prompts.lock().unwrap();
        let turn = prompts.len();
        prompts.push(request.messages[0].content.clone());
        let answer = self
            .answers
            .get(turn)
            .cloned()
            .unwrap_or_else(|| Ok("Score: 4".into()))?;
        Ok(ProviderResponse {
            content: answer,
            model: request.model,
            usage: None,
        })
    }
}

struct WhitespaceCounter;

#[async_trait]
impl TokenCounter for WhitespaceCounter {
    async fn count_text(&self, text: &str) -> Result<usize, ProviderError> {
        Ok(text.split_whitespace().count())
    }
}

#[derive(Default)]
struct ScriptedFactory {
    answers: Vec<Result<String, ProviderError>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl HandleFactory for ScriptedFactory {
    fn build(&self, config: ModelConfig, gen_params: GenParams) -> lampkit_experiment::Result<ModelHandle> {
        let provider = Arc::new(ScriptedProvider {
            answers: self.answers.clone(),
            prompts: self.prompts.clone(),
        });
        Ok(ModelHandle::from_parts(
            config,
            provider,
            Arc::new(WhitespaceCounter),
            Some(gen_params),
        ))
    }
}

fn registry() -> ModelRegistry {
    ModelRegistry::from_toml(
        r#"
        [models."TINY-GPT"]
        repo_id = "tiny"
        context_length = 400
        family = "openai"
        "#,
    )
    .unwrap()
}

fn config(root: &Path, checkpoint_every: usize) -> AppConfig {
    let mut config = AppConfig {
        data_dir: root.join("data"),
        output_dir: root.join("out"),
        log_dir: root.join("logs"),
        retrieval_dir: root.join("retrieval"),
        ..AppConfig::default()
    };
    config.experiment.checkpoint_every = checkpoint_every;
    config
}

fn write_dataset(root: &Path) {
    let dir = root.join("data").join("LaMP_3");
    std::fs::create_dir_all(&dir).unwrap();
    let items = serde_json::json!([
        {"id": "100", "input": "great battery life", "profile": [
            {"text": "terrible screen", "score": "1"},
            {"text": "battery lasts all day", "score": "5"},
            {"text": "decent value", "score": "3"}
        ]},
        {"id": "101", "input": "screen cracked quickly", "profile": [
            {"text": "screen is sharp", "score": "4"}
        ]},
        {"id": "102", "input": "fine", "profile": []}
    ]);
    std::fs::write(dir.join("dev_questions.json"), items.to_string()).unwrap();
}

fn spec(k: &str, method: Method) -> RunSpec {
    RunSpec {
        task: Task::Lamp3,
        split: Split::Dev,
        k: k.parse().unwrap(),
        retriever: "overlap".into(),
        method,
        models: vec![MODEL.into()],
        quant: None,
        seed: Some(7),
    }
}

fn load_checkpoint(root: &Path, k: &str, retriever: Option<&str>) -> Checkpoint {
    let path = checkpoint_path(&root.join("out"), "3", "dev", k, retriever, MODEL);
    Checkpoint::load_or_new(&path, "LaMP_3").unwrap()
}

#[tokio::test]
async fn rag_run_writes_checkpoint_and_log() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let factory = ScriptedFactory::default();
    let prompts = factory.prompts.clone();
    let runner = Runner::new(&config(dir.path(), 500), registry(), factory);

    let reports = runner.run(&spec("2", Method::Rag)).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].processed, 3);

    let checkpoint = load_checkpoint(dir.path(), "2", Some("overlap"));
    assert_eq!(checkpoint.task, "LaMP_3");
    let ids: Vec<_> = checkpoint.golds.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, ["100", "101", "102"]);
    assert!(checkpoint.golds.iter().all(|g| g.output == "4"));

    // the best-overlapping profile entry is packed first
    let prompts = prompts.lock().unwrap();
    let first = &prompts[0];
    let battery = first.find("battery lasts all day").unwrap();
    let terrible = first.find("terrible screen").unwrap();
    assert!(battery < terrible);
    assert!(first.contains("Review:\nbattery lasts all day\nScore:\n5\n"));
    assert!(!first.contains("decent value"));

    let log = std::fs::read_to_string(dir.path().join("logs").join("dev_3_TINY-GPT_K2_overlap.jsonl")).unwrap();
    let records: Vec<LogRecord> = log.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].output, "Score: 4");
    assert_eq!(records[0].formatted_output, "4");
    assert_eq!(&records[0].prompt, first);
}

#[tokio::test]
async fn resumes_and_skips_finished_models() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let path = checkpoint_path(&dir.path().join("out"), "3", "dev", "0", None, MODEL);
    let mut partial = Checkpoint::new("LaMP_3");
    partial.push("100", "2");
    partial.save(&path).unwrap();

    let runner = Runner::new(&config(dir.path(), 500), registry(), ScriptedFactory::default());
    let reports = runner.run(&spec("0", Method::Rag)).await.unwrap();
    assert_eq!(reports[0].resumed_from, 1);
    assert_eq!(reports[0].processed, 2);

    let checkpoint = load_checkpoint(dir.path(), "0", None);
    assert_eq!(checkpoint.len(), 3);
    assert_eq!(checkpoint.golds[0].output, "2");

    let runner = Runner::new(&config(dir.path(), 500), registry(), ScriptedFactory::default());
    let reports = runner.run(&spec("0", Method::Rag)).await.unwrap();
    assert!(reports[0].was_complete());
    assert_eq!(reports[0].resumed_from, 3);
}

#[tokio::test]
async fn zero_shot_renders_empty_examples() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let factory = ScriptedFactory::default();
    let prompts = factory.prompts.clone();
    let runner = Runner::new(&config(dir.path(), 500), registry(), factory);

    runner.run(&spec("0", Method::Rag)).await.unwrap();
    let prompts = prompts.lock().unwrap();
    assert!(prompts[0].contains("<EXAMPLES>\n\n</EXAMPLES>"));
    assert!(prompts[0].ends_with("Review:\ngreat battery life\nScore:"));
}

#[tokio::test]
async fn failure_keeps_saved_progress() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let factory = ScriptedFactory {
        answers: vec![
            Ok("3".into()),
            Err(ProviderError::Network("connection reset".into())),
        ],
        ..Default::default()
    };
    let runner = Runner::new(&config(dir.path(), 1), registry(), factory);

    let err = runner.run(&spec("1", Method::Rag)).await.unwrap_err();
    assert!(matches!(err, ExperimentError::Provider(ProviderError::Network(_))));

    let checkpoint = load_checkpoint(dir.path(), "1", Some("overlap"));
    assert_eq!(checkpoint.len(), 1);
    assert_eq!(checkpoint.golds[0].output, "3");
}

#[tokio::test]
async fn failure_saves_answers_between_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let factory = ScriptedFactory {
        answers: vec![
            Ok("Score: 5".into()),
            Ok("2".into()),
            Err(ProviderError::ApiError {
                status_code: 503,
                message: "overloaded".into(),
            }),
        ],
        ..Default::default()
    };
    let runner = Runner::new(&config(dir.path(), 500), registry(), factory);

    assert!(runner.run(&spec("0", Method::Rag)).await.is_err());

    let checkpoint = load_checkpoint(dir.path(), "0", None);
    let outputs: Vec<_> = checkpoint.golds.iter().map(|g| g.output.as_str()).collect();
    assert_eq!(outputs, ["5", "2"]);

    // the rerun only answers the remaining item, so the log holds each id once
    let runner = Runner::new(&config(dir.path(), 500), registry(), ScriptedFactory::default());
    let reports = runner.run(&spec("0", Method::Rag)).await.unwrap();
    assert_eq!(reports[0].resumed_from, 2);
    assert_eq!(reports[0].processed, 1);

    let log = std::fs::read_to_string(dir.path().join("logs").join("dev_3_TINY-GPT_K0.jsonl")).unwrap();
    let ids: Vec<String> = log
        .lines()
        .map(|l| serde_json::from_str::<LogRecord>(l).unwrap().id)
        .collect();
    assert_eq!(ids, ["100", "101", "102"]);
}

#[tokio::test]
async fn cwmap_fills_word_lists() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let retrieval = dir.path().join("retrieval");
    std::fs::create_dir_all(&retrieval).unwrap();
    std::fs::write(
        retrieval.join("dev_3_words.json"),
        r#"[["5", "4"], ["1"], []]"#,
    )
    .unwrap();
    let factory = ScriptedFactory::default();
    let prompts = factory.prompts.clone();
    let runner = Runner::new(&config(dir.path(), 500), registry(), factory);

    runner.run(&spec("max", Method::CwMap)).await.unwrap();
    let prompts = prompts.lock().unwrap();
    assert!(prompts[0].contains("least:\n5\n4\nLooking at the review"));
    assert!(prompts[1].contains("least:\n1\nLooking"));
}

#[tokio::test]
async fn unknown_model_fails_before_any_call() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    let runner = Runner::new(&config(dir.path(), 500), registry(), ScriptedFactory::default());
    let mut spec = spec("0", Method::Rag);
    spec.models = vec!["NOPE".into()];
    let err = runner.run(&spec).await.unwrap_err();
    assert!(matches!(err, ExperimentError::Config(_)));
}
