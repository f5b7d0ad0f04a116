//! The experiment loop.
//!
//! For each model: resume from its checkpoint, build a handle, then for
//! every remaining item assemble a prompt, call the model, format the
//! answer, log it and append it to the checkpoint. Items are processed one
//! at a time and the handle is released before the next model starts.

use std::path::{Path, PathBuf};
use std::time::Instant;

use lampkit_config::{ApiKeys, AppConfig, ExperimentConfig, ModelConfig, ModelRegistry};
use lampkit_context::{
    ContextBudget, HistoryTruncator, KSpec, PackOutcome, pack_examples, prepare_context,
};
use lampkit_core::message::Message;
use lampkit_core::params::{GenParams, MaxTokensKey};
use lampkit_providers::ModelHandle;
use tracing::{info, warn};

use crate::checkpoint::{Checkpoint, checkpoint_path};
use crate::dataset::{DataItem, Dataset, Split, Task};
use crate::error::{ExperimentError, Result};
use crate::exp_log::{ExperimentLog, LogRecord, experiment_name};
use crate::formatter::format_output;
use crate::prompts::{Method, PromptTemplate};
use crate::retrieval::{Rankings, load_word_lists, rank_all};

/// One `run` invocation.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub task: Task,
    pub split: Split,
    pub k: KSpec,
    pub retriever: String,
    pub method: Method,
    pub models: Vec<String>,
    /// Appended as `-<quant>` to every model name before lookup
    pub quant: Option<String>,
    /// Overrides `experiment.seed`
    pub seed: Option<u64>,
}

impl RunSpec {
    /// Retrieval is skipped entirely for zero-shot runs.
    pub fn retriever(&self) -> Option<&str> {
        (!self.k.is_zero_shot()).then_some(self.retriever.as_str())
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models
            .iter()
            .map(|m| match &self.quant {
                Some(q) => format!("{m}-{q}"),
                None => m.clone(),
            })
            .collect()
    }
}

/// Builds the handle for one model's loop.
pub trait HandleFactory: Send + Sync {
    fn build(&self, config: ModelConfig, gen_params: GenParams) -> Result<ModelHandle>;
}

/// Builds real backends, reading API keys once up front.
pub struct ApiHandleFactory {
    keys: ApiKeys,
}

impl ApiHandleFactory {
    pub fn new(keys: ApiKeys) -> Self {
        Self { keys }
    }
}

impl HandleFactory for ApiHandleFactory {
    fn build(&self, config: ModelConfig, gen_params: GenParams) -> Result<ModelHandle> {
        Ok(ModelHandle::build(config, &self.keys, Some(gen_params))?)
    }
}

/// What happened to one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReport {
    pub model: String,
    /// Items answered in this run
    pub processed: usize,
    /// Items already in the checkpoint before this run
    pub resumed_from: usize,
    pub checkpoint: PathBuf,
}

impl ModelReport {
    pub fn was_complete(&self) -> bool {
        self.processed == 0
    }
}

/// Per-query inputs computed once for the whole dataset.
enum Context {
    ZeroShot,
    Examples(Rankings),
    Words(Vec<Vec<String>>),
}

pub struct Runner<F> {
    data_dir: PathBuf,
    output_dir: PathBuf,
    log_dir: PathBuf,
    retrieval_dir: PathBuf,
    settings: ExperimentConfig,
    registry: ModelRegistry,
    factory: F,
}

impl<F: HandleFactory> Runner<F> {
    pub fn new(config: &AppConfig, registry: ModelRegistry, factory: F) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            output_dir: config.output_dir.clone(),
            log_dir: config.log_dir.clone(),
            retrieval_dir: config.retrieval_dir.clone(),
            settings: config.experiment.clone(),
            registry,
            factory,
        }
    }

    /// Run every model of `spec` in turn.
    pub async fn run(&self, spec: &RunSpec) -> Result<Vec<ModelReport>> {
        let dataset = Dataset::load(&self.data_dir, spec.task, spec.split)?;
        info!(
            task = %spec.task,
            split = %spec.split,
            k = %spec.k,
            retriever = spec.retriever().unwrap_or("-"),
            method = %spec.method,
            "Starting experiment"
        );

        let context = if spec.k.is_zero_shot() {
            Context::ZeroShot
        } else {
            match spec.method {
                Method::Rag => Context::Examples(rank_all(&self.retrieval_dir, &dataset, &spec.retriever)?),
                Method::CwMap => Context::Words(load_word_lists(&self.retrieval_dir, &dataset)?),
            }
        };

        let mut reports = Vec::new();
        for model in spec.model_names() {
            reports.push(self.run_model(spec, &dataset, &context, &model).await?);
        }
        Ok(reports)
    }

    async fn run_model(
        &self,
        spec: &RunSpec,
        dataset: &Dataset,
        context: &Context,
        model: &str,
    ) -> Result<ModelReport> {
        let k_label = spec.k.to_string();
        let path = checkpoint_path(
            &self.output_dir,
            spec.task.id(),
            spec.split.as_str(),
            &k_label,
            spec.retriever(),
            model,
        );
        let mut checkpoint = Checkpoint::load_or_new(&path, &spec.task.checkpoint_name())?;
        let resumed_from = checkpoint.len();

        if resumed_from > dataset.len() {
            return Err(ExperimentError::Checkpoint {
                path,
                reason: format!("{resumed_from} results for {} items", dataset.len()),
            });
        }
        if resumed_from == dataset.len() {
            info!(model, "Experiment for this model is already concluded");
            return Ok(ModelReport {
                model: model.to_string(),
                processed: 0,
                resumed_from,
                checkpoint: path,
            });
        }

        let config = self.registry.get(model)?;
        let gen_params =
            GenParams::with_max_tokens(MaxTokensKey::MaxNewTokens, self.settings.max_new_tokens);
        let handle = self.factory.build(config, gen_params)?;

        let name = experiment_name(spec.split.as_str(), spec.task.id(), model, &k_label, spec.retriever());
        let mut log = ExperimentLog::open(&self.log_dir, &name)?;

        info!(model, start = resumed_from, total = dataset.len(), "Starting from sample");
        let started = Instant::now();
        let outcome = self
            .process_items(spec, dataset, context, &handle, &mut checkpoint, &mut log, &path)
            .await;
        let hours = started.elapsed().as_secs_f64() / 3600.0;
        handle.release().await;

        let processed = outcome?;
        info!(model, processed, hours, "Model finished");
        Ok(ModelReport {
            model: model.to_string(),
            processed,
            resumed_from,
            checkpoint: path,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_items(
        &self,
        spec: &RunSpec,
        dataset: &Dataset,
        context: &Context,
        handle: &ModelHandle,
        checkpoint: &mut Checkpoint,
        log: &mut ExperimentLog,
        path: &Path,
    ) -> Result<usize> {
        let template = PromptTemplate::for_task(spec.task, spec.method);
        let budget = ContextBudget::new(handle.context_length(), handle.reserved_generation_tokens());
        let seed = spec.seed.or(self.settings.seed);
        let last = dataset.len() - 1;
        let mut saved = checkpoint.len();
        let mut processed = 0;

        for index in checkpoint.len()..dataset.len() {
            let item = &dataset.items[index];
            let answered = self
                .answer_item(
                    spec, &template, &budget, context, handle, item, index, seed, checkpoint, log,
                )
                .await;
            if let Err(e) = answered {
                // answers since the last save are already in the log
                if checkpoint.len() > saved {
                    warn!(model = handle.name(), item = index, error = %e, "Saving progress before failing");
                    checkpoint.save(path)?;
                }
                return Err(e);
            }
            processed += 1;

            if processed % self.settings.checkpoint_every == 0 || index == last {
                info!(model = handle.name(), item = index, "Saving progress");
                checkpoint.save(path)?;
                saved = checkpoint.len();
            }
        }
        Ok(processed)
    }

    /// Prompt the model for one item and record the answer.
    #[allow(clippy::too_many_arguments)]
    async fn answer_item(
        &self,
        spec: &RunSpec,
        template: &PromptTemplate,
        budget: &ContextBudget,
        context: &Context,
        handle: &ModelHandle,
        item: &DataItem,
        index: usize,
        seed: Option<u64>,
        checkpoint: &mut Checkpoint,
        log: &mut ExperimentLog,
    ) -> Result<()> {
        let prompt = self
            .build_prompt(spec, template, budget, context, handle, item, index, seed)
            .await?;
        let prompt_text = prompt
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let started = Instant::now();
        let raw = handle.prompt(prompt, None).await?;
        let secs = started.elapsed().as_secs_f64();

        let formatted = format_output(&raw, spec.task);
        checkpoint.push(item.id.clone(), formatted.clone());
        log.append(&LogRecord::new(item.id.clone(), prompt_text, raw, formatted, secs))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_prompt(
        &self,
        spec: &RunSpec,
        template: &PromptTemplate,
        budget: &ContextBudget,
        context: &Context,
        handle: &ModelHandle,
        item: &DataItem,
        index: usize,
        seed: Option<u64>,
    ) -> Result<Vec<Message>> {
        let query = item.input.as_str();
        let item_seed = seed.map(|s| s.wrapping_add(index as u64));

        match context {
            Context::ZeroShot => Ok(template.render(query, "")),
            Context::Examples(rankings) => {
                let ranked = rankings.get(index).map(Vec::as_slice).unwrap_or_default();
                let fields = spec.task.profile_fields();
                let mut pairs = item.example_pairs(&fields, &spec.k.select(ranked));
                spec.k.reorder(&mut pairs, item_seed);

                let outcome = pack_examples(
                    handle,
                    budget,
                    &pairs,
                    &spec.task.example_format(),
                    query,
                    |block| template.render(query, block),
                )
                .await?;
                if outcome == PackOutcome::InsufficientSpace {
                    warn!(model = handle.name(), item = index, "No space for examples, prompting zero-shot");
                }
                Ok(template.render(query, outcome.block_or_empty()))
            }
            Context::Words(lists) => {
                let words = lists.get(index).map(Vec::as_slice).unwrap_or_default();
                let words = spec.k.apply(words, item_seed);
                let fitted = prepare_context(
                    handle,
                    budget,
                    &HistoryTruncator::new(self.settings.history_fraction, self.settings.min_retained_turns),
                    &template.render_words(query, ""),
                    Vec::new(),
                    &words,
                    None,
                )
                .await?;
                let text = match fitted {
                    Some(fitted) => fitted.text,
                    None => {
                        warn!(model = handle.name(), item = index, "No space for the word list");
                        String::new()
                    }
                };
                Ok(template.render_words(query, &text))
            }
        }
    }
}
