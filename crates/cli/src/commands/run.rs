//! `lampkit run`: run a LaMP experiment.

use clap::Args;
use lampkit_config::{ApiKeys, AppConfig};
use lampkit_context::KSpec;
use lampkit_experiment::{ApiHandleFactory, Method, RunSpec, Runner, Split, Task};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Task: 1, 2, 3, 4, 5, 7 or amazon
    #[arg(short, long)]
    pub dataset: Task,

    /// Dataset split
    #[arg(short, long, default_value = "dev")]
    pub split: Split,

    /// Examples per prompt: `<n|max>[_skip_<n>][_shuffle][_reverse]`, 0 for zero-shot
    #[arg(short, long)]
    pub k: KSpec,

    /// Retriever whose rankings to use (`overlap` is built in)
    #[arg(short, long, default_value = "overlap")]
    pub retriever: String,

    /// Comma-separated model names (defaults to `default_models` in the config)
    #[arg(long, value_delimiter = ',')]
    pub models: Vec<String>,

    /// Quantisation suffix appended to every model name
    #[arg(short, long)]
    pub quant: Option<String>,

    /// How the user's history enters the prompt: rag or cwmap
    #[arg(long, default_value = "rag")]
    pub method: Method,

    /// Seed for the shuffle modifier
    #[arg(long)]
    pub seed: Option<u64>,
}

pub async fn run(config: &AppConfig, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let models = if args.models.is_empty() {
        config.default_models.clone()
    } else {
        args.models
    };

    let spec = RunSpec {
        task: args.dataset,
        split: args.split,
        k: args.k,
        retriever: args.retriever,
        method: args.method,
        models,
        quant: args.quant,
        seed: args.seed,
    };

    let runner = Runner::new(
        config,
        config.registry()?,
        ApiHandleFactory::new(ApiKeys::from_env()),
    );
    let reports = runner.run(&spec).await?;

    println!();
    for report in reports {
        let status = if report.was_complete() { "already complete" } else { "done" };
        println!(
            "  {:<28} {:>6} new, {:>6} resumed  ({status})  {}",
            report.model,
            report.processed,
            report.resumed_from,
            report.checkpoint.display()
        );
    }
    Ok(())
}
