//! lampkit CLI.
//!
//! Commands:
//! - `run`    Run a LaMP experiment for one or more models
//! - `models` List the model registry
//! - `count`  Count tokens with a model's tokenizer
//! - `bfi`    Aggregate inferred Big-Five answers

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "lampkit",
    about = "LaMP personalization experiments across LLM backends",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.lampkit/config.toml)
    #[arg(short, long, global = true, env = "LAMPKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an experiment
    Run(commands::run::RunArgs),

    /// List registry models with their backend family and context length
    Models,

    /// Count tokens the way a model's backend does
    Count {
        /// Registry model name
        #[arg(short, long)]
        model: String,

        /// Text to count
        #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// File whose contents to count
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Aggregate inferred BFI answers into bfi_<tag>.json
    Bfi {
        /// Dataset tag the result files start with
        #[arg(long)]
        tag: String,

        /// Number of answers a complete file holds
        #[arg(long)]
        expected: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = lampkit_config::AppConfig::load(cli.config.as_deref())
        .map_err(|e| format!("Failed to load config: {e}"))?;

    match cli.command {
        Commands::Run(args) => commands::run::run(&config, args).await?,
        Commands::Models => commands::models::run(&config)?,
        Commands::Count { model, text, file } => {
            commands::count::run(&config, &model, text, file).await?
        }
        Commands::Bfi { tag, expected } => commands::bfi::run(&config, &tag, expected)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use lampkit_experiment::Method;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_arguments() {
        let cli = Cli::try_parse_from([
            "lampkit", "run", "--dataset", "3", "--split", "dev", "--k", "5_skip_1", "--models",
            "GPT-4o,CLAUDE-3-HAIKU", "--method", "cwmap", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.models, vec!["GPT-4o", "CLAUDE-3-HAIKU"]);
        assert_eq!(args.method, Method::CwMap);
        assert_eq!(args.retriever, "overlap");
    }

    #[test]
    fn count_needs_text_or_file() {
        assert!(Cli::try_parse_from(["lampkit", "count", "--model", "GPT-4o"]).is_err());
        assert!(
            Cli::try_parse_from(["lampkit", "count", "--model", "GPT-4o", "--text", "a", "--file", "f"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["lampkit", "count", "--model", "GPT-4o", "--text", "hi"]).is_ok());
    }

    #[test]
    fn global_config_flag() {
        let cli = Cli::try_parse_from(["lampkit", "models", "--config", "/tmp/c.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }
}
