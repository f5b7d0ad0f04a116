//! `lampkit bfi`: aggregate inferred Big-Five answers.

use lampkit_config::AppConfig;
use lampkit_experiment::aggregate_bfi;

pub fn run(config: &AppConfig, tag: &str, expected: usize) -> Result<(), Box<dyn std::error::Error>> {
    let out_file = config.bfi_out_dir.join(format!("bfi_{tag}.json"));
    let summary = aggregate_bfi(&config.bfi_dir, tag, expected, &out_file)?;

    println!(
        "{} added, {} already aggregated, {} skipped (wrong length) -> {}",
        summary.added,
        summary.already_done,
        summary.wrong_length,
        out_file.display()
    );
    Ok(())
}
