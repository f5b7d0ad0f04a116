//! `lampkit models`: list the model registry.

use lampkit_config::AppConfig;

pub fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = config.registry()?;

    println!("Model registry ({} entries)", registry.len());
    println!();
    println!(
        "  {:<28} {:<11} {:<22} {:<18} {:>9}",
        "Name", "Family", "Dispatch", "Max-tokens key", "Context"
    );
    for name in registry.names() {
        let model = registry.get(name)?;
        println!(
            "  {:<28} {:<11} {:<22} {:<18} {:>9}",
            model.name,
            model.family.as_str(),
            format!("{:?}", model.dispatch_style()),
            model.canonical_key().as_str(),
            model.context_length
        );
    }
    Ok(())
}
