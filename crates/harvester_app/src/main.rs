mod config;
mod platform;

use std::path::PathBuf;

use engine_logging::engine_info;

fn main() -> anyhow::Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));
    let config = config::load(&path)?;
    platform::logging::initialize(config.log_destination, config.log_level(), &config.log_file);
    engine_info!("Loaded configuration from {}", path.display());

    let summary = platform::run_app(&config)?;
    println!(
        "Harvested {} items ({} deleted) in {} requests; {} translated, {} failed, {} skipped",
        summary.entries_stored,
        summary.entries_deleted,
        summary.requests,
        summary.translation.succeeded,
        summary.translation.failed,
        summary.translation.skipped
    );
    Ok(())
}
