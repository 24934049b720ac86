use anyhow::{Context, Result};
use log::LevelFilter;
use softcascade::app::{load_config, run_detection};
use softcascade::logger;
use std::path::PathBuf;

fn main() -> Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: softcascade <config.json>")?;
    let cfg = load_config(&path)?;

    let level = match cfg.log_level.as_deref() {
        Some(s) => s
            .parse::<LevelFilter>()
            .with_context(|| format!("invalid log level '{s}'"))?,
        None => LevelFilter::Info,
    };
    logger::init_with_level(level)?;

    let dump = run_detection(cfg)?;
    log::info!(
        "{} detections over {} levels",
        dump.detections.len(),
        dump.levels
    );
    Ok(())
}
