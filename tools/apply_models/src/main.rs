//! Stage 6: submit per-tile classification jobs for every project whose
//! model has been trained. Projects with a model still in training are
//! reported as pending and picked up by a later run.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use mangrove_core::cli::SelectionArgs;
use mangrove_core::driver::{load_tiles, run_classification};
use mangrove_core::{FsMarkerStore, SpoolClient};

#[derive(Parser, Debug)]
#[command(name = "apply_models", about = "Submit per-tile classification jobs")]
struct Args {
    #[command(flatten)]
    select: SelectionArgs,

    /// Year to classify (overrides the configuration).
    #[arg(short, long)]
    year: Option<i32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut config = args.select.load_config().context("loading configuration")?;
    let index = load_tiles(&config)
        .with_context(|| format!("loading tile definitions from {}", config.layout.tiles_file.display()))?;
    if let Some(year) = args.year {
        config.classification.year = year;
    }
    log::info!("classifying {} for {}", config.classification.output_folder(), config.classification.year);
    let markers = FsMarkerStore::new(&config.layout.marker_dir);
    let client = SpoolClient::new(&config.layout.spool_dir);
    let summary = run_classification(&config, &index, &args.select.selection(), &markers, &client)?;
    summary.log();
    ensure!(summary.failed.is_empty(), "{} projects failed", summary.failed.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_override() {
        let args = Args::try_parse_from(["apply_models", "-y", "2010", "-p", "GMW-02"]).unwrap();
        assert_eq!(args.year, Some(2010));
        assert_eq!(args.select.project.as_deref(), Some("GMW-02"));
    }
}
