//! Stage 5: submit the training jobs of each project's classifier ensemble.
//! One submission marker per model; members already marked are not resent.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use mangrove_core::cli::SelectionArgs;
use mangrove_core::driver::{load_tiles, run_training};
use mangrove_core::{FsMarkerStore, SpoolClient};

#[derive(Parser, Debug)]
#[command(name = "train_models", about = "Submit ensemble model training jobs")]
struct Args {
    #[command(flatten)]
    select: SelectionArgs,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.select.load_config().context("loading configuration")?;
    let index = load_tiles(&config)
        .with_context(|| format!("loading tile definitions from {}", config.layout.tiles_file.display()))?;
    let markers = FsMarkerStore::new(&config.layout.marker_dir);
    let client = SpoolClient::new(&config.layout.spool_dir);
    let summary = run_training(&config, &index, &args.select.selection(), &markers, &client)?;
    summary.log();
    ensure!(summary.failed.is_empty(), "{} projects failed", summary.failed.len());
    Ok(())
}
