//! Stage 4: merge the extracted tile tables of each project into one
//! training table, capped by reproducible subsampling. Projects with a
//! submitted extraction whose table has not arrived are left for a later run.
//! Output: {training_dir}/{project}_train_smpls.{table_ext}

use anyhow::{ensure, Context, Result};
use clap::Parser;
use mangrove_core::cli::SelectionArgs;
use mangrove_core::driver::{load_tiles, run_assembly};
use mangrove_core::FsMarkerStore;

#[derive(Parser, Debug)]
#[command(name = "merge_samples", about = "Merge per-tile sample tables into project training tables")]
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
    let summary = run_assembly(&config, &index, &args.select.selection(), &markers)?;
    summary.log();
    ensure!(summary.failed.is_empty(), "{} projects failed", summary.failed.len());
    Ok(())
}
