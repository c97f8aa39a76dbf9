//! Stage 3: balance the three class subsets of each project, clip them to
//! every tile and submit one feature-extraction job per tile. Tiles with a
//! local result table or a submission marker are left alone.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use mangrove_core::cli::SelectionArgs;
use mangrove_core::driver::{load_tiles, run_extraction};
use mangrove_core::{FsMarkerStore, SpoolClient};

#[derive(Parser, Debug)]
#[command(name = "extract_samples", about = "Submit balanced per-tile sample extraction jobs")]
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
    let summary = run_extraction(&config, &index, &args.select.selection(), &markers, &client)?;
    summary.log();
    ensure!(summary.failed.is_empty(), "{} units failed", summary.failed.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_flag_is_parsed() {
        let args = Args::try_parse_from(["extract_samples", "--shard", "1/3", "-p", "GMW-01"]).unwrap();
        let s = args.select.selection();
        assert_eq!(s.shard, Some((1, 3)));
        assert_eq!(s.only.as_deref(), Some("GMW-01"));
        assert!(Args::try_parse_from(["extract_samples", "--shard", "3/3"]).is_err());
    }
}
