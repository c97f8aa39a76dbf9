//! Stage 1: clip the global reference samples into one subset per project.
//! Output: {project_dir}/{project}_refs_smps.{vector_ext} plus manifest.json

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use mangrove_core::driver::run_partition;
use mangrove_core::PipelineConfig;

#[derive(Parser, Debug)]
#[command(name = "partition", about = "Split the reference samples into per-project subsets")]
struct Args {
    /// Pipeline configuration JSON; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reference sample dataset (overrides the configuration).
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Project/tile definition dataset (overrides the configuration).
    #[arg(short, long)]
    tiles: Option<PathBuf>,

    /// Output directory (overrides the configuration).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref()).context("loading configuration")?;
        let l = &mut config.layout;
        if let Some(p) = &self.reference {
            l.reference_file = p.clone();
        }
        if let Some(p) = &self.tiles {
            l.tiles_file = p.clone();
        }
        if let Some(p) = &self.output {
            l.project_dir = p.clone();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.config()?;
    let summary = run_partition(&config)
        .with_context(|| format!("partitioning {}", config.layout.reference_file.display()))?;
    summary.log();
    ensure!(summary.failed.is_empty(), "{} projects failed", summary.failed.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_configured_paths() {
        let args = Args::try_parse_from(["partition", "-r", "ref.cols.gz", "-o", "out"]).unwrap();
        let c = args.config().unwrap();
        assert_eq!(c.layout.reference_file, PathBuf::from("ref.cols.gz"));
        assert_eq!(c.layout.project_dir, PathBuf::from("out"));
        assert_eq!(c.layout.tiles_file, PathBuf::from("gmw_tiles_prj_def.geojson"));
    }
}
