//! Stage 2: split every project subset by reference class.
//! Default output: {class_dir}/{project_stem}_{class}.{vector_ext}
//! With --multi-layer: one layer per project and class inside --container.

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use mangrove_core::cli::SelectionArgs;
use mangrove_core::driver::{load_tiles, run_split};
use mangrove_core::split::OutputMode;
use mangrove_core::PipelineConfig;

#[derive(Parser, Debug)]
#[command(name = "split_classes", about = "Split project reference subsets by class")]
struct Args {
    #[command(flatten)]
    select: SelectionArgs,

    /// Write every class subset as a named layer of one container file.
    #[arg(long)]
    multi_layer: bool,

    /// Container file for --multi-layer (GeoJSON).
    #[arg(long)]
    container: Option<PathBuf>,

    /// Directory for file-per-class output (default: configured class_dir).
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Extension for file-per-class output (default: configured vector_ext).
    #[arg(long)]
    ext: Option<String>,

    /// Dissolve each class into a single multi-geometry feature.
    #[arg(long)]
    dissolve: bool,
}

impl Args {
    /// Resolve the output mode. File-per-class output falls back to the
    /// configured layout; container output takes no directory or extension.
    fn output_mode(&self, config: &PipelineConfig) -> Result<OutputMode> {
        let l = &config.layout;
        let (dir, ext) = if self.multi_layer {
            (self.out_dir.clone(), self.ext.clone())
        } else {
            (
                Some(self.out_dir.clone().unwrap_or_else(|| l.class_dir.clone())),
                Some(self.ext.clone().unwrap_or_else(|| l.vector_ext.clone())),
            )
        };
        let mode = OutputMode::from_flags(self.multi_layer, self.container.clone(), dir, ext)?;
        mode.validate()?;
        Ok(mode)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.select.load_config().context("loading configuration")?;
    let mode = args.output_mode(&config).context("choosing the output mode")?;
    let index = load_tiles(&config)
        .with_context(|| format!("loading tile definitions from {}", config.layout.tiles_file.display()))?;
    let summary = run_split(&config, &index, &args.select.selection(), &mode, args.dissolve)?;
    summary.log();
    ensure!(summary.failed.is_empty(), "{} projects failed", summary.failed.len());
    Ok(())
}
