//! Command-line arguments shared by the stage binaries.

use std::path::PathBuf;

use clap::Args;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::tiles::ProjectSelection;

/// Configuration file and project selection, flattened into every stage.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionArgs {
    /// Pipeline configuration JSON; defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Process only this project.
    #[arg(short, long)]
    pub project: Option<String>,

    /// Skip projects before this position in the tile definitions.
    #[arg(long, default_value_t = 0)]
    pub start: usize,

    /// Stop before this project position.
    #[arg(long)]
    pub end: Option<usize>,

    /// Worker shard `INDEX/COUNT`; each worker owns every COUNT-th project.
    #[arg(long, value_parser = ProjectSelection::parse_shard)]
    pub shard: Option<(usize, usize)>,
}

impl SelectionArgs {
    pub fn selection(&self) -> ProjectSelection {
        ProjectSelection {
            only: self.project.clone(),
            start: self.start,
            end: self.end,
            shard: self.shard,
        }
    }

    pub fn load_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::load(self.config.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Stage {
        #[command(flatten)]
        select: SelectionArgs,
    }

    #[test]
    fn flags_map_onto_a_selection() {
        let s = Stage::try_parse_from(["stage", "-p", "GMW-01", "--start", "2", "--shard", "1/3"]).unwrap();
        let sel = s.select.selection();
        assert_eq!(sel.only.as_deref(), Some("GMW-01"));
        assert_eq!((sel.start, sel.end, sel.shard), (2, None, Some((1, 3))));
    }

    #[test]
    fn bad_shard_is_rejected_by_the_parser() {
        assert!(Stage::try_parse_from(["stage", "--shard", "3/3"]).is_err());
        assert!(Stage::try_parse_from(["stage", "--shard", "x"]).is_err());
    }

    #[test]
    fn no_flags_select_everything() {
        let s = Stage::try_parse_from(["stage"]).unwrap();
        assert_eq!(s.select, SelectionArgs::default());
        assert_eq!(s.select.selection(), ProjectSelection::default());
    }
}
