//! Merging a project's per-tile extraction tables into one training table.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SamplingConfig;
use crate::error::Result;
use crate::sampling::sample_indices;
use crate::table::SampleTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleOutcome {
    /// The training table already exists; nothing was read.
    AlreadyPresent,
    /// No tile table passed the size check.
    NoTables,
    Written { tables: usize, rows: usize, kept: usize },
}

#[derive(Debug, Clone)]
pub struct TrainingSetAssembler {
    pub cap: usize,
    pub seed: u64,
    /// Tables of this many bytes or fewer count as empty.
    pub min_bytes: u64,
}

impl TrainingSetAssembler {
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            cap: config.table_cap,
            seed: config.seed,
            min_bytes: config.min_table_bytes,
        }
    }

    /// Keep the candidates that exist and are larger than `min_bytes`.
    pub fn valid_tables<'a>(&self, candidates: impl IntoIterator<Item = &'a Path>) -> Vec<PathBuf> {
        candidates
            .into_iter()
            .filter(|p| match fs::metadata(p) {
                Ok(m) => m.is_file() && m.len() > self.min_bytes,
                Err(_) => false,
            })
            .map(Path::to_path_buf)
            .collect()
    }

    /// Concatenate and, above the cap, subsample to exactly `cap` rows.
    pub fn merge(&self, tables: Vec<SampleTable>) -> SampleTable {
        let merged = SampleTable::concat(tables);
        if merged.len() <= self.cap {
            return merged;
        }
        let keep = sample_indices(merged.len(), self.cap, self.seed);
        merged.select_rows(&keep)
    }

    pub fn assemble<'a>(&self, candidates: impl IntoIterator<Item = &'a Path>, output: &Path) -> Result<AssembleOutcome> {
        if output.exists() {
            return Ok(AssembleOutcome::AlreadyPresent);
        }
        let valid = self.valid_tables(candidates);
        if valid.is_empty() {
            return Ok(AssembleOutcome::NoTables);
        }
        let tables = valid.iter().map(|p| SampleTable::read_csv(p)).collect::<Result<Vec<_>>>()?;
        let rows = tables.iter().map(SampleTable::len).sum();
        let merged = self.merge(tables);
        merged.write_csv(output)?;
        log::info!("{}: {} tables, {} of {} rows", output.display(), valid.len(), merged.len(), rows);
        Ok(AssembleOutcome::Written { tables: valid.len(), rows, kept: merged.len() })
    }
}
