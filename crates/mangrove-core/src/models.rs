//! Ensemble training and tile classification submissions.
//!
//! Both stages hand work to the remote service and return at once. A model
//! marker only records that training was requested; classification also asks
//! the client whether the model asset actually exists.

use std::path::Path;

use crate::config::{PipelineConfig, TimeWindow};
use crate::error::{PipelineError, Result};
use crate::ledger::JobTracker;
use crate::remote::{ClassificationRequest, ImageryRef, RemoteClient, TrainingRequest};
use crate::sampling::{derived_seed, sample_fraction, sample_indices};
use crate::table::SampleTable;
use crate::tiles::Project;

pub fn model_marker(project: &str, index: u32) -> String {
    format!("{project}_mdl_{index}")
}

pub fn classification_job(tile: &str, year: i32, index: u32) -> String {
    format!("{tile}_{year}_mng_cls_count_{index}")
}

pub fn classification_marker(tile: &str, year: i32, index: u32) -> String {
    format!("{}_subd", classification_job(tile, year, index))
}

// ── Training ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingReport {
    pub submitted: u32,
    pub already: u32,
}

pub struct ModelTrainer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ModelTrainer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Rows used by ensemble member `index`: exactly `max_rows` from large
    /// tables, otherwise `fraction` of them. Excluded columns are dropped.
    pub fn subsample(&self, table: &SampleTable, index: u32) -> SampleTable {
        let t = &self.config.training;
        let seed = derived_seed(self.config.sampling.seed, u64::from(index));
        let rows = if table.len() > t.max_rows {
            sample_indices(table.len(), t.max_rows, seed)
        } else {
            sample_fraction(table.len(), t.fraction, seed)
        };
        let mut subset = table.select_rows(&rows);
        subset.drop_columns(&t.excluded_columns);
        subset
    }

    fn check_columns(&self, table: &SampleTable, path: &Path) -> Result<()> {
        let class = &self.config.training.class_column;
        let missing: Vec<String> = std::iter::once(class.clone())
            .chain(self.config.imagery.feature_bands())
            .filter(|c| table.column_index(c).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::data_format(path, format!("missing columns {missing:?}")))
        }
    }

    /// Submit every ensemble member of `project` that has no marker yet.
    /// The table is only read when something is left to submit.
    pub fn train_project(
        &self,
        project: &str,
        table_path: &Path,
        tracker: &JobTracker<'_>,
        client: &dyn RemoteClient,
    ) -> Result<TrainingReport> {
        let n_models = self.config.training.n_models;
        let mut report = TrainingReport { submitted: 0, already: 0 };
        let done = tracker.count_prefixed(&format!("{project}_mdl_"))?;
        if done >= n_models as usize {
            report.already = n_models;
            return Ok(report);
        }

        let mut table: Option<SampleTable> = None;
        for index in 1..=n_models {
            let marker = model_marker(project, index);
            if tracker.is_submitted(&marker)? {
                report.already += 1;
                continue;
            }
            if table.is_none() {
                let loaded = SampleTable::read_csv(table_path)?;
                self.check_columns(&loaded, table_path)?;
                table = Some(loaded);
            }
            let Some(samples) = table.as_ref() else { continue };
            let asset = self.config.training.model_asset(project, index);
            let request = TrainingRequest::new(
                &self.config.training,
                self.config.imagery.feature_bands(),
                asset,
                self.subsample(samples, index),
            );
            let outcome = tracker.submit_once(&marker, None, || client.submit_training(&request))?;
            if outcome.submitted() {
                log::info!("{project}: submitted model {index} ({} rows)", request.samples.len());
                report.submitted += 1;
            } else {
                report.already += 1;
            }
        }
        Ok(report)
    }
}

// ── Classification ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyOutcome {
    /// The model cannot be consumed yet.
    Pending(String),
    Submitted { tiles: usize, already: usize },
}

pub struct TileClassifier<'a> {
    config: &'a PipelineConfig,
}

impl<'a> TileClassifier<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn classify_project(
        &self,
        project: &Project,
        models: &JobTracker<'_>,
        tiles: &JobTracker<'_>,
        client: &dyn RemoteClient,
    ) -> Result<ClassifyOutcome> {
        let c = &self.config.classification;
        let index = c.model_index;
        if !models.is_submitted(&model_marker(&project.name, index))? {
            return Ok(ClassifyOutcome::Pending(format!("model {index} not submitted")));
        }
        let asset = self.config.training.model_asset(&project.name, index);
        if !client.asset_ready(&asset)? {
            return Ok(ClassifyOutcome::Pending(format!("model asset {asset} not ready")));
        }

        let window = TimeWindow::calendar_year(c.year)?;
        let imagery = ImageryRef::new(&self.config.imagery, window);
        let (mut submitted, mut already) = (0, 0);
        for tile in &project.tiles {
            let request = ClassificationRequest::new(
                c,
                classification_job(&tile.name, c.year, index),
                tile.name.clone(),
                tile.bbox,
                asset.clone(),
                imagery.clone(),
            );
            let marker = classification_marker(&tile.name, c.year, index);
            if tiles.submit_once(&marker, None, || client.submit_classification(&request))?.submitted() {
                submitted += 1;
            } else {
                already += 1;
            }
        }
        Ok(ClassifyOutcome::Submitted { tiles: submitted, already })
    }
}
