//! Stage loops. Each stage walks the selected projects (and their tiles) in
//! definition order, records per-unit results in a [`RunSummary`] and
//! returns without waiting on any remote job.
//!
//! Unit-local errors (bad data, failed repair, missing inputs) are recorded
//! and the loop moves on. Configuration and remote submission errors end the
//! stage.

use std::path::PathBuf;

use crate::assemble::{AssembleOutcome, TrainingSetAssembler};
use crate::balance::{BalancedSampleSelector, BalancedSampleSet};
use crate::config::{extraction_job_name, PipelineConfig, TimeWindow};
use crate::error::{PipelineError, Result};
use crate::ledger::{namespace, JobTracker, MarkerStore, SubmitOutcome};
use crate::models::{ClassifyOutcome, ModelTrainer, TileClassifier};
use crate::naming::{NamePolicy, SanitizeRules};
use crate::partition::{PartitionManifest, SpatialPartitioner};
use crate::remote::{ImageryRef, RemoteClient};
use crate::split::{AttributeSplitter, OutputMode};
use crate::tiles::{Project, ProjectSelection, TileIndex};
use crate::vector::read_vector;

// ── Summary ──────────────────────────────────────────────────────────────────

/// Outcome of one stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub stage: String,
    pub completed: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
}

impl RunSummary {
    pub fn new(stage: &str) -> Self {
        Self { stage: stage.to_string(), ..Default::default() }
    }

    pub fn complete(&mut self, unit: impl Into<String>) {
        self.completed.push(unit.into());
    }

    pub fn skip(&mut self, unit: impl Into<String>, reason: impl Into<String>) {
        let (unit, reason) = (unit.into(), reason.into());
        log::info!("[{}] skip {unit}: {reason}", self.stage);
        self.skipped.push((unit, reason));
    }

    /// Record a unit-local error and carry on; anything else is returned.
    pub fn absorb(&mut self, unit: impl Into<String>, err: PipelineError) -> Result<()> {
        if !err.is_unit_local() {
            return Err(err);
        }
        let unit = unit.into();
        match err {
            PipelineError::MissingDependency { missing, .. } => {
                let names: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
                self.skip(unit, format!("missing {}", names.join(", ")));
            }
            other => {
                log::warn!("[{}] {unit} failed: {other}", self.stage);
                self.failed.push((unit, other.to_string()));
            }
        }
        Ok(())
    }

    pub fn log(&self) {
        log::info!(
            "[{}] done: {} completed, {} skipped, {} failed",
            self.stage,
            self.completed.len(),
            self.skipped.len(),
            self.failed.len()
        );
        for (unit, reason) in &self.skipped {
            log::info!("[{}]   skipped {unit}: {reason}", self.stage);
        }
        for (unit, reason) in &self.failed {
            log::warn!("[{}]   failed {unit}: {reason}", self.stage);
        }
    }
}

// ── Shared context ───────────────────────────────────────────────────────────

/// Resolves project names to the stems stage 1 wrote them under.
pub struct ProjectStems {
    manifest: PartitionManifest,
    naming: NamePolicy,
}

impl ProjectStems {
    pub fn load(config: &PipelineConfig) -> Result<Self> {
        let manifest = PartitionManifest::load(&config.layout.project_dir)?.unwrap_or_default();
        Ok(Self { manifest, naming: config.project_naming() })
    }

    pub fn stem(&self, project: &str) -> String {
        self.manifest.stem(project, &self.naming)
    }
}

pub fn load_tiles(config: &PipelineConfig) -> Result<TileIndex> {
    let l = &config.layout;
    let index = TileIndex::load(&l.tiles_file, l.tiles_layer.as_deref(), &config.columns.project, &config.columns.tile)?;
    log::info!("{}: {} projects, {} tiles", l.tiles_file.display(), index.projects.len(), index.n_tiles());
    Ok(index)
}

fn selected<'a>(index: &'a TileIndex, selection: &ProjectSelection) -> Result<Vec<&'a Project>> {
    selection.validate()?;
    let projects = selection.apply(index);
    if let Some(name) = &selection.only {
        if projects.is_empty() {
            return Err(PipelineError::Configuration(format!("unknown project '{name}'")));
        }
    }
    Ok(projects)
}

fn class_files(config: &PipelineConfig, stem: &str) -> [PathBuf; 3] {
    let [a, b, c] = &config.sampling.class_labels;
    [config.class_file(stem, a), config.class_file(stem, b), config.class_file(stem, c)]
}

fn require_files(unit: &str, paths: &[PathBuf]) -> Result<()> {
    let missing: Vec<PathBuf> = paths.iter().filter(|p| !p.exists()).cloned().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::MissingDependency { unit: unit.to_string(), missing })
    }
}

// ── Stage 1 ──────────────────────────────────────────────────────────────────

pub fn run_partition(config: &PipelineConfig) -> Result<RunSummary> {
    let l = &config.layout;
    let mut summary = RunSummary::new("partition");
    let reference = read_vector(&l.reference_file, l.reference_layer.as_deref())?;
    let regions = read_vector(&l.tiles_file, l.tiles_layer.as_deref())?;
    log::info!("{}: {} reference samples", l.reference_file.display(), reference.len());
    let partitioner = SpatialPartitioner {
        key_column: config.columns.project.clone(),
        naming: config.project_naming(),
        out_dir: l.project_dir.clone(),
        extension: l.vector_ext.clone(),
    };
    for out in partitioner.run(&reference, &l.reference_file, &regions, &l.tiles_file)? {
        if out.count == 0 {
            summary.skip(out.value, "no reference samples");
        } else {
            summary.complete(out.value);
        }
    }
    Ok(summary)
}

// ── Stage 2 ──────────────────────────────────────────────────────────────────

/// Output of stage 2 as configured: one file per class in `class_dir`.
pub fn class_output(config: &PipelineConfig) -> OutputMode {
    let l = &config.layout;
    OutputMode::Files { dir: l.class_dir.clone(), extension: l.vector_ext.clone() }
}

pub fn run_split(
    config: &PipelineConfig,
    index: &TileIndex,
    selection: &ProjectSelection,
    mode: &OutputMode,
    dissolve: bool,
) -> Result<RunSummary> {
    let l = &config.layout;
    mode.validate()?;
    let stems = ProjectStems::load(config)?;
    let mut summary = RunSummary::new("split");
    for project in selected(index, selection)? {
        let stem = stems.stem(&project.name);
        let input = l.project_dir.join(format!("{stem}.{}", l.vector_ext));
        let splitter = AttributeSplitter {
            column: config.columns.class.clone(),
            mode: mode.clone(),
            naming: NamePolicy::new(stem, "", SanitizeRules::LAYER),
            dissolve,
        };
        let result = require_files(&project.name, std::slice::from_ref(&input))
            .and_then(|_| read_vector(&input, None))
            .and_then(|features| splitter.split(&features, &input));
        match result {
            Ok(outputs) => {
                log::info!("{}: {} class subsets", project.name, outputs.len());
                summary.complete(&project.name);
            }
            Err(e) => summary.absorb(&project.name, e)?,
        }
    }
    Ok(summary)
}

// ── Stage 3 ──────────────────────────────────────────────────────────────────

pub fn run_extraction(
    config: &PipelineConfig,
    index: &TileIndex,
    selection: &ProjectSelection,
    markers: &dyn MarkerStore,
    client: &dyn RemoteClient,
) -> Result<RunSummary> {
    let tracker = JobTracker::new(markers, namespace::EXTRACTION);
    let selector = BalancedSampleSelector::new(&config.sampling);
    let imagery = ImageryRef::new(&config.imagery, TimeWindow::calendar_year(config.imagery.year)?);
    let stems = ProjectStems::load(config)?;
    let mut summary = RunSummary::new("extract");

    for project in selected(index, selection)? {
        let mut pending = Vec::new();
        for (i, tile) in project.tiles.iter().enumerate() {
            let unit = format!("{}/{}", project.name, tile.name);
            let job = extraction_job_name(&tile.name);
            if config.tile_table(&tile.name).exists() {
                summary.skip(unit, "samples already extracted");
            } else if tracker.is_submitted(&job)? {
                summary.skip(unit, "extraction already submitted");
            } else {
                pending.push(i);
            }
        }
        if pending.is_empty() {
            continue;
        }

        let stem = stems.stem(&project.name);
        let set: BalancedSampleSet = match selector.load(&project.name, &class_files(config, &stem)) {
            Ok(classes) => selector.balance(classes),
            Err(e) => {
                summary.absorb(&project.name, e)?;
                continue;
            }
        };
        let empty = set.empty_labels();
        if !empty.is_empty() {
            summary.skip(&project.name, format!("empty class subset {}", empty.join(", ")));
            continue;
        }
        log::info!("{}: balanced to {} samples per class", project.name, set.n);

        let mut units = selector.tile_units(&set, &project.name, &project.tiles);
        for i in pending {
            let tile = &project.tiles[i];
            let unit = format!("{}/{}", project.name, tile.name);
            let Some(extraction) = units[i].take() else {
                summary.skip(unit, "no balanced samples inside tile");
                continue;
            };
            let job = extraction_job_name(&tile.name);
            let labels = extraction.labels().join(",");
            let request = extraction.into_request(job.clone(), imagery.clone(), &config.imagery.export_folder);
            let output = config.tile_table(&tile.name);
            match tracker.submit_once(&job, Some(output.as_path()), || client.submit_extraction(&request))? {
                SubmitOutcome::Submitted(_) => {
                    log::info!("{unit}: submitted {job} (classes {labels})");
                    summary.complete(unit);
                }
                SubmitOutcome::OutputPresent => summary.skip(unit, "samples already extracted"),
                SubmitOutcome::AlreadySubmitted => summary.skip(unit, "extraction already submitted"),
            }
        }
    }
    Ok(summary)
}

// ── Stage 4 ──────────────────────────────────────────────────────────────────

/// Tiles of `project` whose extraction was submitted but whose result table
/// has not arrived yet.
fn outstanding_extractions(config: &PipelineConfig, project: &Project, tracker: &JobTracker<'_>) -> Result<Vec<String>> {
    let mut waiting = Vec::new();
    for tile in &project.tiles {
        if !config.tile_table(&tile.name).exists() && tracker.is_submitted(&extraction_job_name(&tile.name))? {
            waiting.push(tile.name.clone());
        }
    }
    Ok(waiting)
}

/// A project is merged only once every submitted extraction has delivered
/// its table; a training table once written is never rebuilt.
pub fn run_assembly(
    config: &PipelineConfig,
    index: &TileIndex,
    selection: &ProjectSelection,
    markers: &dyn MarkerStore,
) -> Result<RunSummary> {
    let tracker = JobTracker::new(markers, namespace::EXTRACTION);
    let assembler = TrainingSetAssembler::new(&config.sampling);
    let stems = ProjectStems::load(config)?;
    let mut summary = RunSummary::new("merge");
    for project in selected(index, selection)? {
        let output = config.training_table(&project.name);
        if output.exists() {
            summary.skip(&project.name, "training table present");
            continue;
        }
        let waiting = outstanding_extractions(config, project, &tracker)?;
        if !waiting.is_empty() {
            log::debug!("{}: waiting on {}", project.name, waiting.join(", "));
            summary.skip(&project.name, format!("{} tile extractions pending", waiting.len()));
            continue;
        }
        let tables: Vec<PathBuf> = project.tiles.iter().map(|t| config.tile_table(&t.name)).collect();
        let result = require_files(&project.name, &class_files(config, &stems.stem(&project.name)))
            .and_then(|_| assembler.assemble(tables.iter().map(PathBuf::as_path), &output));
        match result {
            Ok(AssembleOutcome::Written { .. }) => summary.complete(&project.name),
            Ok(AssembleOutcome::AlreadyPresent) => summary.skip(&project.name, "training table present"),
            Ok(AssembleOutcome::NoTables) => summary.skip(&project.name, "no extracted tile tables"),
            Err(e) => summary.absorb(&project.name, e)?,
        }
    }
    Ok(summary)
}

// ── Stage 5 ──────────────────────────────────────────────────────────────────

pub fn run_training(
    config: &PipelineConfig,
    index: &TileIndex,
    selection: &ProjectSelection,
    markers: &dyn MarkerStore,
    client: &dyn RemoteClient,
) -> Result<RunSummary> {
    let tracker = JobTracker::new(markers, namespace::MODELS);
    let trainer = ModelTrainer::new(config);
    let mut summary = RunSummary::new("train");
    for project in selected(index, selection)? {
        let table = config.training_table(&project.name);
        if !table.exists() {
            summary.skip(&project.name, "no training table");
            continue;
        }
        match trainer.train_project(&project.name, &table, &tracker, client) {
            Ok(r) if r.submitted > 0 => summary.complete(&project.name),
            Ok(_) => summary.skip(&project.name, "all models already submitted"),
            Err(e) => summary.absorb(&project.name, e)?,
        }
    }
    Ok(summary)
}

// ── Stage 6 ──────────────────────────────────────────────────────────────────

pub fn run_classification(
    config: &PipelineConfig,
    index: &TileIndex,
    selection: &ProjectSelection,
    markers: &dyn MarkerStore,
    client: &dyn RemoteClient,
) -> Result<RunSummary> {
    let models = JobTracker::new(markers, namespace::MODELS);
    let tiles = JobTracker::new(markers, namespace::CLASSIFICATION);
    let classifier = TileClassifier::new(config);
    let mut summary = RunSummary::new("classify");
    for project in selected(index, selection)? {
        match classifier.classify_project(project, &models, &tiles, client)? {
            ClassifyOutcome::Pending(reason) => summary.skip(&project.name, reason),
            ClassifyOutcome::Submitted { tiles: 0, .. } => {
                summary.skip(&project.name, "all tiles already submitted")
            }
            ClassifyOutcome::Submitted { tiles, .. } => {
                log::info!("{}: {} classification jobs", project.name, tiles);
                summary.complete(&project.name);
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryMarkerStore;
    use crate::remote::testutil::RecordingClient;
    use crate::table::SampleTable;
    use crate::tiles::testutil::sample_index;
    use crate::vector::testutil::point;
    use crate::vector::{write_vector, FeatureSet};
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn config(root: &Path) -> PipelineConfig {
        let mut c = PipelineConfig::default();
        let l = &mut c.layout;
        for dir in [&mut l.project_dir, &mut l.class_dir, &mut l.tile_samples_dir, &mut l.training_dir] {
            *dir = root.join(&*dir);
        }
        l.vector_ext = "geojson".into();
        l.table_ext = "csv".into();
        c
    }

    /// Class files for P1: target and negative-B samples in T1, a single
    /// negative-A sample in T2.
    fn write_classes(c: &PipelineConfig, stem: &str) {
        let samples = [(0.5, 0.5, "1"), (0.4, 0.4, "3"), (1.5, 0.5, "2")];
        for label in ["1", "2", "3"] {
            let fs: FeatureSet = samples
                .iter()
                .filter(|s| s.2 == label)
                .map(|&(x, y, l)| point(x, y, &[("ref_cls", json!(l))]))
                .collect();
            write_vector(&c.class_file(stem, label), None, &fs).unwrap();
        }
    }

    #[test]
    fn absorb_keeps_unit_errors_and_returns_the_rest() {
        let mut s = RunSummary::new("t");
        s.absorb("a", PipelineError::MissingDependency { unit: "a".into(), missing: vec!["x".into()] })
            .unwrap();
        s.absorb("b", PipelineError::data_format("f", "bad")).unwrap();
        assert_eq!(s.skipped.len(), 1);
        assert_eq!(s.failed.len(), 1);
        let err = s.absorb("c", PipelineError::Remote { job: "j".into(), reason: "r".into() });
        assert!(err.is_err());
    }

    #[test]
    fn extraction_balances_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path());
        let index = sample_index();
        let stem = c.project_naming().name("P1");
        write_classes(&c, &stem);
        let store = MemoryMarkerStore::new();
        let client = RecordingClient::default();
        let sel = ProjectSelection::default();

        let s = run_extraction(&c, &index, &sel, &store, &client).unwrap();
        // P2 has no class files: skipped, not fatal.
        assert_eq!(s.completed, vec!["P1/T1", "P1/T2"]);
        assert!(s.skipped.iter().any(|(u, r)| u == "P2" && r.starts_with("missing")));
        {
            let requests = client.extraction.lock().unwrap();
            assert_eq!(requests[0].classes.len(), 2);
            assert_eq!(requests[1].classes.len(), 1);
            assert_eq!(requests[1].classes[0].label, "2");
        }

        let again = run_extraction(&c, &index, &sel, &store, &client).unwrap();
        assert!(again.completed.is_empty());
        assert_eq!(client.n_extraction(), 2);
    }

    #[test]
    fn extraction_skips_tiles_with_local_output() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path());
        let index = sample_index();
        write_classes(&c, &c.project_naming().name("P1"));
        let out = c.tile_table("T1");
        fs::create_dir_all(out.parent().unwrap()).unwrap();
        fs::write(&out, "class\n").unwrap();
        let client = RecordingClient::default();
        let only = ProjectSelection { only: Some("P1".into()), ..Default::default() };
        let s = run_extraction(&c, &index, &only, &MemoryMarkerStore::new(), &client).unwrap();
        assert_eq!(s.completed, vec!["P1/T2"]);
    }

    #[test]
    fn remote_failure_aborts_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path());
        let index = sample_index();
        write_classes(&c, &c.project_naming().name("P1"));
        let client = RecordingClient { fail: true, ..Default::default() };
        let store = MemoryMarkerStore::new();
        let res = run_extraction(&c, &index, &ProjectSelection::default(), &store, &client);
        assert!(matches!(res, Err(PipelineError::Remote { .. })));
        assert_eq!(store.count_prefixed(namespace::EXTRACTION, "").unwrap(), 0);
    }

    #[test]
    fn assembly_merges_tile_tables() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path());
        let index = sample_index();
        write_classes(&c, &c.project_naming().name("P1"));
        let rows = |n: usize| (0..n).map(|i| vec![format!("{i}"), "1".into(), "0.25".into()]).collect();
        let cols = vec!["system:index".to_string(), "class".into(), "NDVI".into()];
        SampleTable::new(cols.clone(), rows(30)).write_csv(&c.tile_table("T1")).unwrap();
        SampleTable::new(cols, rows(20)).write_csv(&c.tile_table("T2")).unwrap();

        let store = MemoryMarkerStore::new();
        let s = run_assembly(&c, &index, &ProjectSelection::default(), &store).unwrap();
        assert_eq!(s.completed, vec!["P1"]);
        assert_eq!(SampleTable::read_csv(&c.training_table("P1")).unwrap().len(), 50);
        let s = run_assembly(&c, &index, &ProjectSelection::default(), &store).unwrap();
        assert!(s.skipped.iter().any(|(u, r)| u == "P1" && r == "training table present"));
    }

    #[test]
    fn assembly_waits_for_every_submitted_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path());
        let index = sample_index();
        write_classes(&c, &c.project_naming().name("P1"));
        let store = MemoryMarkerStore::new();
        let client = RecordingClient::default();
        let only = ProjectSelection { only: Some("P1".into()), ..Default::default() };
        let s = run_extraction(&c, &index, &only, &store, &client).unwrap();
        assert_eq!(s.completed, vec!["P1/T1", "P1/T2"]);

        let rows = |n: usize| (0..n).map(|i| vec![format!("{i}"), "1".into()]).collect();
        let cols = vec!["system:index".to_string(), "class".into()];
        SampleTable::new(cols.clone(), rows(30)).write_csv(&c.tile_table("T1")).unwrap();
        let s = run_assembly(&c, &index, &only, &store).unwrap();
        assert!(s.completed.is_empty());
        assert_eq!(s.skipped, vec![("P1".to_string(), "1 tile extractions pending".to_string())]);
        assert!(!c.training_table("P1").exists());

        SampleTable::new(cols, rows(30)).write_csv(&c.tile_table("T2")).unwrap();
        let s = run_assembly(&c, &index, &only, &store).unwrap();
        assert_eq!(s.completed, vec!["P1"]);
        assert_eq!(SampleTable::read_csv(&c.training_table("P1")).unwrap().len(), 60);
    }

    fn write_project_subset(c: &PipelineConfig, stem: &str) {
        let fs: FeatureSet = [(0.5, 0.5, 1.0), (0.6, 0.6, 2.0), (1.5, 0.5, 1.0)]
            .iter()
            .map(|&(x, y, cls)| point(x, y, &[("ref_cls", json!(cls))]))
            .collect();
        write_vector(&c.layout.project_dir.join(format!("{stem}.geojson")), None, &fs).unwrap();
    }

    #[test]
    fn split_writes_class_files_named_for_stage_three() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path());
        let stem = c.project_naming().name("P1");
        write_project_subset(&c, &stem);
        let only = ProjectSelection { only: Some("P1".into()), ..Default::default() };
        let s = run_split(&c, &sample_index(), &only, &class_output(&c), false).unwrap();
        assert_eq!(s.completed, vec!["P1"]);
        assert_eq!(read_vector(&c.class_file(&stem, "1"), None).unwrap().len(), 2);
        assert_eq!(read_vector(&c.class_file(&stem, "2"), None).unwrap().len(), 1);
    }

    #[test]
    fn split_into_one_container() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path());
        let stem = c.project_naming().name("P1");
        write_project_subset(&c, &stem);
        let file = dir.path().join("classes.geojson");
        let mode = OutputMode::from_flags(true, Some(file.clone()), None, None).unwrap();
        let only = ProjectSelection { only: Some("P1".into()), ..Default::default() };
        run_split(&c, &sample_index(), &only, &mode, false).unwrap();
        assert_eq!(crate::vector::list_layers(&file).unwrap(), vec![format!("{stem}_1"), format!("{stem}_2")]);
        assert!(!c.layout.class_dir.exists());
    }

    #[test]
    fn split_rejects_a_bad_mode_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path());
        let mode = OutputMode::Container { file: dir.path().join("classes.cols") };
        let res = run_split(&c, &sample_index(), &ProjectSelection::default(), &mode, false);
        assert!(matches!(res, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn unknown_project_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = config(dir.path());
        let only = ProjectSelection { only: Some("nope".into()), ..Default::default() };
        let res = run_assembly(&c, &sample_index(), &only, &MemoryMarkerStore::new());
        assert!(matches!(res, Err(PipelineError::Configuration(_))));
    }
}
