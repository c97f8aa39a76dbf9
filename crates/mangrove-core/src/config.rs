//! Pipeline configuration: directory layout, attribute columns, sampling
//! caps, imagery and model definitions. Loaded from an optional JSON file;
//! every field has a default so a partial file is enough.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::naming::{NamePolicy, SanitizeRules};
use crate::sampling::DEFAULT_SEED;

// ── Layout ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Region/tile definition dataset.
    pub tiles_file: PathBuf,
    pub tiles_layer: Option<String>,
    /// Global reference sample dataset.
    pub reference_file: PathBuf,
    pub reference_layer: Option<String>,
    /// Stage 1 output: one subset per project.
    pub project_dir: PathBuf,
    /// Stage 2 output: one subset per project and class.
    pub class_dir: PathBuf,
    /// Stage 3 results as downloaded from the extraction service.
    pub tile_samples_dir: PathBuf,
    /// Stage 4 output: one training table per project.
    pub training_dir: PathBuf,
    /// Root of the completion/submission marker ledger.
    pub marker_dir: PathBuf,
    /// Job spool read by the external runner.
    pub spool_dir: PathBuf,
    /// Extension (compression tokens included) of vector subsets.
    pub vector_ext: String,
    /// Extension of project training tables.
    pub table_ext: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            tiles_file: PathBuf::from("gmw_tiles_prj_def.geojson"),
            tiles_layer: None,
            reference_file: PathBuf::from("gmw_v4_ref_smpls_qad_v6.cols.gz"),
            reference_layer: None,
            project_dir: PathBuf::from("gmw_prj_train_data"),
            class_dir: PathBuf::from("gmw_prj_train_data_split"),
            tile_samples_dir: PathBuf::from("gmw_tile_smpls_csv_files"),
            training_dir: PathBuf::from("gmw_prj_train_smpls"),
            marker_dir: PathBuf::from("gmw_markers"),
            spool_dir: PathBuf::from("gmw_job_spool"),
            vector_ext: "cols.sz".into(),
            table_ext: "csv.sz".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Columns {
    pub project: String,
    pub tile: String,
    pub class: String,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            project: "gmw_prj".into(),
            tile: "gmw_tile_name".into(),
            class: "ref_cls".into(),
        }
    }
}

// ── Sampling ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Per-class cap applied when balancing a project.
    pub class_cap: usize,
    /// Row cap of an assembled project training table.
    pub table_cap: usize,
    pub seed: u64,
    /// Tile tables of this size or smaller are treated as empty.
    pub min_table_bytes: u64,
    /// Suffix of the per-project subset names.
    pub project_suffix: String,
    /// Class labels in target, negative-A, negative-B order.
    pub class_labels: [String; 3],
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            class_cap: 10_000,
            table_cap: 100_000,
            seed: DEFAULT_SEED,
            min_table_bytes: 100,
            project_suffix: "refs_smps".into(),
            class_labels: ["1".into(), "2".into(), "3".into()],
        }
    }
}

// ── Imagery ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageryConfig {
    pub collection: String,
    /// Calendar year sampled for training data.
    pub year: i32,
    /// Maximum scene cloud cover, percent.
    pub cloud_threshold: u8,
    pub scale_m: f64,
    /// Surface reflectance bands read from the collection.
    pub bands: Vec<String>,
    /// Spectral indices derived from the bands.
    pub indices: Vec<String>,
    pub export_folder: String,
}

impl Default for ImageryConfig {
    fn default() -> Self {
        Self {
            collection: "landsat-sr".into(),
            year: 2020,
            cloud_threshold: 70,
            scale_m: 30.0,
            bands: ["Blue", "Green", "Red", "NIR", "SWIR1", "SWIR2"].map(String::from).to_vec(),
            indices: ["NDVI", "NDWI", "NBR", "EVI", "MVI"].map(String::from).to_vec(),
            export_folder: "gmw_v4_chng_2020_ls_train_smpls".into(),
        }
    }
}

impl ImageryConfig {
    /// All feature columns a classifier is trained on.
    pub fn feature_bands(&self) -> Vec<String> {
        self.bands.iter().chain(&self.indices).cloned().collect()
    }
}

/// Inclusive date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn calendar_year(year: i32) -> Result<Self> {
        match (NaiveDate::from_ymd_opt(year, 1, 1), NaiveDate::from_ymd_opt(year, 12, 31)) {
            (Some(start), Some(end)) => Ok(Self { start, end }),
            _ => Err(PipelineError::Configuration(format!("year {year} is out of range"))),
        }
    }
}

// ── Models ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Ensemble size per project.
    pub n_models: u32,
    pub n_trees: u32,
    /// Tables larger than this are subsampled to exactly this many rows...
    pub max_rows: usize,
    /// ...smaller ones to this fraction.
    pub fraction: f64,
    pub class_column: String,
    pub excluded_columns: Vec<String>,
    /// Asset folder the trained models are exported into.
    pub asset_root: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_models: 10,
            n_trees: 100,
            max_rows: 20_000,
            fraction: 0.5,
            class_column: "class".into(),
            excluded_columns: ["latitude", "longitude", ".geo"].map(String::from).to_vec(),
            asset_root: "gmw_ls_cls_mdls".into(),
        }
    }
}

impl TrainingConfig {
    pub fn model_asset(&self, project: &str, index: u32) -> String {
        format!("{}/{project}_rf_cls_{index}", self.asset_root)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub year: i32,
    /// Ensemble member applied.
    pub model_index: u32,
    pub habitat_mask_asset: String,
    /// Defaults to `gmw_{year}_mng_count_tiles`.
    pub output_folder: Option<String>,
    pub crs: String,
    pub nodata: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            year: 2002,
            model_index: 1,
            habitat_mask_asset: "gmw_v23_hab_msk".into(),
            output_folder: None,
            crs: "EPSG:4326".into(),
            nodata: 0.0,
        }
    }
}

impl ClassificationConfig {
    pub fn output_folder(&self) -> String {
        self.output_folder.clone().unwrap_or_else(|| format!("gmw_{}_mng_count_tiles", self.year))
    }
}

// ── Top level ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub layout: Layout,
    pub columns: Columns,
    pub sampling: SamplingConfig,
    pub imagery: ImageryConfig,
    pub training: TrainingConfig,
    pub classification: ClassificationConfig,
}

impl PipelineConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            None => Self::default(),
            Some(p) => {
                let text = fs::read_to_string(p).map_err(|e| PipelineError::io(p, e))?;
                serde_json::from_str(&text)
                    .map_err(|e| PipelineError::Configuration(format!("{}: {e}", p.display())))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(PipelineError::Configuration(msg.to_string()));
        let s = &self.sampling;
        if s.class_cap == 0 || s.table_cap == 0 {
            return fail("sampling caps must be positive");
        }
        let [a, b, c] = &s.class_labels;
        if a == b || b == c || a == c {
            return fail("class labels must be distinct");
        }
        if self.training.n_models == 0 {
            return fail("training.n_models must be positive");
        }
        if !(self.training.fraction > 0.0 && self.training.fraction <= 1.0) {
            return fail("training.fraction must be in (0, 1]");
        }
        if self.imagery.scale_m <= 0.0 {
            return fail("imagery.scale_m must be positive");
        }
        if self.columns.project.is_empty() || self.columns.tile.is_empty() || self.columns.class.is_empty() {
            return fail("attribute column names must not be empty");
        }
        Ok(())
    }

    /// Naming of stage 1 project subsets.
    pub fn project_naming(&self) -> NamePolicy {
        NamePolicy::new("", self.sampling.project_suffix.clone(), SanitizeRules::PROJECT)
            .lowercase(true)
            .sanitize_composed(true)
    }

    /// Per-class subset written by stage 2 for a project stem.
    pub fn class_file(&self, project_stem: &str, label: &str) -> PathBuf {
        self.layout.class_dir.join(format!("{project_stem}_{label}.{}", self.layout.vector_ext))
    }

    /// Extraction output for one tile, as downloaded from the service.
    pub fn tile_table(&self, tile: &str) -> PathBuf {
        self.layout.tile_samples_dir.join(format!("{}.csv", extraction_job_name(tile)))
    }

    pub fn training_table(&self, project: &str) -> PathBuf {
        self.layout.training_dir.join(format!("{project}_train_smpls.{}", self.layout.table_ext))
    }
}

/// Job name of a tile's feature extraction.
pub fn extraction_job_name(tile: &str) -> String {
    format!("{tile}_cls_smpls")
}
