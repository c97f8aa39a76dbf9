//! Remote collaborators: feature extraction, model training and
//! classification. Jobs are submitted synchronously and run asynchronously;
//! nothing here waits for a job to finish.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compression::StagedWriter;
use crate::config::{ClassificationConfig, ImageryConfig, TimeWindow, TrainingConfig};
use crate::error::{PipelineError, Result};
use crate::geometry::{BBox, Geometry};
use crate::table::SampleTable;

/// Handle returned for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_name: String,
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryRef {
    pub collection: String,
    pub window: TimeWindow,
    pub cloud_threshold: u8,
    pub bands: Vec<String>,
    pub indices: Vec<String>,
    pub scale_m: f64,
}

impl ImageryRef {
    pub fn new(config: &ImageryConfig, window: TimeWindow) -> Self {
        Self {
            collection: config.collection.clone(),
            window,
            cloud_threshold: config.cloud_threshold,
            bands: config.bands.clone(),
            indices: config.indices.clone(),
            scale_m: config.scale_m,
        }
    }
}

/// Sample geometries of one class inside a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSamples {
    pub label: String,
    pub geometries: Vec<Geometry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub job_name: String,
    pub project: String,
    pub tile: String,
    pub region: BBox,
    /// Only the classes present in the tile, in label order.
    pub classes: Vec<ClassSamples>,
    pub imagery: ImageryRef,
    pub class_property: String,
    pub export_folder: String,
    pub file_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub job_name: String,
    pub asset_id: String,
    pub n_trees: u32,
    pub class_column: String,
    pub feature_bands: Vec<String>,
    pub samples: SampleTable,
}

impl TrainingRequest {
    pub fn new(config: &TrainingConfig, feature_bands: Vec<String>, asset_id: String, samples: SampleTable) -> Self {
        let job_name = asset_id.rsplit('/').next().unwrap_or(&asset_id).to_string();
        Self {
            job_name,
            asset_id,
            n_trees: config.n_trees,
            class_column: config.class_column.clone(),
            feature_bands,
            samples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub job_name: String,
    pub tile: String,
    pub model_asset: String,
    pub region: BBox,
    pub imagery: ImageryRef,
    pub habitat_mask_asset: String,
    pub output_folder: String,
    pub crs: String,
    pub nodata: f64,
    /// Per-pixel output bands.
    pub outputs: Vec<String>,
}

impl ClassificationRequest {
    pub fn new(
        config: &ClassificationConfig,
        job_name: String,
        tile: String,
        region: BBox,
        model_asset: String,
        imagery: ImageryRef,
    ) -> Self {
        Self {
            job_name,
            tile,
            model_asset,
            region,
            imagery,
            habitat_mask_asset: config.habitat_mask_asset.clone(),
            output_folder: config.output_folder(),
            crs: config.crs.clone(),
            nodata: config.nodata,
            outputs: vec!["mng_count".into(), "valid_count".into()],
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Injected handle to the remote service. Passed explicitly to each stage.
pub trait RemoteClient {
    fn submit_extraction(&self, request: &ExtractionRequest) -> Result<JobTicket>;
    fn submit_training(&self, request: &TrainingRequest) -> Result<JobTicket>;
    fn submit_classification(&self, request: &ClassificationRequest) -> Result<JobTicket>;
    /// Whether a trained asset exists and can be consumed.
    fn asset_ready(&self, asset_id: &str) -> Result<bool>;
}

/// Spools each request as a JSON job file for an external runner:
/// `{root}/{kind}/{job_name}.json`. The runner reports finished assets by
/// creating `{root}/assets/{asset_id}.ready`.
#[derive(Debug, Clone)]
pub struct SpoolClient {
    root: PathBuf,
}

impl SpoolClient {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_path(&self, kind: &str, job_name: &str) -> PathBuf {
        self.root.join(kind).join(format!("{job_name}.json"))
    }

    pub fn ready_path(&self, asset_id: &str) -> PathBuf {
        self.root.join("assets").join(format!("{asset_id}.ready"))
    }

    fn spool<T: Serialize>(&self, kind: &str, job_name: &str, request: &T) -> Result<JobTicket> {
        let remote = |reason: String| PipelineError::Remote { job: job_name.to_string(), reason };
        if job_name.is_empty() || job_name.contains(['/', '\\']) || job_name == ".." {
            return Err(remote(format!("unusable job name '{job_name}'")));
        }
        let path = self.job_path(kind, job_name);
        if path.exists() {
            log::debug!("{} already spooled", path.display());
        } else {
            let body = serde_json::to_vec_pretty(request).map_err(|e| remote(e.to_string()))?;
            write_job(&path, &body).map_err(|e| remote(e.to_string()))?;
            log::debug!("spooled {}", path.display());
        }
        Ok(JobTicket { job_name: job_name.to_string() })
    }
}

fn write_job(path: &Path, body: &[u8]) -> Result<()> {
    let mut out = StagedWriter::create(path)?;
    out.write_all(body).map_err(|e| PipelineError::io(path, e))?;
    out.commit()
}

impl RemoteClient for SpoolClient {
    fn submit_extraction(&self, request: &ExtractionRequest) -> Result<JobTicket> {
        self.spool("extraction", &request.job_name, request)
    }

    fn submit_training(&self, request: &TrainingRequest) -> Result<JobTicket> {
        self.spool("training", &request.job_name, request)
    }

    fn submit_classification(&self, request: &ClassificationRequest) -> Result<JobTicket> {
        self.spool("classification", &request.job_name, request)
    }

    fn asset_ready(&self, asset_id: &str) -> Result<bool> {
        Ok(fs::metadata(self.ready_path(asset_id)).is_ok_and(|m| m.is_file()))
    }
}
