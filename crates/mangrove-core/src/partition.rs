//! Spatial partitioning of the reference samples into one subset per region.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(feature = "threading")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::compression::StagedWriter;
use crate::error::{IoContext, PipelineError, Result};
use crate::geometry::{Geometry, Polygon, RegionIndex};
use crate::naming::NamePolicy;
use crate::vector::{write_vector, Feature, FeatureSet};

/// One written (or empty) region subset.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionOutput {
    pub value: String,
    pub stem: String,
    pub path: PathBuf,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub stem: String,
    pub samples: usize,
}

/// Written next to the subsets: maps each raw region value to the file stem
/// it was written under, so later stages never re-derive names on their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionManifest {
    pub key_column: String,
    pub regions: BTreeMap<String, ManifestEntry>,
}

impl PartitionManifest {
    pub const FILE_NAME: &'static str = "manifest.json";

    /// `Ok(None)` when the directory holds no manifest.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).at(&path)?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PipelineError::data_format(&path, e.to_string()))
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let path = dir.join(Self::FILE_NAME);
        let body = serde_json::to_vec_pretty(self).map_err(|e| PipelineError::data_format(&path, e.to_string()))?;
        let mut out = StagedWriter::create(&path)?;
        out.write_all(&body).at(&path)?;
        out.commit()
    }

    /// Stem of `value`, falling back to `naming` for values not listed.
    pub fn stem(&self, value: &str, naming: &NamePolicy) -> String {
        self.regions.get(value).map_or_else(|| naming.name(value), |e| e.stem.clone())
    }
}

/// Clips a reference dataset into per-region subsets.
#[derive(Debug, Clone)]
pub struct SpatialPartitioner {
    pub key_column: String,
    pub naming: NamePolicy,
    pub out_dir: PathBuf,
    /// Extension of the written subsets, compression tokens included.
    pub extension: String,
}

impl SpatialPartitioner {
    /// Group the region features by key into one (multi)polygon per value,
    /// in first-appearance order.
    pub fn regions(&self, regions: &FeatureSet, source: &Path) -> Result<Vec<(String, Geometry)>> {
        let mut order: Vec<(String, Vec<Polygon>)> = Vec::new();
        let mut at: HashMap<String, usize> = HashMap::new();
        for (i, f) in regions.iter().enumerate() {
            let key = f
                .attr_string(&self.key_column)
                .ok_or_else(|| PipelineError::data_format(source, format!("feature {i} has no '{}'", self.key_column)))?;
            let polys = f.geometry.as_ref().map(Geometry::polygons).unwrap_or_default();
            if polys.is_empty() {
                return Err(PipelineError::data_format(source, format!("feature {i} ('{key}') is not a polygon")));
            }
            let slot = *at.entry(key.clone()).or_insert_with(|| {
                order.push((key, Vec::new()));
                order.len() - 1
            });
            order[slot].1.extend_from_slice(polys);
        }
        Ok(order
            .into_iter()
            .map(|(k, polys)| (k, Geometry::MultiPolygon(polys)))
            .collect())
    }

    /// Indices of the reference features owned by each region. Every feature
    /// has at most one owner: the region holding its anchor point, or failing
    /// that the first region it touches.
    pub fn members(&self, reference: &FeatureSet, regions: &[(String, Geometry)]) -> Vec<Vec<usize>> {
        let index = RegionIndex::new(regions.iter().map(|(_, g)| g));
        let owner = |f: &Feature| f.geometry.as_ref().and_then(|g| index.locate(g));
        #[cfg(feature = "threading")]
        let owners: Vec<Option<usize>> = reference.features.par_iter().map(owner).collect();
        #[cfg(not(feature = "threading"))]
        let owners: Vec<Option<usize>> = reference.features.iter().map(owner).collect();

        let mut members = vec![Vec::new(); regions.len()];
        for (i, region) in owners.into_iter().enumerate() {
            if let Some(r) = region {
                members[r].push(i);
            }
        }
        members
    }

    /// Write one subset per region plus the manifest. Regions without any
    /// sample produce no file.
    pub fn run(
        &self,
        reference: &FeatureSet,
        reference_path: &Path,
        regions: &FeatureSet,
        regions_path: &Path,
    ) -> Result<Vec<PartitionOutput>> {
        let mut no_geometry = 0usize;
        for (i, f) in reference.iter().enumerate() {
            match &f.geometry {
                Some(g) => g
                    .validate()
                    .map_err(|e| PipelineError::data_format(reference_path, format!("feature {i}: {e}")))?,
                None => no_geometry += 1,
            }
        }
        if no_geometry > 0 {
            log::warn!("{}: {} features without geometry are not assigned", reference_path.display(), no_geometry);
        }

        let regions = self.regions(regions, regions_path)?;
        let names = self.naming.resolve(regions.iter().map(|(k, _)| k.as_str()));
        let members = self.members(reference, &regions);

        fs::create_dir_all(&self.out_dir).at(&self.out_dir)?;
        let mut manifest = PartitionManifest { key_column: self.key_column.clone(), regions: BTreeMap::new() };
        let mut outputs = Vec::with_capacity(regions.len());
        for ((value, _), idx) in regions.iter().zip(members) {
            let stem = names.get(value).cloned().unwrap_or_else(|| self.naming.name(value));
            let path = self.out_dir.join(format!("{stem}.{}", self.extension));
            if idx.is_empty() {
                log::info!("region {value}: no reference samples");
            } else {
                let subset: FeatureSet = idx.iter().map(|&i| reference.features[i].clone()).collect();
                write_vector(&path, None, &subset)?;
                log::info!("region {value}: {} samples -> {}", subset.len(), path.display());
            }
            manifest.regions.insert(value.clone(), ManifestEntry { stem: stem.clone(), samples: idx.len() });
            outputs.push(PartitionOutput { value: value.clone(), stem, path, count: idx.len() });
        }
        manifest.store(&self.out_dir)?;
        Ok(outputs)
    }
}
