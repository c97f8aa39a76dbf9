//! Region (project) and tile definitions, plus project selection for
//! partial runs and sharded workers.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::geometry::{BBox, Geometry};
use crate::vector::{read_vector, FeatureSet};

/// One tile: the unit of remote job submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub name: String,
    pub geometry: Geometry,
    pub bbox: BBox,
}

/// A project and its tiles, in definition order.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub name: String,
    pub tiles: Vec<Tile>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileIndex {
    pub projects: Vec<Project>,
}

impl TileIndex {
    /// Build from the definition dataset. Every feature needs both key
    /// attributes and a polygon geometry; a tile name may belong to only one
    /// project.
    pub fn from_features(features: &FeatureSet, project_col: &str, tile_col: &str, source: &Path) -> Result<Self> {
        let mut projects: Vec<Project> = Vec::new();
        let mut position: HashMap<String, usize> = HashMap::new();
        let mut owner: HashMap<String, String> = HashMap::new();

        for (i, f) in features.iter().enumerate() {
            let fail = |reason: String| PipelineError::data_format(source, format!("feature {i}: {reason}"));
            let project = f.attr_string(project_col).ok_or_else(|| fail(format!("no '{project_col}' value")))?;
            let tile = f.attr_string(tile_col).ok_or_else(|| fail(format!("no '{tile_col}' value")))?;
            let geometry = match &f.geometry {
                Some(g) if !g.polygons().is_empty() => g.clone(),
                _ => return Err(fail(format!("tile '{tile}' has no polygon geometry"))),
            };
            let bbox = geometry.bbox().ok_or_else(|| fail(format!("tile '{tile}' is empty")))?;

            if let Some(prev) = owner.insert(tile.clone(), project.clone()) {
                if prev != project {
                    return Err(fail(format!("tile '{tile}' belongs to both '{prev}' and '{project}'")));
                }
            }
            let at = *position.entry(project.clone()).or_insert_with(|| {
                projects.push(Project { name: project.clone(), tiles: Vec::new() });
                projects.len() - 1
            });
            projects[at].tiles.push(Tile { name: tile, geometry, bbox });
        }
        Ok(Self { projects })
    }

    pub fn load(path: &Path, layer: Option<&str>, project_col: &str, tile_col: &str) -> Result<Self> {
        let features = read_vector(path, layer)?;
        Self::from_features(&features, project_col, tile_col, path)
    }

    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn n_tiles(&self) -> usize {
        self.projects.iter().map(|p| p.tiles.len()).sum()
    }
}

/// Which projects a run (or worker) owns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSelection {
    /// Only this project.
    pub only: Option<String>,
    /// Skip the first `start` projects.
    pub start: usize,
    /// Stop before this position.
    pub end: Option<usize>,
    /// `(index, count)`: keep projects whose position modulo `count` is `index`.
    pub shard: Option<(usize, usize)>,
}

impl ProjectSelection {
    pub fn validate(&self) -> Result<()> {
        if let Some((i, n)) = self.shard {
            if n == 0 || i >= n {
                return Err(PipelineError::Configuration(format!("invalid shard {i}/{n}")));
            }
        }
        if self.end.is_some_and(|e| e < self.start) {
            return Err(PipelineError::Configuration("project range end precedes start".into()));
        }
        Ok(())
    }

    /// Parse a shard given as `index/count`, e.g. `2/8`.
    pub fn parse_shard(s: &str) -> std::result::Result<(usize, usize), String> {
        let (i, n) = s.split_once('/').ok_or_else(|| format!("expected INDEX/COUNT, got '{s}'"))?;
        let i: usize = i.trim().parse().map_err(|_| format!("bad shard index '{i}'"))?;
        let n: usize = n.trim().parse().map_err(|_| format!("bad shard count '{n}'"))?;
        if n == 0 || i >= n {
            return Err(format!("shard index {i} out of range for {n} shards"));
        }
        Ok((i, n))
    }

    /// Selected projects in stable definition order.
    pub fn apply<'a>(&self, index: &'a TileIndex) -> Vec<&'a Project> {
        let end = self.end.unwrap_or(usize::MAX);
        index
            .projects
            .iter()
            .enumerate()
            .filter(|(pos, _)| *pos >= self.start && *pos < end)
            .filter(|(pos, _)| self.shard.map_or(true, |(i, n)| pos % n == i))
            .filter(|(_, p)| self.only.as_ref().map_or(true, |o| &p.name == o))
            .map(|(_, p)| p)
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn projects_keep_first_appearance_order() {
        let idx = sample_index();
        let names: Vec<&str> = idx.projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["P1", "P2"]);
        let tiles: Vec<&str> = idx.projects[0].tiles.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tiles, vec!["T1", "T2"]);
        assert_eq!(idx.n_tiles(), 3);
    }

    #[test]
    fn tile_under_two_projects_is_rejected() {
        let fs = FeatureSet::new(vec![tile_feature("P1", "T1", 0.0, 0.0), tile_feature("P2", "T1", 0.0, 0.0)]);
        let err = TileIndex::from_features(&fs, "gmw_prj", "gmw_tile_name", Path::new("t")).unwrap_err();
        assert!(matches!(err, PipelineError::DataFormat { .. }));
    }

    #[test]
    fn shards_are_disjoint_and_complete() {
        let fs: FeatureSet = (0..7).map(|i| tile_feature(&format!("P{i}"), &format!("T{i}"), i as f64, 0.0)).collect();
        let idx = TileIndex::from_features(&fs, "gmw_prj", "gmw_tile_name", Path::new("t")).unwrap();
        let mut seen = Vec::new();
        for i in 0..3 {
            let sel = ProjectSelection { shard: Some((i, 3)), ..Default::default() };
            seen.extend(sel.apply(&idx).into_iter().map(|p| p.name.clone()));
        }
        seen.sort();
        let mut all: Vec<String> = idx.projects.iter().map(|p| p.name.clone()).collect();
        all.sort();
        assert_eq!(seen, all);
    }

    #[test]
    fn range_and_filter() {
        let idx = sample_index();
        let sel = ProjectSelection { start: 1, ..Default::default() };
        assert_eq!(sel.apply(&idx)[0].name, "P2");
        let sel = ProjectSelection { only: Some("P1".into()), ..Default::default() };
        assert_eq!(sel.apply(&idx).len(), 1);
        assert!(ProjectSelection { shard: Some((3, 3)), ..Default::default() }.validate().is_err());
    }

    #[test]
    fn shard_strings() {
        assert_eq!(ProjectSelection::parse_shard("1/4"), Ok((1, 4)));
        assert!(ProjectSelection::parse_shard("4/4").is_err());
        assert!(ProjectSelection::parse_shard("x/4").is_err());
        assert!(ProjectSelection::parse_shard("3").is_err());
    }
}
