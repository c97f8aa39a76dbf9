//! Per-project class balancing and the split of the balanced sets over tiles.
//!
//! Balancing is global to a project: every class is cut to the same size
//! `n = min(|1|, |2|, |3|, cap)`. Tiles then take whatever part of each
//! balanced class falls inside them, so a tile may carry one, two or three
//! classes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::SamplingConfig;
use crate::error::{PipelineError, Result};
use crate::geometry::{BBox, Coord, Geometry, RegionIndex};
use crate::remote::{ClassSamples, ExtractionRequest, ImageryRef};
use crate::sampling::take_sample;
use crate::tiles::Tile;
use crate::vector::{read_vector, FeatureSet};

/// One class subset, labelled.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSubset {
    pub label: String,
    pub features: FeatureSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalancedSampleSet {
    /// Common size of every class.
    pub n: usize,
    /// Classes in label order.
    pub classes: Vec<ClassSubset>,
}

impl BalancedSampleSet {
    /// Labels whose input subset was empty, forcing `n` to zero.
    pub fn empty_labels(&self) -> Vec<&str> {
        if self.n > 0 {
            return Vec::new();
        }
        self.classes
            .iter()
            .filter(|c| c.features.is_empty())
            .map(|c| c.label.as_str())
            .collect()
    }
}

/// A tile and the balanced samples inside it. Only non-empty classes are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct TileExtractionUnit {
    pub project: String,
    pub tile: String,
    pub region: BBox,
    pub classes: Vec<ClassSamples>,
}

impl TileExtractionUnit {
    pub fn labels(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.label.as_str()).collect()
    }

    pub fn n_samples(&self) -> usize {
        self.classes.iter().map(|c| c.geometries.len()).sum()
    }

    pub fn into_request(self, job_name: String, imagery: ImageryRef, export_folder: &str) -> ExtractionRequest {
        ExtractionRequest {
            job_name,
            project: self.project,
            tile: self.tile,
            region: self.region,
            classes: self.classes,
            imagery,
            class_property: "class".into(),
            export_folder: export_folder.to_string(),
            file_format: "CSV".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BalancedSampleSelector {
    pub cap: usize,
    pub seed: u64,
    /// Target, negative-A, negative-B.
    pub labels: [String; 3],
}

impl BalancedSampleSelector {
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            cap: config.class_cap,
            seed: config.seed,
            labels: config.class_labels.clone(),
        }
    }

    /// Read the three class files of `unit`. All must exist; none is read
    /// when one is missing.
    pub fn load(&self, unit: &str, paths: &[PathBuf; 3]) -> Result<Vec<ClassSubset>> {
        let missing: Vec<PathBuf> = paths.iter().filter(|p| !p.exists()).cloned().collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingDependency { unit: unit.to_string(), missing });
        }
        self.labels
            .iter()
            .zip(paths)
            .map(|(label, path)| {
                Ok(ClassSubset {
                    label: label.clone(),
                    features: read_vector(path, None)?,
                })
            })
            .collect()
    }

    /// Cut every class to the common size. Each class draws from its own
    /// random source seeded with the shared seed.
    pub fn balance(&self, classes: Vec<ClassSubset>) -> BalancedSampleSet {
        let n = classes
            .iter()
            .map(|c| c.features.len())
            .min()
            .unwrap_or(0)
            .min(self.cap);
        let classes = classes
            .into_iter()
            .map(|c| ClassSubset {
                features: FeatureSet::new(take_sample(&c.features.features, n, self.seed)),
                label: c.label,
            })
            .collect();
        BalancedSampleSet { n, classes }
    }

    /// Distribute the balanced set over `tiles`. Each sample lands in exactly
    /// one tile (see [`RegionIndex::locate`]); multi-point samples are split
    /// member by member. The result lines up with `tiles`, holding `None`
    /// where no class has a sample.
    pub fn tile_units(&self, set: &BalancedSampleSet, project: &str, tiles: &[Tile]) -> Vec<Option<TileExtractionUnit>> {
        let index = RegionIndex::new(tiles.iter().map(|t| &t.geometry));
        let mut per_tile: Vec<Vec<Vec<Geometry>>> = vec![vec![Vec::new(); set.classes.len()]; tiles.len()];
        for (k, class) in set.classes.iter().enumerate() {
            for g in class.features.iter().filter_map(|f| f.geometry.as_ref()) {
                if let Geometry::MultiPoint(pts) = g {
                    let mut parts: BTreeMap<usize, Vec<Coord>> = BTreeMap::new();
                    for &p in pts {
                        if let Some(t) = index.locate_point(p) {
                            parts.entry(t).or_default().push(p);
                        }
                    }
                    for (t, pts) in parts {
                        per_tile[t][k].push(Geometry::MultiPoint(pts));
                    }
                } else if let Some(t) = index.locate(g) {
                    per_tile[t][k].push(g.clone());
                }
            }
        }

        tiles
            .iter()
            .zip(per_tile)
            .map(|(tile, geometries)| {
                let classes: Vec<ClassSamples> = set
                    .classes
                    .iter()
                    .zip(geometries)
                    .filter(|(_, g)| !g.is_empty())
                    .map(|(c, geometries)| ClassSamples { label: c.label.clone(), geometries })
                    .collect();
                (!classes.is_empty()).then(|| TileExtractionUnit {
                    project: project.to_string(),
                    tile: tile.name.clone(),
                    region: tile.bbox,
                    classes,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Coord;
    use crate::vector::testutil::point;
    use crate::vector::write_vector;
    use serde_json::json;

    fn selector() -> BalancedSampleSelector {
        BalancedSampleSelector::new(&SamplingConfig::default())
    }

    /// `n` points spread along the diagonal of [x0, x0+1]^2.
    fn class(label: &str, n: usize, x0: f64) -> ClassSubset {
        let step = 1.0 / (n as f64 + 1.0);
        ClassSubset {
            label: label.into(),
            features: (0..n)
                .map(|i| {
                    let t = (i as f64 + 1.0) * step;
                    point(x0 + t, t, &[("id", json!(i))])
                })
                .collect(),
        }
    }

    fn classes(sizes: [usize; 3]) -> Vec<ClassSubset> {
        vec![class("1", sizes[0], 0.0), class("2", sizes[1], 1.0), class("3", sizes[2], 2.0)]
    }

    fn tile(name: &str, x: f64) -> Tile {
        let bbox = BBox::new(x, 0.0, x + 1.0, 1.0);
        Tile { name: name.into(), geometry: Geometry::Polygon(bbox.to_polygon()), bbox }
    }

    #[test]
    fn smallest_class_sets_the_size() {
        let a = selector().balance(classes([50, 30, 80]));
        assert_eq!(a.n, 30);
        assert!(a.classes.iter().all(|c| c.features.len() == 30));
        let b = selector().balance(classes([50, 30, 80]));
        assert_eq!(a, b);
    }

    #[test]
    fn size_is_capped() {
        let set = selector().balance(classes([20_000, 15_000, 30_000]));
        assert_eq!(set.n, 10_000);
        assert!(set.classes.iter().all(|c| c.features.len() == 10_000));
    }

    #[test]
    fn empty_class_collapses_the_set() {
        let set = selector().balance(classes([10, 0, 5]));
        assert_eq!(set.n, 0);
        assert_eq!(set.empty_labels(), vec!["2"]);
    }

    #[test]
    fn tile_with_only_negative_a_yields_single_class_unit() {
        let sel = selector();
        let set = sel.balance(classes([40, 40, 40]));
        let tiles = [tile("T1", 0.0), tile("T2", 1.0), tile("T9", 10.0)];
        let units = sel.tile_units(&set, "P1", &tiles);
        assert_eq!(units.len(), 3);
        let t2 = units[1].as_ref().unwrap();
        assert_eq!(t2.tile, "T2");
        assert_eq!(t2.labels(), vec!["2"]);
        assert_eq!(t2.n_samples(), 40);
        assert!(units[2].is_none());
    }

    #[test]
    fn tile_straddling_classes_keeps_each_present_class() {
        let sel = selector();
        let set = sel.balance(classes([40, 40, 40]));
        let wide = {
            let bbox = BBox::new(0.5, 0.0, 1.5, 1.0);
            Tile { name: "W".into(), geometry: Geometry::Polygon(bbox.to_polygon()), bbox }
        };
        let units = sel.tile_units(&set, "P1", std::slice::from_ref(&wide));
        let unit = units[0].as_ref().unwrap();
        assert_eq!(unit.labels(), vec!["1", "2"]);
        for c in &unit.classes {
            for g in &c.geometries {
                let Coord { x, .. } = g.points()[0];
                assert!((0.5..1.5).contains(&x));
            }
        }
    }

    #[test]
    fn every_sample_lands_in_one_tile() {
        let sel = selector();
        let square = |x0: f64| Geometry::Polygon(BBox::new(x0, 0.2, x0 + 0.4, 0.6).to_polygon());
        let spread = Geometry::MultiPoint(vec![Coord::new(0.5, 0.5), Coord::new(1.5, 0.5), Coord::new(0.6, 0.5)]);
        let subset = |geoms: Vec<Geometry>| -> FeatureSet {
            geoms.into_iter().map(|g| crate::vector::Feature::new(Some(g), Default::default())).collect()
        };
        let set = BalancedSampleSet {
            n: 2,
            classes: vec![
                ClassSubset { label: "1".into(), features: subset(vec![square(0.8), spread]) },
                ClassSubset { label: "2".into(), features: subset(vec![square(1.2), square(0.1)]) },
            ],
        };
        let units = sel.tile_units(&set, "P1", &[tile("T1", 0.0), tile("T2", 1.0)]);
        let t1 = units[0].as_ref().unwrap();
        let t2 = units[1].as_ref().unwrap();
        // The polygon crossing x = 1 starts in T1 and stays there.
        assert_eq!(t1.classes[0].geometries[0], square(0.8));
        assert_eq!(t1.classes[0].geometries[1], Geometry::MultiPoint(vec![Coord::new(0.5, 0.5), Coord::new(0.6, 0.5)]));
        assert_eq!(t2.classes[0].geometries, vec![Geometry::MultiPoint(vec![Coord::new(1.5, 0.5)])]);
        assert_eq!(t1.n_samples() + t2.n_samples(), 5);
        assert_eq!(t2.classes[1].geometries, vec![square(1.2)]);
    }

    #[test]
    fn missing_class_files_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ["1", "2", "3"].map(|l| dir.path().join(format!("p_{l}.geojson")));
        write_vector(&paths[0], None, &class("1", 3, 0.0).features).unwrap();
        let err = selector().load("p", &paths).unwrap_err();
        match err {
            PipelineError::MissingDependency { unit, missing } => {
                assert_eq!(unit, "p");
                assert_eq!(missing, paths[1..].to_vec());
            }
            other => panic!("unexpected {other:?}"),
        }
        for (i, p) in paths.iter().enumerate().skip(1) {
            write_vector(p, None, &class(&(i + 1).to_string(), 3, 0.0).features).unwrap();
        }
        let loaded = selector().load("p", &paths).unwrap();
        assert_eq!(loaded.iter().map(|c| c.label.as_str()).collect::<Vec<_>>(), vec!["1", "2", "3"]);
    }
}
