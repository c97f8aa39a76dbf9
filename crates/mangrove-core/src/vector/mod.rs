//! Attributed vector features and the format-agnostic reader/writer.
//!
//! Two on-disk families are supported and picked from the path:
//! GeoJSON (`.geojson` / `.json`, optionally a multi-layer `LayerCollection`)
//! and a column-oriented document (any name carrying a `cols` token, e.g.
//! `prj_refs_smps.cols.sz`).

mod columnar;
mod geojson;

use std::path::Path;

use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::geometry::Geometry;

pub use geojson::{geometry_from_json, geometry_to_json};

pub type Attributes = serde_json::Map<String, Value>;

/// Largest magnitude below which every integral `f64` is exact.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Option<Geometry>,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(geometry: Option<Geometry>, attributes: Attributes) -> Self {
        Self { geometry, attributes }
    }

    /// Attribute rendered as a key string. Missing and null values give `None`.
    /// Integral floats render without a fraction, so `1.0` and `1` agree.
    pub fn attr_string(&self, column: &str) -> Option<String> {
        match self.attributes.get(column)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(match n.as_f64() {
                Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER => format!("{}", f as i64),
                _ => n.to_string(),
            }),
            other => Some(other.to_string()),
        }
    }

    /// Geometry present and not empty.
    pub fn has_geometry(&self) -> bool {
        self.geometry.as_ref().is_some_and(|g| !g.is_empty())
    }
}

/// An ordered collection of features, the in-memory form of one layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    pub features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    /// Distinct values of `column` in first-appearance order.
    /// Features without the attribute are ignored.
    pub fn unique_values(&self, column: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.features
            .iter()
            .filter_map(|f| f.attr_string(column))
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }

    /// Features whose `column` renders to `value`.
    pub fn filter_eq(&self, column: &str, value: &str) -> FeatureSet {
        FeatureSet::new(
            self.features
                .iter()
                .filter(|f| f.attr_string(column).as_deref() == Some(value))
                .cloned()
                .collect(),
        )
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        FeatureSet::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFormat {
    /// GeoJSON FeatureCollection, or a LayerCollection of named ones.
    GeoJson,
    /// Column-oriented document, optionally compressed.
    Columnar,
}

impl VectorFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_ascii_lowercase();
        let tokens: Vec<&str> = name.split('.').skip(1).collect();
        if tokens.contains(&"cols") {
            Ok(VectorFormat::Columnar)
        } else if tokens.last().is_some_and(|t| *t == "geojson" || *t == "json") {
            Ok(VectorFormat::GeoJson)
        } else {
            Err(PipelineError::data_format(path, "unrecognised vector format"))
        }
    }
}

/// Read one layer. `layer` selects from a multi-layer container and is
/// ignored by single-layer files.
pub fn read_vector(path: &Path, layer: Option<&str>) -> Result<FeatureSet> {
    match VectorFormat::from_path(path)? {
        VectorFormat::GeoJson => geojson::read(path, layer),
        VectorFormat::Columnar => columnar::read(path),
    }
}

/// Write one layer. With a `layer` name a GeoJSON target becomes (or is
/// extended as) a multi-layer container; other layers already in it are kept.
pub fn write_vector(path: &Path, layer: Option<&str>, features: &FeatureSet) -> Result<()> {
    match VectorFormat::from_path(path)? {
        VectorFormat::GeoJson => match layer {
            Some(name) => geojson::write_layer(path, name, features),
            None => geojson::write(path, features),
        },
        VectorFormat::Columnar => columnar::write(path, features),
    }
}

/// Names of the layers stored in a container file.
pub fn list_layers(path: &Path) -> Result<Vec<String>> {
    match VectorFormat::from_path(path)? {
        VectorFormat::GeoJson => geojson::list_layers(path),
        VectorFormat::Columnar => Ok(vec![default_layer_name(path)]),
    }
}

/// Layer name of a single-layer file: its name up to the first dot.
pub fn default_layer_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::geometry::Coord;

    pub fn point(x: f64, y: f64, attrs: &[(&str, Value)]) -> Feature {
        let mut a = Attributes::new();
        for (k, v) in attrs {
            a.insert((*k).to_string(), v.clone());
        }
        Feature::new(Some(Geometry::Point(Coord::new(x, y))), a)
    }
}
