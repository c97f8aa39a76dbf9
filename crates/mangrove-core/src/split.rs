//! Per-attribute splitting of one dataset, with optional dissolve.

use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::geometry::{Coord, Geometry, Polygon};
use crate::naming::NamePolicy;
use crate::vector::{write_vector, Attributes, Feature, FeatureSet, VectorFormat};

/// Where split subsets go. The two modes are exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// One named layer per value inside a single container file.
    Container { file: PathBuf },
    /// One file per value: `{dir}/{name}.{extension}`.
    Files { dir: PathBuf, extension: String },
}

impl OutputMode {
    /// Build a mode from loose flags, as a command line supplies them.
    pub fn from_flags(
        multi_layer: bool,
        container: Option<PathBuf>,
        dir: Option<PathBuf>,
        extension: Option<String>,
    ) -> Result<Self> {
        let cfg = |m: &str| Err(PipelineError::Configuration(m.to_string()));
        match (multi_layer, container, dir, extension) {
            (true, Some(file), None, None) => Ok(OutputMode::Container { file }),
            (true, None, _, _) => cfg("multi-layer output needs a container file"),
            (true, Some(_), _, _) => cfg("multi-layer output takes no directory or extension"),
            (false, None, Some(dir), Some(extension)) => Ok(OutputMode::Files { dir, extension }),
            (false, Some(_), _, _) => cfg("a container file requires multi-layer output"),
            (false, None, _, _) => cfg("file-per-value output needs a directory and an extension"),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let cfg = |m: String| Err(PipelineError::Configuration(m));
        match self {
            OutputMode::Container { file } => {
                if file.as_os_str().is_empty() {
                    return cfg("empty container path".into());
                }
                match VectorFormat::from_path(file) {
                    Ok(VectorFormat::GeoJson) => Ok(()),
                    _ => cfg(format!("{} cannot hold multiple layers", file.display())),
                }
            }
            OutputMode::Files { dir, extension } => {
                if dir.as_os_str().is_empty() || extension.is_empty() {
                    return cfg("file-per-value output needs a directory and an extension".into());
                }
                VectorFormat::from_path(Path::new(&format!("x.{extension}")))
                    .map(|_| ())
                    .map_err(|_| PipelineError::Configuration(format!("unknown vector extension '{extension}'")))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutput {
    pub value: String,
    /// Layer or file stem.
    pub name: String,
    pub path: PathBuf,
    pub count: usize,
}

/// Splits a dataset into one subset per distinct value of `column`.
#[derive(Debug, Clone)]
pub struct AttributeSplitter {
    pub column: String,
    pub mode: OutputMode,
    pub naming: NamePolicy,
    /// Merge each value's geometries into a single feature.
    pub dissolve: bool,
}

impl AttributeSplitter {
    pub fn split(&self, features: &FeatureSet, source: &Path) -> Result<Vec<SplitOutput>> {
        self.mode.validate()?;

        let usable: FeatureSet = features.iter().filter(|f| f.has_geometry()).cloned().collect();
        let dropped = features.len() - usable.len();
        if dropped > 0 {
            log::info!("{}: dropped {} features with empty geometry", source.display(), dropped);
        }
        let unlabelled = usable.iter().filter(|f| f.attr_string(&self.column).is_none()).count();
        if unlabelled > 0 {
            log::warn!("{}: {} features have no '{}' value", source.display(), unlabelled, self.column);
        }

        let values = usable.unique_values(&self.column);
        let names = self.naming.resolve(values.iter().map(String::as_str));
        let mut outputs = Vec::with_capacity(values.len());
        for value in values {
            let name = names.get(&value).cloned().unwrap_or_else(|| self.naming.name(&value));
            let mut subset = usable.filter_eq(&self.column, &value);
            if self.dissolve {
                let parts: Vec<Geometry> = subset.iter().filter_map(|f| f.geometry.clone()).collect();
                let geometry = dissolve_with_repair(&value, &parts)?;
                let mut attributes = Attributes::new();
                if let Some(v) = subset.features.first().and_then(|f| f.attributes.get(&self.column)) {
                    attributes.insert(self.column.clone(), v.clone());
                }
                subset = FeatureSet::new(vec![Feature::new(Some(geometry), attributes)]);
            }
            let path = match &self.mode {
                OutputMode::Container { file } => {
                    write_vector(file, Some(&name), &subset)?;
                    file.clone()
                }
                OutputMode::Files { dir, extension } => {
                    let path = dir.join(format!("{name}.{extension}"));
                    write_vector(&path, None, &subset)?;
                    path
                }
            };
            log::debug!("{} = {}: {} features -> {}", self.column, value, subset.len(), name);
            outputs.push(SplitOutput { value, name, path, count: subset.len() });
        }
        Ok(outputs)
    }
}

/// Merge geometries of one kind into a multi-geometry. Fails on invalid or
/// mixed input.
fn dissolve(parts: &[Geometry]) -> std::result::Result<Geometry, String> {
    let mut points: Vec<Coord> = Vec::new();
    let mut polygons: Vec<Polygon> = Vec::new();
    for (i, g) in parts.iter().enumerate() {
        g.validate().map_err(|e| format!("part {i}: {e}"))?;
        points.extend_from_slice(g.points());
        polygons.extend_from_slice(g.polygons());
    }
    match (points.is_empty(), polygons.is_empty()) {
        (false, true) => Ok(Geometry::MultiPoint(points)),
        (true, false) => Ok(Geometry::MultiPolygon(polygons)),
        (true, true) => Err("no geometry left to dissolve".into()),
        (false, false) => Err("cannot dissolve points together with polygons".into()),
    }
}

/// Dissolve; on failure run the zero-width repair once and retry.
pub fn dissolve_with_repair(value: &str, parts: &[Geometry]) -> Result<Geometry> {
    match dissolve(parts) {
        Ok(g) => Ok(g),
        Err(first) => {
            log::warn!("dissolve of '{value}' failed ({first}), retrying after repair");
            let repaired: Vec<Geometry> = parts.iter().filter_map(Geometry::repaired).collect();
            dissolve(&repaired).map_err(|reason| PipelineError::GeometryRepair { value: value.to_string(), reason })
        }
    }
}
