//! Column-oriented feature document: one array per attribute plus a geometry
//! column. Null cells are treated as absent attributes.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{geojson, Attributes, Feature, FeatureSet};
use crate::compression::{open_reader, StagedWriter};
use crate::error::{IoContext, PipelineError, Result};

const FORMAT_TAG: &str = "mangrove-columnar";

#[derive(Serialize, Deserialize)]
struct Column {
    name: String,
    values: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct Document {
    format: String,
    rows: usize,
    columns: Vec<Column>,
    geometry: Vec<Value>,
}

pub(super) fn read(path: &Path) -> Result<FeatureSet> {
    let mut text = String::new();
    open_reader(path)?.read_to_string(&mut text).at(path)?;
    let doc: Document = serde_json::from_str(&text).map_err(|e| PipelineError::data_format(path, e.to_string()))?;
    if doc.format != FORMAT_TAG {
        return Err(PipelineError::data_format(path, format!("unexpected format tag '{}'", doc.format)));
    }
    if doc.geometry.len() != doc.rows {
        return Err(PipelineError::data_format(path, "geometry column length does not match row count"));
    }
    if let Some(c) = doc.columns.iter().find(|c| c.values.len() != doc.rows) {
        return Err(PipelineError::data_format(path, format!("column '{}' length does not match row count", c.name)));
    }

    let mut features = Vec::with_capacity(doc.rows);
    for (i, g) in doc.geometry.iter().enumerate() {
        let geometry = geojson::geometry_from_json(g).map_err(|e| PipelineError::data_format(path, format!("row {i}: {e}")))?;
        let mut attributes = Attributes::new();
        for c in &doc.columns {
            if !c.values[i].is_null() {
                attributes.insert(c.name.clone(), c.values[i].clone());
            }
        }
        features.push(Feature::new(geometry, attributes));
    }
    Ok(FeatureSet::new(features))
}

pub(super) fn write(path: &Path, features: &FeatureSet) -> Result<()> {
    let names: BTreeSet<&String> = features.iter().flat_map(|f| f.attributes.keys()).collect();
    let columns = names
        .into_iter()
        .map(|name| Column {
            name: name.clone(),
            values: features
                .iter()
                .map(|f| f.attributes.get(name).cloned().unwrap_or(Value::Null))
                .collect(),
        })
        .collect();
    let doc = Document {
        format: FORMAT_TAG.to_string(),
        rows: features.len(),
        columns,
        geometry: features.iter().map(|f| geojson::geometry_to_json(f.geometry.as_ref())).collect(),
    };
    let mut w = StagedWriter::create(path)?;
    serde_json::to_writer(&mut w, &doc).map_err(|e| PipelineError::io(path, e.into()))?;
    w.commit()
}
