use std::io::Read;
use std::path::Path;

use serde_json::{json, Value};

use super::{default_layer_name, Attributes, Feature, FeatureSet};
use crate::compression::{open_reader, StagedWriter};
use crate::error::{IoContext, PipelineError, Result};
use crate::geometry::{Coord, Geometry, Polygon};

const LAYER_COLLECTION: &str = "LayerCollection";

// ── Geometry <-> JSON ────────────────────────────────────────────────────────

fn coord(v: &Value) -> std::result::Result<Coord, String> {
    let arr = v.as_array().ok_or("position is not an array")?;
    match (arr.first().and_then(Value::as_f64), arr.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Coord::new(x, y)),
        _ => Err(format!("invalid position {v}")),
    }
}

fn coords(v: &Value) -> std::result::Result<Vec<Coord>, String> {
    v.as_array().ok_or("expected an array of positions")?.iter().map(coord).collect()
}

fn polygon(v: &Value) -> std::result::Result<Polygon, String> {
    let rings = v.as_array().ok_or("polygon is not an array of rings")?;
    let mut rings = rings.iter().map(coords);
    let exterior = rings.next().ok_or("polygon has no exterior ring")??;
    let interiors = rings.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

/// Parse a GeoJSON geometry object. `null` yields `None`.
pub fn geometry_from_json(v: &Value) -> std::result::Result<Option<Geometry>, String> {
    if v.is_null() {
        return Ok(None);
    }
    let kind = v.get("type").and_then(Value::as_str).ok_or("geometry has no type")?;
    let c = v.get("coordinates").ok_or("geometry has no coordinates")?;
    let g = match kind {
        "Point" => Geometry::Point(coord(c)?),
        "MultiPoint" => Geometry::MultiPoint(coords(c)?),
        "Polygon" => Geometry::Polygon(polygon(c)?),
        "MultiPolygon" => Geometry::MultiPolygon(
            c.as_array()
                .ok_or("multipolygon is not an array")?
                .iter()
                .map(polygon)
                .collect::<std::result::Result<_, _>>()?,
        ),
        other => return Err(format!("unsupported geometry type '{other}'")),
    };
    Ok(Some(g))
}

fn pos(c: &Coord) -> Value {
    json!([c.x, c.y])
}

fn rings(p: &Polygon) -> Value {
    Value::Array(
        std::iter::once(&p.exterior)
            .chain(p.interiors.iter())
            .map(|r| Value::Array(r.iter().map(pos).collect()))
            .collect(),
    )
}

pub fn geometry_to_json(g: Option<&Geometry>) -> Value {
    match g {
        None => Value::Null,
        Some(Geometry::Point(c)) => json!({"type": "Point", "coordinates": pos(c)}),
        Some(Geometry::MultiPoint(pts)) => {
            json!({"type": "MultiPoint", "coordinates": pts.iter().map(pos).collect::<Vec<_>>()})
        }
        Some(Geometry::Polygon(p)) => json!({"type": "Polygon", "coordinates": rings(p)}),
        Some(Geometry::MultiPolygon(ps)) => {
            json!({"type": "MultiPolygon", "coordinates": ps.iter().map(rings).collect::<Vec<_>>()})
        }
    }
}

// ── Collections ──────────────────────────────────────────────────────────────

fn parse_collection(v: &Value, path: &Path) -> Result<FeatureSet> {
    let features = v
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::data_format(path, "FeatureCollection has no features array"))?;
    features
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let geometry = geometry_from_json(f.get("geometry").unwrap_or(&Value::Null))
                .map_err(|e| PipelineError::data_format(path, format!("feature {i}: {e}")))?;
            let attributes = match f.get("properties") {
                None | Some(Value::Null) => Attributes::new(),
                Some(Value::Object(m)) => m.clone(),
                Some(_) => return Err(PipelineError::data_format(path, format!("feature {i}: properties is not an object"))),
            };
            Ok(Feature::new(geometry, attributes))
        })
        .collect::<Result<Vec<_>>>()
        .map(FeatureSet::new)
}

fn collection_to_json(features: &FeatureSet, name: Option<&str>) -> Value {
    let mut doc = json!({
        "type": "FeatureCollection",
        "features": features
            .iter()
            .map(|f| json!({
                "type": "Feature",
                "geometry": geometry_to_json(f.geometry.as_ref()),
                "properties": Value::Object(f.attributes.clone()),
            }))
            .collect::<Vec<_>>(),
    });
    if let Some(n) = name {
        doc["name"] = json!(n);
    }
    doc
}

fn load(path: &Path) -> Result<Value> {
    let mut text = String::new();
    open_reader(path)?.read_to_string(&mut text).at(path)?;
    serde_json::from_str(&text).map_err(|e| PipelineError::data_format(path, e.to_string()))
}

fn store(path: &Path, doc: &Value) -> Result<()> {
    let mut w = StagedWriter::create(path)?;
    serde_json::to_writer(&mut w, doc).map_err(|e| PipelineError::io(path, e.into()))?;
    w.commit()
}

fn is_layered(doc: &Value) -> bool {
    doc.get("type").and_then(Value::as_str) == Some(LAYER_COLLECTION)
}

fn layers(doc: &Value, path: &Path) -> Result<Vec<(String, Value)>> {
    let arr = doc
        .get("layers")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::data_format(path, "LayerCollection has no layers array"))?;
    arr.iter()
        .map(|l| {
            let name = l
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::data_format(path, "layer without a name"))?;
            Ok((name.to_string(), l.clone()))
        })
        .collect()
}

pub(super) fn read(path: &Path, layer: Option<&str>) -> Result<FeatureSet> {
    let doc = load(path)?;
    if !is_layered(&doc) {
        return parse_collection(&doc, path);
    }
    let all = layers(&doc, path)?;
    let chosen = match layer {
        Some(name) => all.iter().find(|(n, _)| n == name),
        None if all.len() == 1 => all.first(),
        None => {
            return Err(PipelineError::data_format(
                path,
                format!("{} layers present, a layer name is required", all.len()),
            ))
        }
    };
    match chosen {
        Some((_, v)) => parse_collection(v, path),
        None => Err(PipelineError::data_format(path, format!("no layer named '{}'", layer.unwrap_or_default()))),
    }
}

pub(super) fn write(path: &Path, features: &FeatureSet) -> Result<()> {
    store(path, &collection_to_json(features, None))
}

pub(super) fn write_layer(path: &Path, name: &str, features: &FeatureSet) -> Result<()> {
    let mut existing = if path.exists() {
        let doc = load(path)?;
        if is_layered(&doc) {
            layers(&doc, path)?
        } else {
            let name = default_layer_name(path);
            let single = collection_to_json(&parse_collection(&doc, path)?, Some(&name));
            vec![(name, single)]
        }
    } else {
        Vec::new()
    };
    let fresh = collection_to_json(features, Some(name));
    match existing.iter_mut().find(|(n, _)| n == name) {
        Some(slot) => slot.1 = fresh,
        None => existing.push((name.to_string(), fresh)),
    }
    let doc = json!({
        "type": LAYER_COLLECTION,
        "layers": existing
            .into_iter()
            .map(|(n, mut v)| {
                v["name"] = json!(n);
                v
            })
            .collect::<Vec<_>>(),
    });
    store(path, &doc)
}

pub(super) fn list_layers(path: &Path) -> Result<Vec<String>> {
    let doc = load(path)?;
    if is_layered(&doc) {
        Ok(layers(&doc, path)?.into_iter().map(|(n, _)| n).collect())
    } else {
        Ok(vec![default_layer_name(path)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_json_round_trip_polygon_with_hole() {
        let v = json!({"type": "Polygon", "coordinates": [
            [[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0], [0.0, 0.0]],
            [[1.0, 1.0], [1.0, 2.0], [2.0, 2.0], [2.0, 1.0], [1.0, 1.0]]
        ]});
        let g = geometry_from_json(&v).unwrap().unwrap();
        assert_eq!(g.polygons()[0].interiors.len(), 1);
        assert_eq!(geometry_to_json(Some(&g)), v);
    }

    #[test]
    fn malformed_feature_is_reported_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.geojson");
        std::fs::write(
            &path,
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","geometry":{"type":"Point","coordinates":[1,2]},"properties":{}},
                {"type":"Feature","geometry":{"type":"Point","coordinates":["x",2]},"properties":{}}
            ]}"#,
        )
        .unwrap();
        let err = read(&path, None).unwrap_err();
        assert!(matches!(err, PipelineError::DataFormat { .. }));
        assert!(err.to_string().contains("feature 1"), "{err}");
    }

    #[test]
    fn unsupported_geometry_type_is_a_format_error() {
        let v = json!({"type": "LineString", "coordinates": [[0, 0], [1, 1]]});
        assert!(geometry_from_json(&v).is_err());
    }

    #[test]
    fn truncated_json_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.geojson");
        std::fs::write(&path, r#"{"type":"FeatureCollection","features":[{"#).unwrap();
        assert!(matches!(read(&path, None), Err(PipelineError::DataFormat { .. })));
    }
}
