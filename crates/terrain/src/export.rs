//! GeoJSON export of stored layers.

use crate::error::Result;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value as GeoValue};
use serde_json::{json, Value};
use std::io::Write;
use tinstore::{BoundaryRecord, BreaklineRecord, LayerData, PointRecord};

fn feature(geometry: GeoValue, properties: Value) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geometry)),
        id: None,
        properties: properties.as_object().cloned(),
        foreign_members: None,
    }
}

fn point_feature(p: &PointRecord) -> Feature {
    feature(
        GeoValue::Point(vec![p.x, p.y, p.z]),
        json!({
            "seq": p.seq,
            "code": p.code,
            "comment": p.comment,
            "contourable": p.contourable,
        }),
    )
}

fn breakline_feature(b: &BreaklineRecord) -> Feature {
    feature(
        GeoValue::LineString(b.vertices.iter().map(|v| v.to_vec()).collect()),
        json!({
            "code": b.code,
            "name": b.name,
            "length": b.length,
            "vertex_count": b.vertex_count,
            "softness": b.softness.as_str(),
        }),
    )
}

fn boundary_feature(b: &BoundaryRecord) -> Feature {
    feature(
        GeoValue::Polygon(vec![b.ring.iter().map(|v| v.to_vec()).collect()]),
        json!({
            "area": b.area,
            "perimeter": b.perimeter,
            "vertex_count": b.vertex_count,
        }),
    )
}

/// Build a FeatureCollection for `data`. The CRS, if any, is written as a
/// legacy named `crs` member.
pub fn layer_to_collection(data: &LayerData, crs: Option<&str>) -> FeatureCollection {
    let features = match data {
        LayerData::Points(v) => v.iter().map(point_feature).collect(),
        LayerData::Breaklines(v) => v.iter().map(breakline_feature).collect(),
        LayerData::Boundary(v) => v.iter().map(boundary_feature).collect(),
    };

    let foreign_members = crs.map(|name| {
        let mut members = JsonObject::new();
        members.insert(
            "crs".to_string(),
            json!({ "type": "name", "properties": { "name": name } }),
        );
        members
    });

    FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    }
}

pub fn write_geojson<W: Write>(writer: W, data: &LayerData, crs: Option<&str>) -> Result<()> {
    serde_json::to_writer(writer, &layer_to_collection(data, crs))?;
    Ok(())
}
