//! Breakline attribution by nearest-point majority vote.
//!
//! Each vertex of a line looks up its nearest point in a snapshot index and
//! votes with that point's tag. The most frequent tag wins; ties go to the
//! tag that was seen first. Geometry is stored as given.

use crate::error::{Result, TerrainError};
use crate::fields::resolve_name_field;
use crate::index::SpatialPointIndex;
use crate::ingest::{round_coord, text_property};
use crate::source::{SourceCollection, SourceGeometry};
use geo::{Euclidean, Length};
use geo_types::LineString;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use tinstore::{BreaklineRecord, PointRecord, Softness};

#[derive(Debug, Clone, Default)]
pub struct BreaklineOptions {
    /// Preferred name field; falls back to a case-insensitive `name` field.
    pub name_field: Option<String>,
    /// Accepted for compatibility; vertices are never moved.
    pub snap_tolerance: Option<f64>,
}

/// Build the nearest-neighbour snapshot used for attribution. Keys are
/// positions in `points`.
pub fn build_point_index(points: &[PointRecord], include_all: bool) -> SpatialPointIndex {
    SpatialPointIndex::bulk_load(
        points
            .iter()
            .enumerate()
            .filter(|(_, p)| include_all || p.contourable)
            .map(|(i, p)| ([p.x, p.y], i)),
    )
}

/// Most frequent tag; ties resolve to the first tag encountered.
pub fn dominant_code<'a, I>(tags: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: SmallVec<[(&'a str, usize); 8]> = SmallVec::new();
    let mut slots: hashbrown::HashMap<&'a str, usize> = hashbrown::HashMap::new();

    for tag in tags {
        match slots.get(tag) {
            Some(&slot) => counts[slot].1 += 1,
            None => {
                slots.insert(tag, counts.len());
                counts.push((tag, 1));
            }
        }
    }

    let mut best: Option<(&'a str, usize)> = None;
    for &(tag, count) in &counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((tag, count));
        }
    }

    best.map(|(tag, _)| tag)
}

/// A source line ready for attribution.
struct LineInput<'s> {
    feature: usize,
    vertices: &'s [[f64; 2]],
    properties: &'s Map<String, Value>,
}

pub struct BreaklineAttributor {
    options: BreaklineOptions,
}

impl BreaklineAttributor {
    pub fn new(options: BreaklineOptions) -> Self {
        Self { options }
    }

    /// Attribute every line of `source` against `index`, whose keys are
    /// positions in `points`.
    pub fn attribute(
        &self,
        source: &SourceCollection,
        index: &SpatialPointIndex,
        points: &[PointRecord],
    ) -> Result<Vec<BreaklineRecord>> {
        if index.is_empty() {
            return Err(TerrainError::InsufficientData(
                "no points available to attribute breaklines".to_string(),
            ));
        }

        if let Some(snap) = self.options.snap_tolerance {
            warn!("Snap tolerance {} accepted but vertices are not snapped", snap);
        }

        let names = source.field_names();
        let name_field = resolve_name_field(&names, self.options.name_field.as_deref());

        let lines = collect_lines(source)?;

        debug!(
            "Attributing {} lines from {} features against {} points (name field {:?})",
            lines.len(),
            source.len(),
            index.len(),
            name_field
        );

        let records = lines
            .par_iter()
            .map(|line| attribute_line(line, index, points, name_field))
            .collect::<Result<Vec<_>>>()?;

        info!("Attributed {} breaklines", records.len());

        Ok(records)
    }
}

fn collect_lines(source: &SourceCollection) -> Result<Vec<LineInput<'_>>> {
    let mut lines = Vec::with_capacity(source.len());

    for (i, feature) in source.features.iter().enumerate() {
        let parts: SmallVec<[&[[f64; 2]]; 1]> = match &feature.geometry {
            Some(SourceGeometry::LineString(vertices)) => {
                SmallVec::from_elem(vertices.as_slice(), 1)
            }
            Some(SourceGeometry::MultiLineString(parts)) => {
                parts.iter().map(Vec::as_slice).collect()
            }
            Some(other) => {
                return Err(TerrainError::malformed(
                    i,
                    format!("expected LineString geometry, found {}", other.type_name()),
                ))
            }
            None => return Err(TerrainError::malformed(i, "feature has no geometry")),
        };

        for vertices in parts {
            if vertices.len() < 2 {
                return Err(TerrainError::malformed(
                    i,
                    format!("line has {} vertices, need at least 2", vertices.len()),
                ));
            }

            lines.push(LineInput {
                feature: i,
                vertices,
                properties: &feature.properties,
            });
        }
    }

    Ok(lines)
}

fn attribute_line(
    line: &LineInput<'_>,
    index: &SpatialPointIndex,
    points: &[PointRecord],
    name_field: Option<&str>,
) -> Result<BreaklineRecord> {
    let mut tags: SmallVec<[&str; 16]> = SmallVec::with_capacity(line.vertices.len());

    for &vertex in line.vertices {
        let point = index
            .nearest(vertex)
            .and_then(|hit| points.get(hit.key))
            .ok_or_else(|| {
                TerrainError::InvalidParameter(
                    "point index does not match the point records".to_string(),
                )
            })?;
        tags.push(point.code.as_str());
    }

    // Non-empty by construction: at least two vertices, each with a tag.
    let code = dominant_code(tags.iter().copied())
        .unwrap_or_default()
        .to_string();

    let vertex_count = u32::try_from(line.vertices.len())
        .map_err(|_| TerrainError::malformed(line.feature, "too many vertices"))?;

    let length = LineString::from(line.vertices.to_vec()).length::<Euclidean>();

    Ok(BreaklineRecord {
        vertices: line.vertices.to_vec(),
        code,
        name: name_field.and_then(|f| text_property(line.properties, f)),
        length: round_coord(length),
        vertex_count,
        softness: Softness::Soft,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFeature;
    use serde_json::json;

    fn pt(seq: u32, x: f64, y: f64, code: &str, contourable: bool) -> PointRecord {
        PointRecord {
            seq,
            x,
            y,
            z: 0.0,
            code: code.to_string(),
            comment: None,
            contourable,
        }
    }

    fn line(vertices: Vec<[f64; 2]>, props: Value) -> SourceFeature {
        SourceFeature {
            geometry: Some(SourceGeometry::LineString(vertices)),
            properties: props.as_object().cloned().unwrap_or_default(),
        }
    }

    fn points() -> Vec<PointRecord> {
        vec![
            pt(1, 0.0, 0.0, "TOE", true),
            pt(2, 10.0, 0.0, "TOP", true),
            pt(3, 20.0, 0.0, "TOP", true),
            pt(4, 30.0, 0.0, "KERB", false),
        ]
    }

    #[test]
    fn test_dominant_code_tie_goes_to_first_seen() {
        assert_eq!(dominant_code(["B", "A"]), Some("B"));
        assert_eq!(dominant_code(["A", "B", "B", "A", "C"]), Some("A"));
        assert_eq!(dominant_code(["A", "B", "B"]), Some("B"));
        assert_eq!(dominant_code(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_every_vertex_votes() {
        let pts = points();
        let index = build_point_index(&pts, false);
        let src = SourceCollection::from_features(
            vec![line(
                vec![[0.1, 0.0], [9.0, 0.0], [19.0, 1.0], [19.0, 1.0]],
                json!({ "Name": "crest" }),
            )],
            None,
        );

        let records = BreaklineAttributor::new(BreaklineOptions::default())
            .attribute(&src, &index, &pts)
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "TOP");
        assert_eq!(records[0].name.as_deref(), Some("crest"));
        assert_eq!(records[0].vertex_count, 4);
        assert_eq!(records[0].softness, Softness::Soft);
        assert_eq!(records[0].vertices[0], [0.1, 0.0]);
    }

    #[test]
    fn test_two_vertex_tie_uses_first_vertex() {
        let pts = points();
        let index = build_point_index(&pts, false);
        let src = SourceCollection::from_features(
            vec![line(vec![[0.0, 1.0], [10.0, 1.0]], json!({}))],
            None,
        );

        let records = BreaklineAttributor::new(BreaklineOptions::default())
            .attribute(&src, &index, &pts)
            .unwrap();

        assert_eq!(records[0].code, "TOE");
        assert_eq!(records[0].name, None);
        assert_eq!(records[0].length, 10.0);
    }

    #[test]
    fn test_non_contourable_points_only_with_include_all() {
        let pts = points();
        let src = SourceCollection::from_features(
            vec![line(vec![[30.0, 0.0], [31.0, 0.0]], json!({}))],
            None,
        );
        let attributor = BreaklineAttributor::new(BreaklineOptions::default());

        let contourable = attributor
            .attribute(&src, &build_point_index(&pts, false), &pts)
            .unwrap();
        assert_eq!(contourable[0].code, "TOP");

        let all = attributor
            .attribute(&src, &build_point_index(&pts, true), &pts)
            .unwrap();
        assert_eq!(all[0].code, "KERB");
    }

    #[test]
    fn test_coincident_points_vote_for_the_earlier_record() {
        let mut pts = vec![
            pt(1, 5.0, 5.0, "EDGE", true),
            pt(2, 5.0, 5.0, "KERB", false),
        ];
        for seq in 3..40 {
            pts.push(pt(seq, 5.0, 5.0, "KERB", false));
        }
        let src = SourceCollection::from_features(
            vec![line(vec![[5.0, 4.0], [5.0, 6.0], [5.0, 5.0]], json!({}))],
            None,
        );
        let attributor = BreaklineAttributor::new(BreaklineOptions::default());

        let records = attributor
            .attribute(&src, &build_point_index(&pts, true), &pts)
            .unwrap();
        assert_eq!(records[0].code, "EDGE");

        pts.reverse();
        let records = attributor
            .attribute(&src, &build_point_index(&pts, true), &pts)
            .unwrap();
        assert_eq!(records[0].code, "KERB");
    }

    #[test]
    fn test_multilinestring_parts_and_length() {
        let pts = points();
        let src = SourceCollection::from_features(
            vec![SourceFeature {
                geometry: Some(SourceGeometry::MultiLineString(vec![
                    vec![[0.0, 0.0], [3.0, 4.0]],
                    vec![[20.0, 0.0], [20.0, 2.5], [20.0, 5.0]],
                ])),
                properties: Map::new(),
            }],
            None,
        );

        let records = BreaklineAttributor::new(BreaklineOptions::default())
            .attribute(&src, &build_point_index(&pts, false), &pts)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].length, 5.0);
        assert_eq!(records[1].code, "TOP");
        assert_eq!(records[1].vertex_count, 3);
    }

    #[test]
    fn test_rejects_bad_lines_and_empty_index() {
        let pts = points();
        let index = build_point_index(&pts, false);
        let attributor = BreaklineAttributor::new(BreaklineOptions::default());

        let short = SourceCollection::from_features(vec![line(vec![[0.0, 0.0]], json!({}))], None);
        assert!(matches!(
            attributor.attribute(&short, &index, &pts).unwrap_err(),
            TerrainError::MalformedRecord { record: 0, .. }
        ));

        let polygon = SourceCollection::from_features(
            vec![SourceFeature {
                geometry: Some(SourceGeometry::Other("Polygon")),
                properties: Map::new(),
            }],
            None,
        );
        assert!(attributor.attribute(&polygon, &index, &pts).is_err());

        let ok = SourceCollection::from_features(
            vec![line(vec![[0.0, 0.0], [1.0, 0.0]], json!({}))],
            None,
        );
        assert!(matches!(
            attributor
                .attribute(&ok, &SpatialPointIndex::new(), &pts)
                .unwrap_err(),
            TerrainError::InsufficientData(_)
        ));
    }
}
