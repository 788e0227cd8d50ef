//! Point ingestion with tolerance-based duplicate detection.
//!
//! Points are processed in source order against an index that only ever
//! holds *accepted* points. A point within tolerance of an indexed point is
//! flagged non-contourable and is never indexed itself, so later points are
//! compared against accepted points only. The resulting duplicate relation
//! is deliberately order dependent and not symmetric: if B duplicates A and
//! C is near B but not A, C is accepted.

use crate::error::{Result, TerrainError};
use crate::fields::{resolve_elevation_field, resolve_field, resolve_tag_field};
use crate::index::SpatialPointIndex;
use crate::progress::Tick;
use crate::source::{SourceCollection, SourceGeometry};
use log::{debug, info};
use serde_json::{Map, Value};
use tinstore::PointRecord;

/// Decimal places kept for stored coordinates and elevations.
pub const COORD_DECIMALS: i32 = 3;

/// Elevation value marking "no elevation surveyed".
pub const ELEVATION_SENTINEL: f64 = -999.0;

/// Default planar duplicate tolerance, in source units.
pub const DEFAULT_DUPLICATE_TOLERANCE: f64 = 0.01;

const PROGRESS_EVERY: usize = 100_000;

/// Round to [`COORD_DECIMALS`] places.
#[inline]
pub fn round_coord(v: f64) -> f64 {
    let scale = 10f64.powi(COORD_DECIMALS);
    (v * scale).round() / scale
}

#[derive(Debug, Clone)]
pub struct PointIngestOptions {
    /// Preferred elevation field; resolved heuristically when absent.
    pub elevation_field: Option<String>,
    /// Preferred classification tag field; resolved heuristically when absent.
    pub tag_field: Option<String>,
    /// Field whose value seeds the record annotation.
    pub comment_field: Option<String>,
    /// Take elevations from the geometry's z instead of an attribute.
    pub use_geometry_z: bool,
    pub duplicate_tolerance: f64,
}

impl Default for PointIngestOptions {
    fn default() -> Self {
        Self {
            elevation_field: None,
            tag_field: None,
            comment_field: None,
            use_geometry_z: false,
            duplicate_tolerance: DEFAULT_DUPLICATE_TOLERANCE,
        }
    }
}

/// Counters reported after an ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub total: usize,
    pub duplicates: usize,
    pub missing_elevation: usize,
    pub indexed: usize,
}

pub struct PointIngestor {
    options: PointIngestOptions,
}

impl PointIngestor {
    pub fn new(options: PointIngestOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PointIngestOptions {
        &self.options
    }

    /// Build the ordered point record set for `source`.
    pub fn ingest(
        &self,
        source: &SourceCollection,
        existing_has_data: bool,
        overwrite: bool,
    ) -> Result<Vec<PointRecord>> {
        self.ingest_with_stats(source, existing_has_data, overwrite)
            .map(|(records, _)| records)
    }

    pub fn ingest_with_stats(
        &self,
        source: &SourceCollection,
        existing_has_data: bool,
        overwrite: bool,
    ) -> Result<(Vec<PointRecord>, IngestStats)> {
        if existing_has_data && !overwrite {
            return Err(TerrainError::Precondition(
                "point layer already holds data; pass overwrite to replace it".to_string(),
            ));
        }

        let tolerance = self.options.duplicate_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(TerrainError::InvalidParameter(format!(
                "duplicate tolerance must be a non-negative number, got {}",
                tolerance
            )));
        }

        let names = source.field_names();

        let elevation_field = resolve_elevation_field(
            &names,
            self.options.elevation_field.as_deref(),
            self.options.use_geometry_z,
        );

        let tag_field = resolve_tag_field(&names, self.options.tag_field.as_deref())
            .ok_or_else(|| {
                TerrainError::FieldResolution(format!(
                    "no tag field (requested {:?}) among {:?}",
                    self.options.tag_field, names
                ))
            })?;

        let comment_field = self
            .options
            .comment_field
            .as_deref()
            .and_then(|name| resolve_field(&names, Some(name), &[]));

        info!(
            "Ingesting {} points: elevation from {}, tag from '{}', tolerance {}",
            source.len(),
            elevation_field
                .map(|f| format!("field '{}'", f))
                .unwrap_or_else(|| "geometry z".to_string()),
            tag_field,
            tolerance
        );

        let mut index = SpatialPointIndex::new();
        let mut records = Vec::with_capacity(source.len());
        let mut stats = IngestStats::default();
        let mut tick = Tick::new(PROGRESS_EVERY);

        for (i, feature) in source.features.iter().enumerate() {
            let seq = u32::try_from(i + 1)
                .map_err(|_| TerrainError::malformed(i, "too many points for one batch"))?;

            let (x, y, geom_z) = match &feature.geometry {
                Some(SourceGeometry::Point { x, y, z }) => (*x, *y, *z),
                Some(other) => {
                    return Err(TerrainError::malformed(
                        i,
                        format!("expected Point geometry, found {}", other.type_name()),
                    ))
                }
                None => return Err(TerrainError::malformed(i, "feature has no geometry")),
            };

            let x = round_coord(x);
            let y = round_coord(y);

            let (raw_z, no_elevation) = match elevation_field {
                Some(field) => {
                    let z = numeric_property(&feature.properties, field, i)?;
                    (z, z == ELEVATION_SENTINEL)
                }
                None => {
                    let z = geom_z.ok_or_else(|| {
                        TerrainError::malformed(i, "geometry has no z coordinate")
                    })?;
                    (z, false)
                }
            };

            let code = text_property(&feature.properties, tag_field).ok_or_else(|| {
                TerrainError::malformed(i, format!("missing tag value in '{}'", tag_field))
            })?;

            let mut comment = comment_field.and_then(|f| text_property(&feature.properties, f));

            let duplicate = match index.nearest_within([x, y], tolerance) {
                Some(hit) => {
                    if comment.is_none() {
                        comment = Some(format!("duplicate of {}", hit.key));
                    }
                    stats.duplicates += 1;
                    true
                }
                None => {
                    index.insert([x, y], seq as usize);
                    false
                }
            };

            if no_elevation {
                stats.missing_elevation += 1;
            }

            records.push(PointRecord {
                seq,
                x,
                y,
                z: round_coord(raw_z),
                code,
                comment,
                contourable: !duplicate && !no_elevation,
            });

            if tick.should(i + 1) {
                info!(
                    "Points processed {:>9}, duplicates {:>7}, rate {:6.1} k/s",
                    i + 1,
                    stats.duplicates,
                    tick.rate_kps(i + 1)
                );
                tick.bump();
            }
        }

        stats.total = records.len();
        stats.indexed = index.len();

        debug!(
            "Ingestion finished in {:.2?}: {:?}",
            tick.elapsed(),
            stats
        );

        Ok((records, stats))
    }
}

/// Numeric value of `field`; numbers and numeric strings are accepted.
fn numeric_property(props: &Map<String, Value>, field: &str, record: usize) -> Result<f64> {
    match props.get(field) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| TerrainError::malformed(record, format!("'{}' is not finite", field))),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
            TerrainError::malformed(record, format!("non-numeric '{}' value '{}'", field, s))
        }),
        Some(Value::Null) | None => Err(TerrainError::malformed(
            record,
            format!("missing '{}' value", field),
        )),
        Some(other) => Err(TerrainError::malformed(
            record,
            format!("non-numeric '{}' value {}", field, other),
        )),
    }
}

/// Text rendering of `field`, or `None` when absent or null.
pub(crate) fn text_property(props: &Map<String, Value>, field: &str) -> Option<String> {
    match props.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFeature;
    use serde_json::json;

    fn point(x: f64, y: f64, z: f64, code: &str) -> SourceFeature {
        let mut properties = Map::new();
        properties.insert("z".to_string(), json!(z));
        properties.insert("code".to_string(), json!(code));
        SourceFeature {
            geometry: Some(SourceGeometry::Point { x, y, z: None }),
            properties,
        }
    }

    fn source(points: Vec<SourceFeature>) -> SourceCollection {
        SourceCollection::from_features(points, None)
    }

    fn ingestor(tolerance: f64) -> PointIngestor {
        PointIngestor::new(PointIngestOptions {
            tag_field: Some("code".to_string()),
            duplicate_tolerance: tolerance,
            ..Default::default()
        })
    }

    #[test]
    fn test_near_duplicate_is_flagged() {
        let src = source(vec![point(0.0, 0.0, 10.0, "A"), point(0.0, 0.005, 10.0, "A")]);
        let records = ingestor(0.01).ingest(&src, false, false).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 1);
        assert_eq!(records[1].seq, 2);
        assert!(records[0].contourable);
        assert_eq!(records[0].comment, None);
        assert!(!records[1].contourable);
        assert_eq!(records[1].comment.as_deref(), Some("duplicate of 1"));
    }

    #[test]
    fn test_distant_points_are_kept() {
        let src = source(vec![point(0.0, 0.0, 10.0, "B"), point(100.0, 100.0, 20.0, "B")]);
        let (records, stats) = ingestor(0.01).ingest_with_stats(&src, false, false).unwrap();

        assert!(records.iter().all(|r| r.contourable && r.comment.is_none()));
        assert_eq!(stats.duplicates, 0);
        assert_eq!(stats.indexed, 2);
    }

    #[test]
    fn test_duplicates_are_never_indexed() {
        // B is within 1.0 of A; C is within 1.0 of B but 1.6 from A.
        let src = source(vec![
            point(0.0, 0.0, 1.0, "A"),
            point(0.8, 0.0, 1.0, "B"),
            point(1.6, 0.0, 1.0, "C"),
        ]);
        let (records, stats) = ingestor(1.0).ingest_with_stats(&src, false, false).unwrap();

        assert!(records[0].contourable);
        assert!(!records[1].contourable);
        assert!(records[2].contourable);
        assert_eq!(stats.indexed, 2);
    }

    #[test]
    fn test_rounding_happens_before_comparison() {
        // Raw distance 0.0104 > 0.01, rounded distance 0.010 <= 0.01.
        let src = source(vec![point(0.0, 0.0, 1.0, "A"), point(0.0104, 0.0, 1.0, "A")]);
        let records = ingestor(0.01).ingest(&src, false, false).unwrap();

        assert_eq!(records[1].x, 0.01);
        assert!(!records[1].contourable);
    }

    #[test]
    fn test_sentinel_elevation_is_stored_but_not_contourable() {
        let src = source(vec![point(0.0, 0.0, -999.0, "A"), point(0.005, 0.0, 5.0, "A")]);
        let (records, stats) = ingestor(0.01).ingest_with_stats(&src, false, false).unwrap();

        assert!(!records[0].contourable);
        assert_eq!(records[0].z, -999.0);
        // Sentinel points still occupy the index.
        assert!(!records[1].contourable);
        assert_eq!(stats.missing_elevation, 1);
    }

    #[test]
    fn test_existing_comment_is_not_overwritten() {
        let mut first = point(0.0, 0.0, 1.0, "A");
        let mut second = point(0.0, 0.0, 1.0, "A");
        first.properties.insert("remark".to_string(), Value::Null);
        second
            .properties
            .insert("remark".to_string(), json!("resurveyed"));

        let ingestor = PointIngestor::new(PointIngestOptions {
            tag_field: Some("code".to_string()),
            comment_field: Some("Remark".to_string()),
            ..Default::default()
        });
        let records = ingestor.ingest(&source(vec![first, second]), false, false).unwrap();

        assert!(!records[1].contourable);
        assert_eq!(records[1].comment.as_deref(), Some("resurveyed"));
    }

    #[test]
    fn test_precondition_without_overwrite() {
        let src = source(vec![point(0.0, 0.0, 1.0, "A")]);
        let err = ingestor(0.01).ingest(&src, true, false).unwrap_err();
        assert!(matches!(err, TerrainError::Precondition(_)));

        assert!(ingestor(0.01).ingest(&src, true, true).is_ok());
    }

    #[test]
    fn test_geometry_z_and_missing_z() {
        let mut feature = point(1.0, 2.0, 0.0, "A");
        feature.geometry = Some(SourceGeometry::Point {
            x: 1.0,
            y: 2.0,
            z: Some(42.12345),
        });

        let ingestor = PointIngestor::new(PointIngestOptions {
            tag_field: Some("code".to_string()),
            use_geometry_z: true,
            ..Default::default()
        });

        let records = ingestor.ingest(&source(vec![feature]), false, false).unwrap();
        assert_eq!(records[0].z, 42.123);

        let err = ingestor
            .ingest(&source(vec![point(1.0, 2.0, 3.0, "A")]), false, false)
            .unwrap_err();
        assert!(matches!(err, TerrainError::MalformedRecord { record: 0, .. }));
    }

    #[test]
    fn test_present_elevation_field_beats_geometry_z() {
        let mut feature = point(1.0, 2.0, 0.0, "A");
        feature.properties.insert("RL".to_string(), json!(55.0));
        feature.geometry = Some(SourceGeometry::Point {
            x: 1.0,
            y: 2.0,
            z: Some(7.0),
        });
        let mut sentinel = feature.clone();
        sentinel.geometry = Some(SourceGeometry::Point {
            x: 50.0,
            y: 50.0,
            z: Some(7.0),
        });
        sentinel.properties.insert("RL".to_string(), json!(-999));

        let ingestor = PointIngestor::new(PointIngestOptions {
            elevation_field: Some("RL".to_string()),
            tag_field: Some("code".to_string()),
            use_geometry_z: true,
            ..Default::default()
        });

        let records = ingestor
            .ingest(&source(vec![feature, sentinel]), false, false)
            .unwrap();
        assert_eq!(records[0].z, 55.0);
        assert!(records[0].contourable);
        assert_eq!(records[1].z, -999.0);
        assert!(!records[1].contourable);
    }

    #[test]
    fn test_field_failures_abort_the_batch() {
        let mut bad = point(5.0, 5.0, 0.0, "A");
        bad.properties.insert("z".to_string(), json!("n/a"));
        let src = source(vec![point(0.0, 0.0, 1.0, "A"), bad]);
        let err = ingestor(0.01).ingest(&src, false, false).unwrap_err();
        assert!(matches!(err, TerrainError::MalformedRecord { record: 1, .. }));

        let mut untagged = point(0.0, 0.0, 1.0, "A");
        untagged.properties.insert("code".to_string(), Value::Null);
        let err = ingestor(0.01).ingest(&source(vec![untagged]), false, false).unwrap_err();
        assert!(matches!(err, TerrainError::MalformedRecord { record: 0, .. }));

        let mut no_tag = point(0.0, 0.0, 1.0, "A");
        no_tag.properties.remove("code");
        let err = ingestor(0.01).ingest(&source(vec![no_tag]), false, false).unwrap_err();
        assert!(matches!(err, TerrainError::FieldResolution(_)));
    }

    #[test]
    fn test_numeric_strings_and_tags() {
        let mut feature = point(0.0, 0.0, 0.0, "A");
        feature.properties.insert("z".to_string(), json!(" 12.3456 "));
        feature.properties.insert("code".to_string(), json!(7));

        let records = ingestor(0.01).ingest(&source(vec![feature]), false, false).unwrap();
        assert_eq!(records[0].z, 12.346);
        assert_eq!(records[0].code, "7");
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let src = source(vec![point(0.0, 0.0, 1.0, "A")]);
        let err = ingestor(-1.0).ingest(&src, false, false).unwrap_err();
        assert!(matches!(err, TerrainError::InvalidParameter(_)));
    }
}
