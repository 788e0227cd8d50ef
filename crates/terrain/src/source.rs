//! Geometry sources: GeoJSON and CSV files, optionally packed in a `.zip`.
//!
//! Every reader produces a [`SourceCollection`]: an ordered field schema,
//! the features in file order, and the CRS text if the file carried one.

use crate::error::{Result, TerrainError};
use crate::fields::resolve_field;
use geojson::GeoJson;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// CSV header names accepted for the x coordinate.
const X_CANDIDATES: [&str; 5] = ["x", "easting", "east", "lon", "longitude"];

/// CSV header names accepted for the y coordinate.
const Y_CANDIDATES: [&str; 5] = ["y", "northing", "north", "lat", "latitude"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Integer,
    Real,
    Boolean,
    /// Only nulls seen so far.
    Unknown,
}

impl FieldKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => FieldKind::Text,
            Value::Bool(_) => FieldKind::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => FieldKind::Integer,
            Value::Number(_) => FieldKind::Real,
            Value::Null => FieldKind::Unknown,
            // Arrays and objects are carried as JSON text.
            Value::Array(_) | Value::Object(_) => FieldKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceGeometry {
    Point { x: f64, y: f64, z: Option<f64> },
    LineString(Vec<[f64; 2]>),
    MultiLineString(Vec<Vec<[f64; 2]>>),
    /// Any other geometry type, by name.
    Other(&'static str),
}

impl SourceGeometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceGeometry::Point { .. } => "Point",
            SourceGeometry::LineString(_) => "LineString",
            SourceGeometry::MultiLineString(_) => "MultiLineString",
            SourceGeometry::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFeature {
    pub geometry: Option<SourceGeometry>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCollection {
    pub fields: Vec<Field>,
    pub features: Vec<SourceFeature>,
    pub crs: Option<String>,
}

impl SourceCollection {
    /// Build a collection, inferring the schema from property order of first
    /// appearance. A field's kind is taken from its first non-null value.
    pub fn from_features(features: Vec<SourceFeature>, crs: Option<String>) -> Self {
        let mut fields: Vec<Field> = Vec::new();

        for feature in &features {
            for (name, value) in &feature.properties {
                match fields.iter_mut().find(|f| f.name == *name) {
                    Some(field) => {
                        if field.kind == FieldKind::Unknown {
                            field.kind = FieldKind::of(value);
                        }
                    }
                    None => fields.push(Field {
                        name: name.clone(),
                        kind: FieldKind::of(value),
                    }),
                }
            }
        }

        Self {
            fields,
            features,
            crs,
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Whether any point geometry carries a native z coordinate.
    pub fn has_native_z(&self) -> bool {
        self.features
            .iter()
            .any(|f| matches!(f.geometry, Some(SourceGeometry::Point { z: Some(_), .. })))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    GeoJson,
    Csv,
    Zip,
}

fn detect_format(name: &str) -> Option<SourceFormat> {
    let ext = Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "geojson" | "json" => Some(SourceFormat::GeoJson),
        "csv" | "txt" => Some(SourceFormat::Csv),
        "zip" => Some(SourceFormat::Zip),
        _ => None,
    }
}

/// Read a geometry source from disk.
///
/// `layer` selects an entry inside a `.zip` archive (by full name or file
/// stem); it has no meaning for plain files.
pub fn read_source(path: &Path, layer: Option<&str>) -> Result<SourceCollection> {
    let name = path.to_string_lossy();
    let format = detect_format(&name)
        .ok_or_else(|| TerrainError::Source(format!("unrecognised source type: {}", name)))?;

    info!("Reading {}", path.display());

    let collection = match format {
        SourceFormat::GeoJson => {
            if let Some(layer) = layer {
                warn!("Layer '{}' ignored for plain GeoJSON source", layer);
            }
            let mut text = String::new();
            BufReader::new(File::open(path)?).read_to_string(&mut text)?;
            parse_geojson(&text)?
        }
        SourceFormat::Csv => {
            if let Some(layer) = layer {
                warn!("Layer '{}' ignored for plain CSV source", layer);
            }
            parse_csv(File::open(path)?)?
        }
        SourceFormat::Zip => read_zip_entry(path, layer)?,
    };

    debug!(
        "{}: {} features, fields {:?}, crs {:?}",
        path.display(),
        collection.len(),
        collection.field_names(),
        collection.crs
    );

    Ok(collection)
}

fn read_zip_entry(path: &Path, layer: Option<&str>) -> Result<SourceCollection> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    // Central directory order; `file_names` iterates a hash map.
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        names.push(archive.by_index_raw(i)?.name().to_owned());
    }

    let entry_name = match layer {
        Some(layer) => names
            .into_iter()
            .find(|n| {
                *n == layer
                    || Path::new(n)
                        .file_stem()
                        .map(|s| s.to_string_lossy() == layer)
                        .unwrap_or(false)
            })
            .ok_or_else(|| {
                TerrainError::Source(format!("no entry '{}' in {}", layer, path.display()))
            })?,
        None => names
            .into_iter()
            .find(|n| matches!(detect_format(n), Some(SourceFormat::GeoJson | SourceFormat::Csv)))
            .ok_or_else(|| {
                TerrainError::Source(format!("no GeoJSON or CSV entry in {}", path.display()))
            })?,
    };

    debug!("Found source entry in ZIP: {}", entry_name);

    let format = detect_format(&entry_name);
    let mut entry = archive.by_name(&entry_name)?;

    match format {
        Some(SourceFormat::GeoJson) => {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            parse_geojson(&text)
        }
        Some(SourceFormat::Csv) => parse_csv(&mut entry),
        _ => Err(TerrainError::Source(format!(
            "unsupported entry type: {}",
            entry_name
        ))),
    }
}

/// Parse a GeoJSON document (FeatureCollection, Feature or bare Geometry).
pub fn parse_geojson(text: &str) -> Result<SourceCollection> {
    let parsed: GeoJson = text.parse()?;

    let (features, crs) = match parsed {
        GeoJson::FeatureCollection(fc) => {
            let crs = fc
                .foreign_members
                .as_ref()
                .and_then(|m| m.get("crs"))
                .map(crs_text);
            (fc.features, crs)
        }
        GeoJson::Feature(feature) => {
            let crs = feature
                .foreign_members
                .as_ref()
                .and_then(|m| m.get("crs"))
                .map(crs_text);
            (vec![feature], crs)
        }
        GeoJson::Geometry(geometry) => (
            vec![geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            }],
            None,
        ),
    };

    let mut out = Vec::with_capacity(features.len());

    for (index, feature) in features.into_iter().enumerate() {
        let geometry = match feature.geometry {
            Some(g) => Some(convert_geometry(&g.value, index)?),
            None => None,
        };

        out.push(SourceFeature {
            geometry,
            properties: feature.properties.unwrap_or_default(),
        });
    }

    Ok(SourceCollection::from_features(out, crs))
}

/// Legacy `crs` members are objects; keep the EPSG-style name if present,
/// otherwise the raw JSON.
fn crs_text(value: &Value) -> String {
    value
        .pointer("/properties/name")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| value.to_string())
}

fn position(pos: &[f64], index: usize) -> Result<[f64; 2]> {
    match pos {
        [x, y, ..] => Ok([*x, *y]),
        _ => Err(TerrainError::malformed(
            index,
            "position with fewer than 2 coordinates",
        )),
    }
}

fn convert_geometry(value: &geojson::Value, index: usize) -> Result<SourceGeometry> {
    use geojson::Value as V;

    Ok(match value {
        V::Point(pos) => {
            let [x, y] = position(pos, index)?;
            SourceGeometry::Point {
                x,
                y,
                z: pos.get(2).copied(),
            }
        }
        V::LineString(line) => SourceGeometry::LineString(
            line.iter()
                .map(|p| position(p, index))
                .collect::<Result<_>>()?,
        ),
        V::MultiLineString(lines) => SourceGeometry::MultiLineString(
            lines
                .iter()
                .map(|line| {
                    line.iter()
                        .map(|p| position(p, index))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<_>>()?,
        ),
        V::MultiPoint(_) => SourceGeometry::Other("MultiPoint"),
        V::Polygon(_) => SourceGeometry::Other("Polygon"),
        V::MultiPolygon(_) => SourceGeometry::Other("MultiPolygon"),
        V::GeometryCollection(_) => SourceGeometry::Other("GeometryCollection"),
    })
}

/// Parse a CSV point table with a header row.
///
/// The x and y columns are picked by name; every other column becomes a
/// text field. Empty cells read as null. CSV points carry no native z.
pub fn parse_csv<R: Read>(reader: R) -> Result<SourceCollection> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_owned).collect();

    let column = |candidates: &[&str], axis: &str| -> Result<usize> {
        let name = resolve_field(&headers, None, candidates).ok_or_else(|| {
            TerrainError::FieldResolution(format!(
                "no {} column among {:?} (expected one of {:?})",
                axis, headers, candidates
            ))
        })?;
        // resolve_field returns a header, so the position exists.
        Ok(headers.iter().position(|h| h == name).unwrap_or_default())
    };

    let x_col = column(&X_CANDIDATES, "x")?;
    let y_col = column(&Y_CANDIDATES, "y")?;

    let mut features = Vec::new();

    for (index, record) in rdr.records().enumerate() {
        let record = record?;

        let coord = |col: usize, axis: &str| -> Result<f64> {
            let raw = record.get(col).unwrap_or("");
            raw.parse::<f64>().map_err(|_| {
                TerrainError::malformed(index, format!("non-numeric {} value '{}'", axis, raw))
            })
        };

        let x = coord(x_col, "x")?;
        let y = coord(y_col, "y")?;

        let mut properties = Map::new();
        for (col, (name, cell)) in headers.iter().zip(record.iter()).enumerate() {
            if col == x_col || col == y_col {
                continue;
            }
            let value = if cell.is_empty() {
                Value::Null
            } else {
                Value::String(cell.to_owned())
            };
            properties.insert(name.clone(), value);
        }

        features.push(SourceFeature {
            geometry: Some(SourceGeometry::Point { x, y, z: None }),
            properties,
        });
    }

    let mut collection = SourceCollection::from_features(features, None);

    // A CSV column is text whatever its first cell looked like.
    for field in &mut collection.fields {
        field.kind = FieldKind::Text;
    }

    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_geojson_preserves_property_order_and_z() {
        let text = r#"{
            "type": "FeatureCollection",
            "crs": { "type": "name", "properties": { "name": "EPSG:2193" } },
            "features": [
                { "type": "Feature",
                  "geometry": { "type": "Point", "coordinates": [1.0, 2.0, 3.5] },
                  "properties": { "Zed": null, "Desc": "TOE", "Height": 3.5 } },
                { "type": "Feature",
                  "geometry": { "type": "Point", "coordinates": [4.0, 5.0] },
                  "properties": { "Zed": 7, "Desc": "TOP", "Height": 1 } }
            ]
        }"#;

        let src = parse_geojson(text).unwrap();

        assert_eq!(src.field_names(), vec!["Zed", "Desc", "Height"]);
        assert_eq!(src.fields[0].kind, FieldKind::Integer);
        assert_eq!(src.fields[1].kind, FieldKind::Text);
        assert_eq!(src.fields[2].kind, FieldKind::Real);
        assert_eq!(src.crs.as_deref(), Some("EPSG:2193"));
        assert!(src.has_native_z());
        assert_eq!(
            src.features[1].geometry,
            Some(SourceGeometry::Point { x: 4.0, y: 5.0, z: None })
        );
    }

    #[test]
    fn test_geojson_lines() {
        let text = r#"{
            "type": "Feature",
            "geometry": { "type": "MultiLineString",
                          "coordinates": [[[0, 0], [1, 1]], [[2, 2], [3, 3, 9]]] },
            "properties": { "name": "kerb" }
        }"#;

        let src = parse_geojson(text).unwrap();
        assert_eq!(
            src.features[0].geometry,
            Some(SourceGeometry::MultiLineString(vec![
                vec![[0.0, 0.0], [1.0, 1.0]],
                vec![[2.0, 2.0], [3.0, 3.0]],
            ]))
        );
    }

    #[test]
    fn test_csv_points() {
        let csv = "Easting,Northing,RL,Code\n100.5,200.25,12.1,TOE\n101,201,,\n";
        let src = parse_csv(csv.as_bytes()).unwrap();

        assert_eq!(src.field_names(), vec!["RL", "Code"]);
        assert!(src.fields.iter().all(|f| f.kind == FieldKind::Text));
        assert!(!src.has_native_z());
        assert_eq!(src.len(), 2);
        assert_eq!(
            src.features[0].geometry,
            Some(SourceGeometry::Point { x: 100.5, y: 200.25, z: None })
        );
        assert_eq!(src.features[1].properties["Code"], Value::Null);
    }

    #[test]
    fn test_csv_requires_coordinates() {
        let err = parse_csv("a,b\n1,2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TerrainError::FieldResolution(_)));

        let err = parse_csv("x,y\n1,north\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TerrainError::MalformedRecord { record: 0, .. }));
    }

    #[test]
    fn test_zip_entry_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.zip");

        {
            let file = File::create(&path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::FileOptions::default();
            zip.start_file("readme.md", options).unwrap();
            zip.write_all(b"not a source").unwrap();
            zip.start_file("lines.geojson", options).unwrap();
            zip.write_all(
                br#"{"type":"LineString","coordinates":[[0,0],[1,0]]}"#,
            )
            .unwrap();
            zip.start_file("ground.csv", options).unwrap();
            zip.write_all(b"x,y,code\n1,2,A\n").unwrap();
            zip.finish().unwrap();
        }

        // Archive order, not name order.
        let first = read_source(&path, None).unwrap();
        assert!(matches!(
            first.features[0].geometry,
            Some(SourceGeometry::LineString(_))
        ));

        let ground = read_source(&path, Some("ground")).unwrap();
        assert_eq!(ground.field_names(), vec!["code"]);

        assert!(read_source(&path, Some("missing")).is_err());
    }

    #[test]
    fn test_unknown_extension() {
        let err = read_source(Path::new("points.shp"), None).unwrap_err();
        assert!(matches!(err, TerrainError::Source(_)));
    }
}
