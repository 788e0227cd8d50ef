//! The terrain façade: one named dataset with a point, breakline and
//! boundary layer in a [`LayerStore`].

use crate::boundary::{BoundaryEstimator, GeoConcaveHull, HullRoutine};
use crate::breaklines::{build_point_index, BreaklineAttributor, BreaklineOptions};
use crate::error::{Result, TerrainError};
use crate::export::write_geojson;
use crate::ingest::{IngestStats, PointIngestOptions, PointIngestor};
use crate::source::{read_source, SourceCollection};
use crate::store::{CrsUpdate, LayerStore, WriteMode};
use log::{info, warn};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;
use tinstore::{BoundaryRecord, BreaklineRecord, LayerData, LayerKind, PointRecord};

/// Options for [`Terrain::ingest_breaklines`].
#[derive(Debug, Clone, Default)]
pub struct BreaklineIngestOptions {
    /// Add to the existing breaklines instead of replacing them.
    pub append: bool,
    /// Attribute against every point, not only contourable ones.
    pub all_points: bool,
    pub name_field: Option<String>,
    pub snap_tolerance: Option<f64>,
}

/// Counts and metrics of a terrain, as printed by `terrain info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerrainSummary {
    pub name: String,
    pub crs: Option<String>,
    pub points: usize,
    pub contourable_points: usize,
    pub breaklines: usize,
    pub boundary_area: Option<f64>,
    pub boundary_perimeter: Option<f64>,
    pub boundary_vertices: Option<u32>,
}

fn wrong_layer(expected: LayerKind, got: &LayerData) -> TerrainError {
    TerrainError::Io(io::Error::new(
        ErrorKind::InvalidData,
        format!("store returned a {} layer for {}", got.kind(), expected),
    ))
}

pub struct Terrain<S: LayerStore, H: HullRoutine = GeoConcaveHull> {
    store: S,
    name: String,
    estimator: BoundaryEstimator<H>,
}

impl<S: LayerStore> Terrain<S> {
    /// Open `name` in `store`, creating any missing layer empty.
    pub fn open(store: S, name: &str) -> Result<Self> {
        Self::with_hull(store, name, GeoConcaveHull::default())
    }

    /// Attach to an existing terrain without writing to the store. Layers
    /// that are missing read as empty.
    pub fn inspect(store: S, name: &str) -> Result<Self> {
        if store.list_layers(name)?.is_empty() {
            return Err(TerrainError::Precondition(format!(
                "no terrain '{}' in store",
                name
            )));
        }

        Ok(Self {
            store,
            name: name.to_string(),
            estimator: BoundaryEstimator::new(GeoConcaveHull::default()),
        })
    }
}

impl<S: LayerStore, H: HullRoutine> Terrain<S, H> {
    /// Like [`Terrain::open`], with a custom hull routine.
    pub fn with_hull(mut store: S, name: &str, hull: H) -> Result<Self> {
        let existing = store.list_layers(name)?;

        for kind in LayerKind::ALL {
            if !existing.contains(&kind) {
                store.write(
                    name,
                    WriteMode::Create,
                    LayerData::empty(kind),
                    CrsUpdate::Keep,
                )?;
            }
        }

        info!(
            "Opened terrain '{}' ({} of {} layers already present)",
            name,
            existing.len(),
            LayerKind::ALL.len()
        );

        Ok(Self {
            store,
            name: name.to_string(),
            estimator: BoundaryEstimator::new(hull),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Read, deduplicate and store a point source. Replaces the point layer
    /// when `overwrite` is set; fails if it holds data otherwise.
    pub fn ingest_points(
        &mut self,
        source: &Path,
        layer: Option<&str>,
        options: &PointIngestOptions,
        overwrite: bool,
    ) -> Result<IngestStats> {
        let collection = read_source(source, layer)?;
        self.ingest_points_from(&collection, options, overwrite)
    }

    pub fn ingest_points_from(
        &mut self,
        source: &SourceCollection,
        options: &PointIngestOptions,
        overwrite: bool,
    ) -> Result<IngestStats> {
        let has_data = !self.store.read(&self.name, LayerKind::Points)?.is_empty();

        let (records, stats) =
            PointIngestor::new(options.clone()).ingest_with_stats(source, has_data, overwrite)?;

        self.store.write(
            &self.name,
            WriteMode::Replace,
            LayerData::Points(records),
            CrsUpdate::Set(source.crs.as_deref()),
        )?;

        info!(
            "Stored {} points in '{}' ({} duplicates, {} without elevation)",
            stats.total, self.name, stats.duplicates, stats.missing_elevation
        );

        Ok(stats)
    }

    /// Attribute a line source against the stored points and store the
    /// resulting breaklines. Returns the number of records written.
    pub fn ingest_breaklines(
        &mut self,
        source: &Path,
        layer: Option<&str>,
        options: &BreaklineIngestOptions,
    ) -> Result<usize> {
        let collection = read_source(source, layer)?;
        self.ingest_breaklines_from(&collection, options)
    }

    pub fn ingest_breaklines_from(
        &mut self,
        source: &SourceCollection,
        options: &BreaklineIngestOptions,
    ) -> Result<usize> {
        let points = self.points()?;
        let index = build_point_index(&points, options.all_points);

        let attributor = BreaklineAttributor::new(BreaklineOptions {
            name_field: options.name_field.clone(),
            snap_tolerance: options.snap_tolerance,
        });
        let records = attributor.attribute(source, &index, &points)?;

        if let (Some(theirs), Some(ours)) = (source.crs.as_deref(), self.crs()?) {
            if theirs != ours {
                warn!(
                    "Breakline CRS {:?} differs from terrain CRS {:?}; coordinates are used as-is",
                    theirs, ours
                );
            }
        }

        let mode = if options.append {
            WriteMode::Append
        } else {
            WriteMode::Replace
        };
        let count = records.len();

        self.store
            .write(&self.name, mode, LayerData::Breaklines(records), CrsUpdate::Keep)?;

        info!(
            "Stored {} breaklines in '{}' ({})",
            count,
            self.name,
            if options.append { "appended" } else { "replaced" }
        );

        Ok(count)
    }

    /// Compute and store the boundary polygon of the contourable points.
    pub fn compute_boundary(&mut self, tolerance: f64) -> Result<BoundaryRecord> {
        let points = self.points()?;
        let (_, record) = self.estimator.compute_boundary(&points, tolerance)?;

        self.store.write(
            &self.name,
            WriteMode::Replace,
            LayerData::Boundary(vec![record.clone()]),
            CrsUpdate::Keep,
        )?;

        Ok(record)
    }

    /// Suggest a boundary tolerance. Nothing is written.
    pub fn estimate_boundary_tolerance(&mut self, percentile: f64) -> Result<f64> {
        let points = self.points()?;
        self.estimator.estimate(&points, percentile)
    }

    pub fn crs(&self) -> Result<Option<String>> {
        self.store.crs(&self.name)
    }

    pub fn points(&self) -> Result<Vec<PointRecord>> {
        match self.store.read(&self.name, LayerKind::Points)? {
            LayerData::Points(v) => Ok(v),
            other => Err(wrong_layer(LayerKind::Points, &other)),
        }
    }

    pub fn breaklines(&self) -> Result<Vec<BreaklineRecord>> {
        match self.store.read(&self.name, LayerKind::Breaklines)? {
            LayerData::Breaklines(v) => Ok(v),
            other => Err(wrong_layer(LayerKind::Breaklines, &other)),
        }
    }

    /// The stored boundary, if one was computed.
    pub fn boundary(&self) -> Result<Option<BoundaryRecord>> {
        match self.store.read(&self.name, LayerKind::Boundary)? {
            LayerData::Boundary(v) => Ok(v.into_iter().next()),
            other => Err(wrong_layer(LayerKind::Boundary, &other)),
        }
    }

    pub fn summary(&self) -> Result<TerrainSummary> {
        let points = self.points()?;
        let boundary = self.boundary()?;

        Ok(TerrainSummary {
            name: self.name.clone(),
            crs: self.crs()?,
            points: points.len(),
            contourable_points: points.iter().filter(|p| p.contourable).count(),
            breaklines: self.breaklines()?.len(),
            boundary_area: boundary.as_ref().map(|b| b.area),
            boundary_perimeter: boundary.as_ref().map(|b| b.perimeter),
            boundary_vertices: boundary.as_ref().map(|b| b.vertex_count),
        })
    }

    /// Write one layer as a GeoJSON FeatureCollection. Returns the number of
    /// features written.
    pub fn export_layer(&self, kind: LayerKind, path: &Path) -> Result<usize> {
        let data = self.store.read(&self.name, kind)?;
        let crs = self.crs()?;

        let mut writer = BufWriter::new(File::create(path)?);
        write_geojson(&mut writer, &data, crs.as_deref())?;
        writer.flush()?;

        info!(
            "Exported {} {} features to {}",
            data.len(),
            kind,
            path.display()
        );

        Ok(data.len())
    }
}
