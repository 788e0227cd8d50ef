//! Boundary estimation over contourable points.
//!
//! Hull construction and tolerance estimation live behind [`HullRoutine`].
//! This module only selects points, drives the routine and summarises the
//! resulting polygon.

use crate::error::{Result, TerrainError};
use crate::ingest::round_coord;
use geo::{Area, ConcaveHull, Euclidean, Length};
use geo_types::{MultiPoint, Point, Polygon};
use log::{debug, info};
use rayon::prelude::*;
use rstar::RTree;
use tinstore::{BoundaryRecord, PointRecord};

/// Minimum number of contourable points for a polygon.
pub const MIN_BOUNDARY_POINTS: usize = 3;

/// Concave-hull routine consumed as a black box.
pub trait HullRoutine {
    /// Replace the loaded point set.
    fn load(&mut self, points: &[[f64; 3]]);

    fn compute_hull(&self, tolerance: f64) -> Result<Polygon<f64>>;

    /// Suggest a hull tolerance from the loaded points.
    fn estimate_tolerance(&self, percentile: f64) -> Result<f64>;
}

/// Default routine: `geo`'s concave hull, with the tolerance passed as its
/// concavity, and a nearest-neighbour spacing percentile as the estimate.
#[derive(Debug, Clone, Default)]
pub struct GeoConcaveHull {
    points: Vec<[f64; 3]>,
}

impl HullRoutine for GeoConcaveHull {
    fn load(&mut self, points: &[[f64; 3]]) {
        self.points = points.to_vec();
    }

    fn compute_hull(&self, tolerance: f64) -> Result<Polygon<f64>> {
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(TerrainError::InvalidParameter(format!(
                "hull tolerance must be positive, got {}",
                tolerance
            )));
        }

        let multi: MultiPoint<f64> = self
            .points
            .iter()
            .map(|p| Point::new(p[0], p[1]))
            .collect();

        Ok(multi.concave_hull(tolerance))
    }

    fn estimate_tolerance(&self, percentile: f64) -> Result<f64> {
        let mut planar: Vec<[f64; 2]> = self.points.iter().map(|p| [p[0], p[1]]).collect();
        planar.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
        planar.dedup();

        if planar.len() < 2 {
            return Err(TerrainError::InsufficientData(
                "need at least two distinct points to estimate spacing".to_string(),
            ));
        }

        let tree = RTree::bulk_load(planar.clone());

        // The first neighbour of every point is the point itself.
        let mut spacing: Vec<f64> = planar
            .par_iter()
            .filter_map(|p| {
                tree.nearest_neighbor_iter(p)
                    .nth(1)
                    .map(|q| (p[0] - q[0]).hypot(p[1] - q[1]))
            })
            .collect();

        spacing.sort_by(f64::total_cmp);

        Ok(nearest_rank(&spacing, percentile))
    }
}

/// Nearest-rank percentile of sorted, non-empty `values`.
fn nearest_rank(values: &[f64], percentile: f64) -> f64 {
    let n = values.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    values[rank.clamp(1, n) - 1]
}

fn check_percentile(percentile: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&percentile) {
        return Err(TerrainError::InvalidParameter(format!(
            "percentile must be within [0, 100], got {}",
            percentile
        )));
    }
    Ok(())
}

/// Area, perimeter and vertex count of `polygon`, rounded.
pub fn summarize(polygon: &Polygon<f64>) -> BoundaryRecord {
    let ring: Vec<[f64; 2]> = polygon.exterior().coords().map(|c| [c.x, c.y]).collect();

    let perimeter = polygon.exterior().length::<Euclidean>()
        + polygon
            .interiors()
            .iter()
            .map(|r| r.length::<Euclidean>())
            .sum::<f64>();

    BoundaryRecord {
        vertex_count: ring.len() as u32,
        ring,
        area: round_coord(polygon.unsigned_area()),
        perimeter: round_coord(perimeter),
    }
}

pub struct BoundaryEstimator<H: HullRoutine> {
    hull: H,
}

impl<H: HullRoutine> BoundaryEstimator<H> {
    pub fn new(hull: H) -> Self {
        Self { hull }
    }

    /// Suggested hull tolerance for the contourable subset of `points`.
    pub fn estimate(&mut self, points: &[PointRecord], percentile: f64) -> Result<f64> {
        check_percentile(percentile)?;
        let used = self.load_contourable(points)?;

        let tolerance = self.hull.estimate_tolerance(percentile)?;
        info!(
            "Estimated boundary tolerance {:.3} at P{} over {} points",
            tolerance, percentile, used
        );

        Ok(tolerance)
    }

    /// Boundary polygon of the contourable subset of `points`.
    pub fn compute_boundary(
        &mut self,
        points: &[PointRecord],
        tolerance: f64,
    ) -> Result<(Polygon<f64>, BoundaryRecord)> {
        let used = self.load_contourable(points)?;

        let polygon = self.hull.compute_hull(tolerance)?;
        let record = summarize(&polygon);

        if record.vertex_count < 4 {
            return Err(TerrainError::InsufficientData(format!(
                "hull of {} points is degenerate ({} ring vertices)",
                used, record.vertex_count
            )));
        }

        info!(
            "Boundary over {} points: area {:.3}, perimeter {:.3}, {} vertices",
            used, record.area, record.perimeter, record.vertex_count
        );

        Ok((polygon, record))
    }

    fn load_contourable(&mut self, points: &[PointRecord]) -> Result<usize> {
        let selected: Vec<[f64; 3]> = points
            .iter()
            .filter(|p| p.contourable)
            .map(|p| [p.x, p.y, p.z])
            .collect();

        if selected.len() < MIN_BOUNDARY_POINTS {
            return Err(TerrainError::InsufficientData(format!(
                "{} contourable points, need at least {}",
                selected.len(),
                MIN_BOUNDARY_POINTS
            )));
        }

        debug!(
            "Loading {} of {} points into hull routine",
            selected.len(),
            points.len()
        );

        self.hull.load(&selected);

        Ok(selected.len())
    }
}
