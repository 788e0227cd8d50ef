//! Layered TIN terrain datasets.
//!
//! A terrain is a named dataset with three layers kept in a [`LayerStore`]:
//!
//! * **Points**: survey points with elevation, a classification tag and a
//!   contourable flag. Ingestion rounds coordinates to millimetres and marks
//!   points lying within a tolerance of an earlier point as duplicates.
//! * **Breaklines**: survey lines, each given the dominant tag of the points
//!   nearest to its vertices.
//! * **Boundary**: a concave hull of the contourable points.
//!
//! ```no_run
//! use std::path::Path;
//! use terrain::{FileStore, PointIngestOptions, Terrain};
//!
//! # fn main() -> terrain::Result<()> {
//! let store = FileStore::open("surveys")?;
//! let mut site = Terrain::open(store, "site-a")?;
//!
//! let options = PointIngestOptions {
//!     tag_field: Some("code".into()),
//!     ..Default::default()
//! };
//! site.ingest_points(Path::new("points.geojson"), None, &options, false)?;
//!
//! let tolerance = site.estimate_boundary_tolerance(95.0)?;
//! site.compute_boundary(tolerance)?;
//! # Ok(())
//! # }
//! ```

pub mod boundary;
pub mod breaklines;
pub mod error;
pub mod export;
pub mod fields;
pub mod index;
pub mod ingest;
mod progress;
pub mod source;
pub mod store;
pub mod terrain;

pub use boundary::{BoundaryEstimator, GeoConcaveHull, HullRoutine};
pub use breaklines::{BreaklineAttributor, BreaklineOptions};
pub use error::{Result, TerrainError};
pub use index::{IndexHit, SpatialPointIndex};
pub use ingest::{IngestStats, PointIngestOptions, PointIngestor};
pub use source::{read_source, SourceCollection, SourceFeature, SourceGeometry};
pub use store::{CrsUpdate, FileStore, LayerStore, MemoryStore, WriteMode};
pub use terrain::{BreaklineIngestOptions, Terrain, TerrainSummary};

pub use tinstore::{
    BoundaryRecord, BreaklineRecord, LayerData, LayerKind, PointRecord, Softness,
};
