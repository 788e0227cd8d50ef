use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use terrain::{BreaklineIngestOptions, LayerKind, PointIngestOptions};

/// `terrain` - build layered TIN terrain datasets from survey data.
///
/// Every command works on one named terrain inside a store directory; each
/// terrain is a single `.tin` file there.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Directory holding the terrain store.
    #[arg(long, env = "TERRAIN_STORE", default_value = "terrains")]
    pub store: PathBuf,

    /// Compress layer payloads when writing.
    #[arg(long, env = "TERRAIN_DEFLATE", default_value_t = false)]
    pub deflate: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest a point source into the point layer.
    IngestPoints(IngestPointsArgs),

    /// Attribute a line source against the stored points.
    IngestBreaklines(IngestBreaklinesArgs),

    /// Compute and store the boundary polygon.
    Boundary {
        terrain: String,

        /// Hull tolerance; estimated from the points when omitted.
        #[arg(long)]
        tolerance: Option<f64>,

        /// Percentile used when the tolerance is estimated.
        #[arg(long, default_value_t = 95.0)]
        percentile: f64,
    },

    /// Suggest a boundary tolerance without writing anything.
    EstimateTolerance {
        terrain: String,

        #[arg(long, default_value_t = 95.0)]
        percentile: f64,
    },

    /// Print layer counts and boundary metrics as JSON.
    Info {
        /// Terrain name; all terrains in the store when omitted.
        terrain: Option<String>,
    },

    /// Write one layer as GeoJSON.
    Export {
        terrain: String,

        #[arg(long, value_enum)]
        layer: LayerArg,

        #[arg(long, short)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct IngestPointsArgs {
    pub terrain: String,

    /// GeoJSON, CSV or ZIP source.
    pub source: PathBuf,

    /// Entry to read inside a ZIP source.
    #[arg(long)]
    pub layer: Option<String>,

    #[arg(long)]
    pub elevation_field: Option<String>,

    #[arg(long)]
    pub tag_field: Option<String>,

    /// Field copied into each point's comment.
    #[arg(long)]
    pub comment_field: Option<String>,

    /// Use the geometry's z coordinate as elevation.
    #[arg(long, default_value_t = false)]
    pub use_z: bool,

    /// Planar distance under which a point duplicates an earlier one.
    #[arg(long, default_value_t = terrain::ingest::DEFAULT_DUPLICATE_TOLERANCE)]
    pub tolerance: f64,

    /// Replace existing points.
    #[arg(long, default_value_t = false)]
    pub overwrite: bool,
}

impl IngestPointsArgs {
    pub fn options(&self) -> PointIngestOptions {
        PointIngestOptions {
            elevation_field: self.elevation_field.clone(),
            tag_field: self.tag_field.clone(),
            comment_field: self.comment_field.clone(),
            use_geometry_z: self.use_z,
            duplicate_tolerance: self.tolerance,
        }
    }
}

#[derive(Args, Debug)]
pub struct IngestBreaklinesArgs {
    pub terrain: String,

    pub source: PathBuf,

    #[arg(long)]
    pub layer: Option<String>,

    /// Add to the stored breaklines instead of replacing them.
    #[arg(long, default_value_t = false)]
    pub append: bool,

    /// Attribute against all points, including non-contourable ones.
    #[arg(long, default_value_t = false)]
    pub all_points: bool,

    #[arg(long)]
    pub name_field: Option<String>,

    /// Accepted but not applied.
    #[arg(long)]
    pub snap_tolerance: Option<f64>,
}

impl IngestBreaklinesArgs {
    pub fn options(&self) -> BreaklineIngestOptions {
        BreaklineIngestOptions {
            append: self.append,
            all_points: self.all_points,
            name_field: self.name_field.clone(),
            snap_tolerance: self.snap_tolerance,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LayerArg {
    Points,
    Breaklines,
    Boundary,
}

impl From<LayerArg> for LayerKind {
    fn from(arg: LayerArg) -> Self {
        match arg {
            LayerArg::Points => LayerKind::Points,
            LayerArg::Breaklines => LayerKind::Breaklines,
            LayerArg::Boundary => LayerKind::Boundary,
        }
    }
}
