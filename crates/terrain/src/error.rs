//! Error types for terrain operations.

use thiserror::Error;

/// Terrain pipeline errors.
///
/// Every variant aborts the operation that raised it; nothing is written to
/// the store unless the whole record set was built first.
#[derive(Error, Debug)]
pub enum TerrainError {
    /// Attempt to overwrite non-empty data without explicit consent.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A required field is absent and heuristic resolution found nothing.
    #[error("Field resolution failed: {0}")]
    FieldResolution(String),

    /// A record's required attribute cannot be read or coerced.
    #[error("Malformed record {record}: {reason}")]
    MalformedRecord { record: usize, reason: String },

    /// Not enough usable data for the requested computation.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Caller supplied an unusable parameter value.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Source shape not supported by the reader (wrong geometry type, etc.).
    #[error("Unsupported source: {0}")]
    Source(String),

    /// IO error from the backing store or a source file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// GeoJSON parse error.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// JSON encoding error while exporting.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV parse error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Archive error.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl TerrainError {
    pub(crate) fn malformed(record: usize, reason: impl Into<String>) -> Self {
        TerrainError::MalformedRecord {
            record,
            reason: reason.into(),
        }
    }
}

/// Result type for terrain operations.
pub type Result<T> = std::result::Result<T, TerrainError>;
