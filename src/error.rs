/// Error types for loading, joining and coordinating parish data
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChoroplethError {
    /// Input file could not be opened or read
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Attribute CSV could not be parsed
    #[error("Failed to parse CSV {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A configured column is absent from the CSV header
    #[error("Column '{column}' not found in {path:?}")]
    MissingColumn { column: String, path: PathBuf },

    /// Two CSV rows share the same GEOID
    #[error("Duplicate GEOID '{geoid}' on rows {first_row} and {second_row}")]
    DuplicateGeoid {
        geoid: String,
        first_row: usize,
        second_row: usize,
    },

    /// Geometry file could not be decoded into polygons
    #[error("Invalid geometry in {path:?}: {reason}")]
    Geometry { path: PathBuf, reason: String },

    /// Named object is absent from a TopoJSON topology
    #[error("TopoJSON object '{object}' not found in {path:?}")]
    MissingObject { object: String, path: PathBuf },

    #[error("Unsupported geometry format: {0}")]
    UnsupportedFormat(String),

    /// Selection named an attribute that is not in the attribute table
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Inputs did not finish loading within the configured timeout
    #[error("Loading inputs timed out after {secs}s")]
    LoadTimeout { secs: u64 },

    /// A background load task panicked or was cancelled
    #[error("Load task for {input} failed: {reason}")]
    LoadTask { input: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ChoroplethError>;
