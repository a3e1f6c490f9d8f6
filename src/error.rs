//! Error types for histogram cube operations.
//!
//! Errors fall into three groups:
//!
//! - **Format errors** ([`FormatError`]): the file is not a cube, or its
//!   header, catalog or chunk data is inconsistent. Fatal for `open`.
//! - **Validation errors**: a call was made with arguments the container
//!   cannot honour (unknown layer, row out of range, wrong buffer length).
//!   The file is left untouched.
//! - **Underlying errors**: I/O, catalog encoding and codec failures.
//!
//! Out-of-range feature ids and measurements outside every bin are *not*
//! errors; accumulation and materialization skip them.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;

/// Result alias used throughout the crate.
pub type Result<T, E = CubeError> = std::result::Result<T, E>;

/// Problems with the structure of a cube file.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Superblock magic does not identify a histogram cube.
    #[error("not a histogram cube file")]
    NotACube,

    /// The physical container needs a newer reader.
    #[error("container format {major}.{minor} is not supported")]
    UnsupportedFormat { major: u8, minor: u8 },

    /// Root `FILETYPE` attribute absent or wrong.
    #[error("unexpected file type: {found:?}")]
    WrongFileType { found: Option<String> },

    /// Root `VERSION` attribute absent or wrong.
    #[error("unsupported schema version: {found:?}")]
    WrongSchemaVersion { found: Option<String> },

    /// A required group or dataset is absent.
    #[error("missing dataset `{0}`")]
    MissingDataset(String),

    /// A required attribute is absent.
    #[error("missing attribute `{name}` on `{object}`")]
    MissingAttribute { object: String, name: String },

    /// An attribute exists with the wrong type or an invalid value.
    #[error("invalid attribute `{name}` on `{object}`: {reason}")]
    InvalidAttribute {
        object: String,
        name: String,
        reason: String,
    },

    /// Stored bytes do not match their checksum.
    #[error("checksum mismatch in {what}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        what: &'static str,
        expected: u32,
        actual: u32,
    },

    /// The file ends before a referenced region.
    #[error("file truncated: needed {needed} bytes at offset {offset}, file has {len}")]
    Truncated { offset: u64, needed: u64, len: u64 },

    /// Anything else that does not add up.
    #[error("corrupt container: {0}")]
    Corrupt(String),
}

/// The domain error for every cube operation.
#[derive(Debug, Error)]
pub enum CubeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    /// Catalog encoding or decoding failed.
    #[error("catalog encoding error: {0}")]
    Encoding(#[from] postcard::Error),

    #[error("chunk compression error: {0}")]
    Compression(std::io::Error),

    #[error("chunk decompression error: {0}")]
    Decompression(std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot create cube at {path:?}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot open cube at {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("a cube needs at least one feature row")]
    NoFeatures,

    #[error("layer `{0}` already exists")]
    DuplicateLayer(String),

    #[error("layer `{0}` does not exist")]
    UnknownLayer(String),

    #[error("layer `{0}` is flagged with a timestamp but none was supplied")]
    MissingTimestamp(String),

    #[error("invalid layer `{name}`: {reason}")]
    InvalidLayer { name: String, reason: String },

    #[error("row {row} is out of range (num_features = {num_features})")]
    RowOutOfRange { row: u64, num_features: u64 },

    #[error("invalid row range {start}..{end} (num_features = {num_features})")]
    InvalidRowRange {
        start: u64,
        end: u64,
        num_features: u64,
    },

    #[error("buffer has {actual} values, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    #[error("buffer of {len} values is not a multiple of {num_bins} bins")]
    BufferNotMultiple { len: usize, num_bins: usize },

    #[error("bin position {position} is out of range for layer `{layer}` ({num_bins} bins)")]
    BinPosition {
        layer: String,
        position: usize,
        num_bins: usize,
    },

    #[error("bin label {label} is not declared by layer `{layer}`")]
    UnknownBin { layer: String, label: i32 },

    #[error("raster blocks disagree: {0}")]
    Shape(String),

    #[error("cube is opened read-only")]
    ReadOnly,

    #[error("cube is closed")]
    Closed,
}
