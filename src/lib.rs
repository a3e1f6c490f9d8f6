//! histocube: per-feature histogram cubes for raster analysis.
//!
//! A cube is a single file holding, for every feature of a segmentation
//! (e.g. a clump id), one histogram per named layer. Layers are filled from
//! raster scans and read back per pixel.
//!
//! # Key Types
//!
//! - [`HistoCube`] - The container: create/open, layers, row I/O
//! - [`LayerSpec`] / [`LayerMeta`] - Declaring and describing layers
//! - [`Accumulator`] / [`HistogramTally`] - Populating layers from observations
//! - [`Materializer`] / [`StatsExporter`] - Reading bins and statistics back
//! - [`CubeConfig`] - Cache, chunking and compression settings
//!
//! # Raster blocks
//!
//! The [`raster`] module adapts all of the above to `ndarray` blocks of
//! 1-based pixel labels, the shape a tiled raster scan hands over.

pub mod accumulate;
pub mod bins;
pub mod config;
pub mod cube;
pub mod error;
pub mod format;
pub mod layer;
pub mod materialize;
pub mod raster;
pub mod stats;

mod store;

// =============================================================================
// Convenience Re-exports
// =============================================================================

// Container
pub use cube::{HistoCube, OpenMode};
pub use layer::{LayerMeta, LayerSpec};
pub use store::CacheStats;

// Configuration and errors
pub use config::{ConfigError, CubeConfig};
pub use error::{CubeError, FormatError, Result};
pub use format::Codec;

// Populating and reading
pub use accumulate::{Accumulator, AccumulatorStats, HistogramTally};
pub use materialize::Materializer;
pub use stats::{HistogramStats, StatKind, StatsExporter};

// Raster adapters
pub use raster::{
    export_block, export_stats_block, populate_band, populate_block, tally_block_parallel,
    PixelExporter, PixelVisitor,
};
