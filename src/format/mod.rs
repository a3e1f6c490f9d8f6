//! On-disk layout of a histogram cube.
//!
//! A cube file is a fixed 64-byte [`Superblock`] followed by an append-only
//! region holding compressed chunks and postcard-encoded [`Catalog`]s. The
//! superblock points at the catalog that is currently authoritative.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Superblock (64 bytes)                                      │
//! │ - Magic "HISTCUBE", format version                         │
//! │ - Catalog offset / length / CRC32                          │
//! ├────────────────────────────────────────────────────────────┤
//! │ Chunk blobs (shuffled + compressed u32 rows)               │
//! │ Catalog blobs (groups → datasets → attributes, chunk index)│
//! │ ... appended on every flush                                │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The logical schema inside the catalog:
//!
//! ```text
//! /                       FILETYPE = "RSGISLibHistoCube", VERSION = "1.0"
//! /METADATA/NUM_OF_FEATS  scalar u64
//! /DATA/<layer>           u32 [num_features, num_bins], chunked
//!                         ORDER, SCALE, OFFSET, NUMBINS, BINS,
//!                         HAS_DATE_TIME, DATE_TIME
//! ```

mod catalog;
mod filters;
mod superblock;

pub use catalog::{
    AttrReader, AttrValue, Attributes, Catalog, ChunkLayout, ChunkLocation, DataType, Dataset,
    Group, Storage,
};
pub use filters::{shuffle, unshuffle, Codec, FilterPipeline};
pub use superblock::{
    compute_checksum, Superblock, FORMAT_VERSION_MAJOR, FORMAT_VERSION_MINOR, MAGIC,
    SUPERBLOCK_SIZE,
};

/// Value of the root `FILETYPE` attribute.
pub const FILETYPE: &str = "RSGISLibHistoCube";

/// Value of the root `VERSION` attribute.
pub const SCHEMA_VERSION: &str = "1.0";

/// Root attribute names.
pub const ATTR_FILETYPE: &str = "FILETYPE";
pub const ATTR_VERSION: &str = "VERSION";

/// Group holding container-wide metadata datasets.
pub const GROUP_METADATA: &str = "METADATA";
/// Group holding one dataset per layer.
pub const GROUP_DATA: &str = "DATA";
/// Scalar dataset with the number of feature rows.
pub const DATASET_NUM_FEATS: &str = "NUM_OF_FEATS";

/// Per-layer attribute names.
pub const ATTR_ORDER: &str = "ORDER";
pub const ATTR_SCALE: &str = "SCALE";
pub const ATTR_OFFSET: &str = "OFFSET";
pub const ATTR_NUMBINS: &str = "NUMBINS";
pub const ATTR_BINS: &str = "BINS";
pub const ATTR_HAS_DATE_TIME: &str = "HAS_DATE_TIME";
pub const ATTR_DATE_TIME: &str = "DATE_TIME";

/// `DATE_TIME` value stored when a layer has no timestamp.
pub const NOT_A_DATE_TIME: &str = "not-a-date-time";

/// Timestamp text layout for `DATE_TIME` (ISO-8601 extended).
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
