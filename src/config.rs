//! Container configuration.
//!
//! [`CubeConfig`] collects the tunables that are not part of the on-disk
//! schema: chunk cache size, the defaults used when a layer does not specify
//! its own chunking and compression, and the accumulator flush threshold.
//!
//! # Example
//!
//! ```
//! use histocube::{Codec, CubeConfig};
//!
//! let config = CubeConfig::builder()
//!     .cache_chunks(16)
//!     .codec(Codec::Deflate)
//!     .compression_level(6)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.chunk_rows, 1000);
//! ```

use std::path::Path;

use bon::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::format::Codec;

/// Default number of feature rows per chunk.
pub const DEFAULT_CHUNK_ROWS: u32 = 1000;

/// Default deflate level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

/// Errors raised while validating or loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("compression level {level} is out of range for {codec:?} ({min}..={max})")]
    CompressionLevel {
        codec: Codec,
        level: u32,
        min: u32,
        max: u32,
    },

    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for an open cube.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(derive(Clone, Debug), finish_fn(vis = "", name = __build_internal))]
#[serde(default)]
pub struct CubeConfig {
    /// Decoded chunks kept in memory per open cube. Default: 64.
    #[builder(default = 64)]
    pub cache_chunks: usize,

    /// Rows per chunk for layers that do not set their own. Default: 1000.
    #[builder(default = DEFAULT_CHUNK_ROWS)]
    pub chunk_rows: u32,

    /// Chunk codec for new layers. Default: deflate.
    #[builder(default)]
    pub codec: Codec,

    /// Codec level for new layers. Default: 1.
    #[builder(default = DEFAULT_COMPRESSION_LEVEL)]
    pub compression_level: u32,

    /// Byte-shuffle chunks before compression. Default: true.
    #[builder(default = true)]
    pub shuffle: bool,

    /// Rows an accumulator buffers before it flushes. Default: 65536.
    #[builder(default = 65_536)]
    pub flush_rows: usize,
}

impl<S: cube_config_builder::IsComplete> CubeConfigBuilder<S> {
    /// Build and validate the configuration.
    pub fn build(self) -> Result<CubeConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self::builder().build().expect("default config is valid")
    }
}

impl CubeConfig {
    /// Check every field; called by the builder and the JSON loaders.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_chunks == 0 {
            return Err(ConfigError::Zero {
                field: "cache_chunks",
            });
        }
        if self.chunk_rows == 0 {
            return Err(ConfigError::Zero { field: "chunk_rows" });
        }
        if self.flush_rows == 0 {
            return Err(ConfigError::Zero { field: "flush_rows" });
        }
        self.codec.check_level(self.compression_level)
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
