//! Chunk filter pipeline: byte shuffle followed by a compression codec.
//!
//! Histogram counts are small integers, so most of their high-order bytes are
//! zero. Shuffling groups byte `k` of every element together before the codec
//! sees the data, which turns those zeros into long runs.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::error::{CubeError, FormatError, Result};

fn inflate(decoder: impl Read, limit: u64, len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len * 4);
    decoder
        .take(limit)
        .read_to_end(&mut out)
        .map_err(CubeError::Decompression)?;
    Ok(out)
}

/// Compression codec applied to each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    /// Store chunks uncompressed.
    None,
    /// zlib-wrapped deflate, levels 0-9.
    #[default]
    Deflate,
    /// zstd, levels 1-22. Needs the `zstd` feature.
    Zstd,
}

impl Codec {
    /// Valid level range for this codec.
    pub fn level_range(self) -> (u32, u32) {
        match self {
            Codec::None => (0, 0),
            Codec::Deflate => (0, 9),
            Codec::Zstd => (1, 22),
        }
    }

    /// Reject a level the codec does not understand. `None` ignores levels.
    pub fn check_level(self, level: u32) -> Result<(), ConfigError> {
        if self == Codec::None {
            return Ok(());
        }
        let (min, max) = self.level_range();
        if level < min || level > max {
            return Err(ConfigError::CompressionLevel {
                codec: self,
                level,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// Filters recorded per chunked dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPipeline {
    pub shuffle: bool,
    pub codec: Codec,
    pub level: u32,
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self {
            shuffle: true,
            codec: Codec::Deflate,
            level: 1,
        }
    }
}

impl FilterPipeline {
    /// Encode a run of counts into the stored chunk bytes.
    pub fn encode(&self, values: &[u32]) -> Result<Vec<u8>> {
        let mut raw = Vec::with_capacity(values.len() * 4);
        for v in values {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let raw = if self.shuffle { shuffle(&raw, 4) } else { raw };

        match self.codec {
            Codec::None => Ok(raw),
            Codec::Deflate => {
                let mut encoder = ZlibEncoder::new(
                    Vec::with_capacity(raw.len() / 4),
                    Compression::new(self.level),
                );
                encoder.write_all(&raw).map_err(CubeError::Compression)?;
                encoder.finish().map_err(CubeError::Compression)
            }
            #[cfg(feature = "zstd")]
            Codec::Zstd => zstd::encode_all(raw.as_slice(), self.level as i32)
                .map_err(CubeError::Compression),
            #[cfg(not(feature = "zstd"))]
            Codec::Zstd => Err(CubeError::Compression(std::io::Error::other(
                "zstd support is not enabled",
            ))),
        }
    }

    /// Decode stored chunk bytes back into exactly `len` counts.
    pub fn decode(&self, bytes: &[u8], len: usize) -> Result<Vec<u32>> {
        // One byte past the expected size is enough to report a mismatch.
        let limit = len as u64 * 4 + 1;
        let raw = match self.codec {
            Codec::None => bytes.to_vec(),
            Codec::Deflate => inflate(ZlibDecoder::new(bytes), limit, len)?,
            #[cfg(feature = "zstd")]
            Codec::Zstd => inflate(
                zstd::stream::read::Decoder::new(bytes).map_err(CubeError::Decompression)?,
                limit,
                len,
            )?,
            #[cfg(not(feature = "zstd"))]
            Codec::Zstd => {
                return Err(CubeError::Decompression(std::io::Error::other(
                    "zstd support is not enabled",
                )))
            }
        };

        if raw.len() != len * 4 {
            return Err(FormatError::Corrupt(format!(
                "chunk decodes to {} bytes, expected {}",
                raw.len(),
                len * 4
            ))
            .into());
        }

        let raw = if self.shuffle { unshuffle(&raw, 4) } else { raw };
        Ok(raw
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

/// Byte-transpose `data` made of `elem_size`-byte elements.
///
/// Trailing bytes that do not form a whole element are copied unchanged.
pub fn shuffle(data: &[u8], elem_size: usize) -> Vec<u8> {
    if elem_size <= 1 {
        return data.to_vec();
    }
    let n = data.len() / elem_size;
    let mut out = vec![0u8; data.len()];
    for (i, elem) in data.chunks_exact(elem_size).enumerate() {
        for (k, &byte) in elem.iter().enumerate() {
            out[k * n + i] = byte;
        }
    }
    let tail = n * elem_size;
    out[tail..].copy_from_slice(&data[tail..]);
    out
}

/// Inverse of [`shuffle`].
pub fn unshuffle(data: &[u8], elem_size: usize) -> Vec<u8> {
    if elem_size <= 1 {
        return data.to_vec();
    }
    let n = data.len() / elem_size;
    let mut out = vec![0u8; data.len()];
    for (i, elem) in out.chunks_exact_mut(elem_size).enumerate() {
        for (k, byte) in elem.iter_mut().enumerate() {
            *byte = data[k * n + i];
        }
    }
    let tail = n * elem_size;
    out[tail..].copy_from_slice(&data[tail..]);
    out
}
