//! The histogram cube container.
//!
//! A [`HistoCube`] owns one open file. It holds the number of feature rows
//! (fixed when the file is created) and an ordered list of layers, each a
//! `[num_features, num_bins]` matrix of `u32` counts.
//!
//! # Example
//!
//! ```no_run
//! use histocube::{HistoCube, LayerSpec, OpenMode};
//!
//! # fn main() -> histocube::Result<()> {
//! let mut cube = HistoCube::create("segments.hcube", 5000)?;
//! cube.create_layer(
//!     LayerSpec::builder()
//!         .name("slope")
//!         .bins((0..90).collect())
//!         .build()?,
//! )?;
//! cube.set_row("slope", 41, &[1; 90])?;
//! cube.close()?;
//!
//! let mut cube = HistoCube::open("segments.hcube", OpenMode::ReadOnly)?;
//! assert_eq!(cube.get_row("slope", 41)?, vec![1; 90]);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::CubeConfig;
use crate::error::{CubeError, FormatError, Result};
use crate::format::{
    AttrReader, AttrValue, Catalog, Dataset, FilterPipeline, Group, ATTR_FILETYPE, ATTR_VERSION,
    DATASET_NUM_FEATS, FILETYPE, GROUP_DATA, GROUP_METADATA, SCHEMA_VERSION,
};
use crate::layer::{LayerMeta, LayerSpec};
use crate::store::{CacheStats, ChunkStore};

/// Access mode for [`HistoCube::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// An open histogram cube file.
///
/// All I/O goes through `&mut self`, so a handle has one user at a time.
/// Several read-only handles may be opened on the same file; two read-write
/// handles on one file are not coordinated.
///
/// Dropping an open cube flushes it. Use [`close`](Self::close) to see
/// flush errors.
#[derive(Debug)]
pub struct HistoCube {
    store: Option<ChunkStore>,
    path: PathBuf,
    mode: OpenMode,
    num_features: u64,
    /// Sorted by `order`; index `i` is store slot `i`.
    layers: Vec<LayerMeta>,
    config: CubeConfig,
}

impl HistoCube {
    /// Create a cube with `num_features` rows per layer, replacing any file
    /// at `path`.
    pub fn create(path: impl AsRef<Path>, num_features: u64) -> Result<Self> {
        Self::create_with_config(path, num_features, CubeConfig::default())
    }

    pub fn create_with_config(
        path: impl AsRef<Path>,
        num_features: u64,
        config: CubeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        if num_features == 0 {
            return Err(CubeError::NoFeatures);
        }

        let mut catalog = Catalog::default();
        catalog
            .attributes
            .insert(ATTR_FILETYPE.into(), AttrValue::Str(FILETYPE.into()));
        catalog
            .attributes
            .insert(ATTR_VERSION.into(), AttrValue::Str(SCHEMA_VERSION.into()));
        let mut metadata = Group::default();
        metadata.datasets.insert(
            DATASET_NUM_FEATS.into(),
            Dataset::scalar_u64(num_features),
        );
        catalog.groups.insert(GROUP_METADATA.into(), metadata);
        catalog.groups.insert(GROUP_DATA.into(), Group::default());

        let store = ChunkStore::create(path, catalog, config.cache_chunks)?;
        info!(path = %path.display(), num_features, "created histogram cube");

        Ok(Self {
            store: Some(store),
            path: path.to_path_buf(),
            mode: OpenMode::ReadWrite,
            num_features,
            layers: Vec::new(),
            config,
        })
    }

    /// Open an existing cube, validating its header and layer metadata.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        Self::open_with_config(path, mode, CubeConfig::default())
    }

    pub fn open_with_config(
        path: impl AsRef<Path>,
        mode: OpenMode,
        config: CubeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let mut store = ChunkStore::open(path, mode == OpenMode::ReadWrite, config.cache_chunks)?;

        let (num_features, layers) = read_schema(store.catalog())?;
        for layer in &layers {
            store.register_layer(&layer.name)?;
        }
        info!(
            path = %path.display(),
            num_features,
            layers = layers.len(),
            ?mode,
            "opened histogram cube"
        );

        Ok(Self {
            store: Some(store),
            path: path.to_path_buf(),
            mode,
            num_features,
            layers,
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn config(&self) -> &CubeConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    /// Number of feature rows in every layer.
    pub fn feature_count(&self) -> u64 {
        self.num_features
    }

    /// Layers in creation order.
    pub fn layers(&self) -> &[LayerMeta] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&LayerMeta> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.store()?.cache_stats())
    }

    /// Add an all-zero layer.
    pub fn create_layer(&mut self, spec: LayerSpec) -> Result<&LayerMeta> {
        spec.validate()?;
        if self.mode == OpenMode::ReadOnly {
            return Err(CubeError::ReadOnly);
        }
        self.store()?;
        if self.layer(&spec.name).is_some() {
            return Err(CubeError::DuplicateLayer(spec.name));
        }

        let chunk_rows = spec.chunk_rows.unwrap_or(self.config.chunk_rows);
        let chunk_rows = u64::from(chunk_rows).min(self.num_features) as u32;
        let level = spec
            .compression_level
            .unwrap_or(self.config.compression_level);
        self.config.codec.check_level(level)?;
        let filters = FilterPipeline {
            shuffle: self.config.shuffle,
            codec: self.config.codec,
            level,
        };

        let order = u32::try_from(self.layers.len() + 1).map_err(|_| CubeError::InvalidLayer {
            name: spec.name.clone(),
            reason: "too many layers".into(),
        })?;
        let meta = LayerMeta {
            name: spec.name.clone(),
            order,
            scale: spec.scale,
            offset: spec.offset,
            timestamp: spec.effective_timestamp(),
            bins: spec.bins,
            chunk_rows,
        };

        let mut dataset = Dataset::chunked_u32(
            self.num_features,
            meta.num_bins() as u64,
            chunk_rows,
            filters,
        );
        dataset.attributes = meta.to_attributes();

        let store = self.store_mut()?;
        store
            .catalog_mut()?
            .group_mut(GROUP_DATA)?
            .datasets
            .insert(meta.name.clone(), dataset);
        let slot = store.register_layer(&meta.name)?;
        debug_assert_eq!(slot, self.layers.len());

        info!(
            layer = %meta.name,
            order = meta.order,
            bins = meta.num_bins(),
            chunk_rows,
            "created layer"
        );
        self.layers.push(meta);
        Ok(&self.layers[slot])
    }

    /// Counts of one feature row.
    pub fn get_row(&mut self, name: &str, row: u64) -> Result<Vec<u32>> {
        let (_, meta) = self.layer_slot(name)?;
        let mut out = vec![0u32; meta.num_bins()];
        self.read_row_into(name, row, &mut out)?;
        Ok(out)
    }

    /// Like [`get_row`](Self::get_row), into a caller-owned buffer of exactly
    /// `num_bins` values.
    pub fn read_row_into(&mut self, name: &str, row: u64, out: &mut [u32]) -> Result<()> {
        let (slot, meta) = self.layer_slot(name)?;
        self.check_row(row)?;
        check_len(meta.num_bins(), out.len())?;
        self.store_mut()?.read_rows(slot, row, out)
    }

    /// Overwrite one feature row.
    pub fn set_row(&mut self, name: &str, row: u64, counts: &[u32]) -> Result<()> {
        let (slot, meta) = self.layer_slot(name)?;
        self.check_row(row)?;
        check_len(meta.num_bins(), counts.len())?;
        self.writable_store()?.write_rows(slot, row, counts)
    }

    /// Counts of rows `start..end`, row-major.
    pub fn get_rows(&mut self, start: u64, end: u64, name: &str) -> Result<Vec<u32>> {
        let (slot, meta) = self.layer_slot(name)?;
        self.check_range(start, end)?;
        let mut out = vec![0u32; (end - start) as usize * meta.num_bins()];
        self.store_mut()?.read_rows(slot, start, &mut out)?;
        Ok(out)
    }

    /// Overwrite rows `start..end` from a row-major buffer.
    ///
    /// Every argument is checked before anything is written.
    pub fn set_rows(&mut self, start: u64, end: u64, name: &str, counts: &[u32]) -> Result<()> {
        let (slot, meta) = self.layer_slot(name)?;
        self.check_range(start, end)?;
        let num_bins = meta.num_bins();
        if counts.len() % num_bins != 0 {
            return Err(CubeError::BufferNotMultiple {
                len: counts.len(),
                num_bins,
            });
        }
        check_len((end - start) as usize * num_bins, counts.len())?;
        self.writable_store()?.write_rows(slot, start, counts)
    }

    /// Write cached changes and the catalog to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.store_mut()?.flush()
    }

    /// Flush and release the file. Later calls fail with [`CubeError::Closed`].
    pub fn close(&mut self) -> Result<()> {
        let mut store = self.store.take().ok_or(CubeError::Closed)?;
        store.flush()?;
        info!(path = %self.path.display(), "closed histogram cube");
        Ok(())
    }

    /// Write a compact copy of this cube to `dest`.
    ///
    /// Chunks rewritten over the life of a cube leave their old copies behind
    /// in the file; the copy holds only live data.
    pub fn repack_into(&mut self, dest: impl AsRef<Path>) -> Result<HistoCube> {
        let dest = dest.as_ref();
        self.store()?;
        if dest == self.path {
            return Err(CubeError::Create {
                path: dest.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "cannot repack a cube onto itself",
                ),
            });
        }
        let mut out = HistoCube::create_with_config(dest, self.num_features, self.config.clone())?;

        for meta in self.layers.clone() {
            out.create_layer(
                LayerSpec::builder()
                    .name(meta.name.clone())
                    .bins(meta.bins.clone())
                    .scale(meta.scale)
                    .offset(meta.offset)
                    .has_timestamp(meta.timestamp.is_some())
                    .maybe_timestamp(meta.timestamp)
                    .chunk_rows(meta.chunk_rows)
                    .build()?,
            )?;

            let step = u64::from(meta.chunk_rows);
            let mut start = 0;
            while start < self.num_features {
                let end = (start + step).min(self.num_features);
                let rows = self.get_rows(start, end, &meta.name)?;
                out.set_rows(start, end, &meta.name, &rows)?;
                start = end;
            }
        }
        out.flush()?;
        info!(from = %self.path.display(), to = %dest.display(), "repacked histogram cube");
        Ok(out)
    }

    pub(crate) fn layer_slot(&self, name: &str) -> Result<(usize, &LayerMeta)> {
        self.store()?;
        self.layers
            .iter()
            .enumerate()
            .find(|(_, l)| l.name == name)
            .ok_or_else(|| CubeError::UnknownLayer(name.to_string()))
    }

    fn check_row(&self, row: u64) -> Result<()> {
        if row >= self.num_features {
            return Err(CubeError::RowOutOfRange {
                row,
                num_features: self.num_features,
            });
        }
        Ok(())
    }

    fn check_range(&self, start: u64, end: u64) -> Result<()> {
        if start >= end || end > self.num_features {
            return Err(CubeError::InvalidRowRange {
                start,
                end,
                num_features: self.num_features,
            });
        }
        Ok(())
    }

    fn store(&self) -> Result<&ChunkStore> {
        self.store.as_ref().ok_or(CubeError::Closed)
    }

    fn store_mut(&mut self) -> Result<&mut ChunkStore> {
        self.store.as_mut().ok_or(CubeError::Closed)
    }

    fn writable_store(&mut self) -> Result<&mut ChunkStore> {
        if self.mode == OpenMode::ReadOnly {
            return Err(CubeError::ReadOnly);
        }
        self.store_mut()
    }
}

impl Drop for HistoCube {
    fn drop(&mut self) {
        if let Some(mut store) = self.store.take() {
            if let Err(e) = store.flush() {
                warn!(path = %self.path.display(), error = %e, "failed to flush cube on drop");
            }
        }
    }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(CubeError::BufferLength { expected, actual });
    }
    Ok(())
}

/// Validate the header and rebuild the layer list from the catalog.
fn read_schema(catalog: &Catalog) -> Result<(u64, Vec<LayerMeta>), FormatError> {
    let root = AttrReader::new("/", &catalog.attributes);

    let filetype = root.opt_str(ATTR_FILETYPE).ok().flatten();
    if filetype != Some(FILETYPE) {
        return Err(FormatError::WrongFileType {
            found: filetype.map(str::to_string),
        });
    }
    let version = root.opt_str(ATTR_VERSION).ok().flatten();
    if version != Some(SCHEMA_VERSION) {
        return Err(FormatError::WrongSchemaVersion {
            found: version.map(str::to_string),
        });
    }

    let num_features = catalog
        .dataset(GROUP_METADATA, DATASET_NUM_FEATS)?
        .read_scalar_u64(DATASET_NUM_FEATS)?;
    if num_features == 0 {
        return Err(FormatError::Corrupt("NUM_OF_FEATS is zero".into()));
    }

    let mut layers = catalog
        .group(GROUP_DATA)?
        .datasets
        .iter()
        .map(|(name, ds)| LayerMeta::from_dataset(name, ds, num_features))
        .collect::<Result<Vec<_>, _>>()?;
    layers.sort_by_key(|l| l.order);

    for (i, layer) in layers.iter().enumerate() {
        if layer.order as usize != i + 1 {
            return Err(FormatError::Corrupt(format!(
                "layer `{}` has ORDER {} but is number {} of {}",
                layer.name,
                layer.order,
                i + 1,
                layers.len()
            )));
        }
    }
    Ok((num_features, layers))
}
