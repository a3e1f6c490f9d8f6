//! File-level storage: the open handle, the catalog and the chunk cache.
//!
//! Writes are append-only. A dirty chunk is encoded and appended at the end
//! of the file, then its location in the catalog is updated. [`ChunkStore::flush`]
//! writes every dirty chunk, appends the catalog and only then rewrites the
//! superblock, so a flush that fails part-way leaves the previous catalog in
//! charge.

mod cache;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

pub use cache::CacheStats;
use cache::{CachedChunk, ChunkCache, ChunkKey};

use crate::error::{CubeError, FormatError, Result};
use crate::format::{
    compute_checksum, Catalog, ChunkLayout, ChunkLocation, Dataset, Superblock, GROUP_DATA,
    SUPERBLOCK_SIZE,
};

/// Geometry of a registered chunked dataset, cached to avoid catalog walks.
#[derive(Debug, Clone)]
struct Slot {
    name: String,
    rows: u64,
    cols: usize,
    chunk_rows: u64,
}

/// Part of a row range that falls in one chunk, in elements.
#[derive(Debug, Clone, Copy)]
struct Span {
    chunk: u64,
    /// Offset into the chunk's values.
    from: usize,
    len: usize,
}

impl Slot {
    fn rows_in_chunk(&self, chunk: u64) -> usize {
        let start = chunk * self.chunk_rows;
        (self.rows - start).min(self.chunk_rows) as usize
    }

    /// Split rows `start..start + n_rows` at chunk boundaries.
    fn spans(&self, start: u64, n_rows: u64) -> impl Iterator<Item = Span> + '_ {
        let end = start + n_rows;
        let mut row = start;
        std::iter::from_fn(move || {
            if row >= end {
                return None;
            }
            let chunk = row / self.chunk_rows;
            let chunk_start = chunk * self.chunk_rows;
            let take = (self.rows_in_chunk(chunk) as u64 - (row - chunk_start)).min(end - row);
            let span = Span {
                chunk,
                from: (row - chunk_start) as usize * self.cols,
                len: take as usize * self.cols,
            };
            row += take;
            Some(span)
        })
    }
}

#[derive(Debug)]
pub struct ChunkStore {
    file: File,
    path: PathBuf,
    writable: bool,
    catalog: Catalog,
    slots: Vec<Slot>,
    cache: ChunkCache,
    /// Next append offset.
    end: u64,
    catalog_dirty: bool,
}

impl ChunkStore {
    /// Create (or truncate) a file and write `catalog` as its first catalog.
    pub fn create(path: &Path, catalog: Catalog, cache_chunks: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| CubeError::Create {
                path: path.to_path_buf(),
                source,
            })?;

        let mut store = Self {
            file,
            path: path.to_path_buf(),
            writable: true,
            catalog,
            slots: Vec::new(),
            cache: ChunkCache::new(cache_chunks),
            end: SUPERBLOCK_SIZE as u64,
            catalog_dirty: true,
        };
        store.flush()?;
        Ok(store)
    }

    /// Open an existing file and load its current catalog.
    pub fn open(path: &Path, writable: bool, cache_chunks: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|source| CubeError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let len = file.metadata()?.len();

        let mut header = [0u8; SUPERBLOCK_SIZE];
        if len < SUPERBLOCK_SIZE as u64 {
            return Err(FormatError::NotACube.into());
        }
        file.read_exact(&mut header)?;
        let superblock = Superblock::from_bytes(&header)?;

        let catalog_bytes = read_region(
            &mut file,
            len,
            superblock.catalog_offset,
            superblock.catalog_len,
        )?;
        let actual = compute_checksum(&catalog_bytes);
        if actual != superblock.catalog_checksum {
            return Err(FormatError::ChecksumMismatch {
                what: "catalog",
                expected: superblock.catalog_checksum,
                actual,
            }
            .into());
        }
        let catalog = Catalog::decode(&catalog_bytes)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            writable,
            catalog,
            slots: Vec::new(),
            cache: ChunkCache::new(cache_chunks),
            end: len,
            catalog_dirty: false,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Mutable catalog access; the catalog is rewritten on the next flush.
    pub fn catalog_mut(&mut self) -> Result<&mut Catalog> {
        self.ensure_writable()?;
        self.catalog_dirty = true;
        Ok(&mut self.catalog)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Register `/DATA/<name>` for row I/O and return its slot.
    pub fn register_layer(&mut self, name: &str) -> Result<usize> {
        let dataset = self.catalog.dataset(GROUP_DATA, name)?;
        let layout = chunk_layout(dataset, name)?;
        let (rows, cols) = match dataset.shape.as_slice() {
            [rows, cols] => (*rows, *cols as usize),
            _ => {
                return Err(FormatError::Corrupt(format!("layer `{name}` is not 2-D")).into());
            }
        };
        if layout.chunk_rows == 0 {
            return Err(FormatError::Corrupt(format!("layer `{name}` has zero-row chunks")).into());
        }
        self.slots.push(Slot {
            name: name.to_string(),
            rows,
            cols,
            chunk_rows: u64::from(layout.chunk_rows),
        });
        Ok(self.slots.len() - 1)
    }

    /// Copy rows `start..start + out.len() / cols` of a layer into `out`.
    pub fn read_rows(&mut self, slot: usize, start: u64, out: &mut [u32]) -> Result<()> {
        let geometry = self.slots[slot].clone();
        let n_rows = (out.len() / geometry.cols) as u64;
        debug_assert!(start + n_rows <= geometry.rows);

        let mut written = 0usize;
        for span in geometry.spans(start, n_rows) {
            let values = &self.load(slot, span.chunk)?.values;
            out[written..written + span.len]
                .copy_from_slice(&values[span.from..span.from + span.len]);
            written += span.len;
        }
        Ok(())
    }

    /// Overwrite rows `start..start + data.len() / cols` of a layer.
    ///
    /// Every chunk the rows touch is decoded before any of them changes, so
    /// a chunk that fails to load leaves the layer as it was.
    pub fn write_rows(&mut self, slot: usize, start: u64, data: &[u32]) -> Result<()> {
        self.ensure_writable()?;
        let geometry = self.slots[slot].clone();
        let n_rows = (data.len() / geometry.cols) as u64;
        debug_assert!(start + n_rows <= geometry.rows);

        let spans: Vec<Span> = geometry.spans(start, n_rows).collect();
        if let [span] = spans.as_slice() {
            let cached = self.load(slot, span.chunk)?;
            cached.values[span.from..span.from + span.len].copy_from_slice(data);
            cached.dirty = true;
            return Ok(());
        }

        let mut staged = Vec::with_capacity(spans.len());
        for span in &spans {
            let key = ChunkKey {
                dataset: slot,
                chunk: span.chunk,
            };
            let values = match self.cache.get_mut(key) {
                Some(cached) => cached.values.clone(),
                None => self.read_chunk(key)?,
            };
            staged.push((key, values));
        }

        let mut read = 0usize;
        for (span, (key, mut values)) in spans.iter().zip(staged) {
            values[span.from..span.from + span.len]
                .copy_from_slice(&data[read..read + span.len]);
            read += span.len;
            self.cache.insert(key, CachedChunk { values, dirty: true });
        }
        let capacity = self.cache.capacity();
        self.evict_down_to(capacity)
    }

    /// Persist dirty chunks, then the catalog, then the superblock.
    pub fn flush(&mut self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }

        let dirty = self.cache.dirty_keys();
        for key in &dirty {
            let values = match self.cache.peek_mut(*key) {
                Some(chunk) => std::mem::take(&mut chunk.values),
                None => continue,
            };
            let result = self.write_chunk(*key, &values);
            if let Some(chunk) = self.cache.peek_mut(*key) {
                chunk.values = values;
                if result.is_ok() {
                    chunk.dirty = false;
                }
            }
            result?;
        }

        if !self.catalog_dirty && dirty.is_empty() {
            return Ok(());
        }

        let bytes = self.catalog.encode()?;
        let offset = self.append(&bytes)?;
        let superblock = Superblock::new(offset, bytes.len() as u64, compute_checksum(&bytes));
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&superblock.to_bytes())?;
        self.file.sync_data()?;
        self.catalog_dirty = false;

        debug!(
            path = %self.path.display(),
            chunks = dirty.len(),
            catalog_bytes = bytes.len(),
            "flushed cube"
        );
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(CubeError::ReadOnly)
        }
    }

    /// Get a chunk into the cache, writing back whatever it displaces.
    fn load(&mut self, slot: usize, chunk: u64) -> Result<&mut CachedChunk> {
        let key = ChunkKey {
            dataset: slot,
            chunk,
        };
        if self.cache.get_mut(key).is_none() {
            let room = self.cache.capacity() - 1;
            self.evict_down_to(room)?;
            let values = self.read_chunk(key)?;
            self.cache.insert(
                key,
                CachedChunk {
                    values,
                    dirty: false,
                },
            );
        }
        self.cache
            .peek_mut(key)
            .ok_or_else(|| FormatError::Corrupt("chunk vanished from cache".into()).into())
    }

    /// Evict until at most `keep` chunks are cached. A dirty victim that
    /// cannot be written stays cached.
    fn evict_down_to(&mut self, keep: usize) -> Result<()> {
        while let Some((victim, evicted)) = self.cache.evict_lru(keep) {
            if evicted.dirty {
                if let Err(e) = self.write_chunk(victim, &evicted.values) {
                    self.cache.restore(victim, evicted);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn read_chunk(&mut self, key: ChunkKey) -> Result<Vec<u32>> {
        let slot = &self.slots[key.dataset];
        let len = slot.rows_in_chunk(key.chunk) * slot.cols;
        let name = slot.name.clone();

        let dataset = self.catalog.dataset(GROUP_DATA, &name)?;
        let layout = chunk_layout(dataset, &name)?;
        let Some(location) = layout.chunks.get(&key.chunk).copied() else {
            return Ok(vec![0; len]);
        };
        let filters = layout.filters;

        let file_len = self.end;
        let bytes = read_region(&mut self.file, file_len, location.offset, location.len)?;
        let actual = compute_checksum(&bytes);
        if actual != location.checksum {
            return Err(FormatError::ChecksumMismatch {
                what: "chunk",
                expected: location.checksum,
                actual,
            }
            .into());
        }
        debug!(layer = %name, chunk = key.chunk, bytes = bytes.len(), "read chunk");
        filters.decode(&bytes, len)
    }

    fn write_chunk(&mut self, key: ChunkKey, values: &[u32]) -> Result<()> {
        let name = self.slots[key.dataset].name.clone();
        let layout = chunk_layout(self.catalog.dataset(GROUP_DATA, &name)?, &name)?;

        // Never-written chunks read as zero already.
        if !layout.chunks.contains_key(&key.chunk) && values.iter().all(|&v| v == 0) {
            return Ok(());
        }

        let bytes = layout.filters.encode(values)?;
        let checksum = compute_checksum(&bytes);
        let offset = self.append(&bytes)?;

        let dataset = self.catalog.dataset_mut(GROUP_DATA, &name)?;
        if let Some(layout) = dataset.layout_mut() {
            layout.chunks.insert(
                key.chunk,
                ChunkLocation {
                    offset,
                    len: bytes.len() as u64,
                    checksum,
                },
            );
        }
        self.catalog_dirty = true;
        self.cache.record_write_back();
        debug!(layer = %name, chunk = key.chunk, bytes = bytes.len(), "wrote chunk");
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.end;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.end += bytes.len() as u64;
        Ok(offset)
    }
}

fn chunk_layout<'a>(dataset: &'a Dataset, name: &str) -> Result<&'a ChunkLayout, FormatError> {
    dataset
        .layout()
        .ok_or_else(|| FormatError::Corrupt(format!("layer `{name}` is not chunked")))
}

fn read_region(file: &mut File, file_len: u64, offset: u64, len: u64) -> Result<Vec<u8>> {
    if offset.checked_add(len).map_or(true, |end| end > file_len) {
        return Err(FormatError::Truncated {
            offset,
            needed: len,
            len: file_len,
        }
        .into());
    }
    let mut buf = vec![0u8; len as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Flip the first stored byte of one chunk of a layer.
#[cfg(test)]
pub(crate) fn corrupt_chunk(path: &Path, layer: &str, chunk: u64) {
    let store = ChunkStore::open(path, false, 1).unwrap();
    let layout = store.catalog().dataset(GROUP_DATA, layer).unwrap().layout().unwrap();
    let offset = layout.chunks[&chunk].offset as usize;
    drop(store);

    let mut bytes = std::fs::read(path).unwrap();
    bytes[offset] ^= 0xFF;
    std::fs::write(path, bytes).unwrap();
}
