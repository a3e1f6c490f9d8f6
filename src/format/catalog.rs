//! Catalog: the self-describing tree of groups, datasets and attributes.
//!
//! The catalog is the only structured part of the file. It is rewritten as a
//! whole on every flush and encoded with postcard. `BTreeMap`s keep the
//! encoding deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::filters::FilterPipeline;
use crate::error::{FormatError, Result};

/// Named attributes on the root, a group or a dataset.
pub type Attributes = BTreeMap<String, AttrValue>;

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    U8(u8),
    U32(u32),
    U64(u64),
    F32(f32),
    I32Array(Vec<i32>),
}

impl AttrValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Str(_) => "string",
            AttrValue::U8(_) => "u8",
            AttrValue::U32(_) => "u32",
            AttrValue::U64(_) => "u64",
            AttrValue::F32(_) => "f32",
            AttrValue::I32Array(_) => "i32[]",
        }
    }
}

/// Element type of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    U32,
    U64,
}

/// Where a chunk lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub offset: u64,
    pub len: u64,
    pub checksum: u32,
}

/// Row-chunked storage of a 2-D dataset.
///
/// Chunk `c` holds rows `c * chunk_rows .. min((c + 1) * chunk_rows, rows)`.
/// Chunks absent from `chunks` have never been written and read as zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkLayout {
    pub chunk_rows: u32,
    pub filters: FilterPipeline,
    pub chunks: BTreeMap<u64, ChunkLocation>,
}

/// Dataset payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Storage {
    /// Little-endian bytes of a single value, kept inline.
    Scalar(Vec<u8>),
    Chunked(ChunkLayout),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Empty for scalars, `[rows, cols]` for chunked layers.
    pub shape: Vec<u64>,
    pub dtype: DataType,
    pub attributes: Attributes,
    pub storage: Storage,
}

impl Dataset {
    /// A scalar `u64` dataset.
    pub fn scalar_u64(value: u64) -> Self {
        Self {
            shape: Vec::new(),
            dtype: DataType::U64,
            attributes: Attributes::new(),
            storage: Storage::Scalar(value.to_le_bytes().to_vec()),
        }
    }

    /// Read back a scalar `u64` dataset.
    pub fn read_scalar_u64(&self, name: &str) -> Result<u64, FormatError> {
        match (&self.storage, self.dtype, self.shape.is_empty()) {
            (Storage::Scalar(bytes), DataType::U64, true) if bytes.len() == 8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(bytes);
                Ok(u64::from_le_bytes(b))
            }
            _ => Err(FormatError::Corrupt(format!(
                "`{name}` is not a scalar u64 dataset"
            ))),
        }
    }

    /// An empty chunked `u32` dataset of `rows × cols`.
    pub fn chunked_u32(rows: u64, cols: u64, chunk_rows: u32, filters: FilterPipeline) -> Self {
        Self {
            shape: vec![rows, cols],
            dtype: DataType::U32,
            attributes: Attributes::new(),
            storage: Storage::Chunked(ChunkLayout {
                chunk_rows,
                filters,
                chunks: BTreeMap::new(),
            }),
        }
    }

    /// Chunk layout, if this is a chunked dataset.
    pub fn layout(&self) -> Option<&ChunkLayout> {
        match &self.storage {
            Storage::Chunked(layout) => Some(layout),
            Storage::Scalar(_) => None,
        }
    }

    pub fn layout_mut(&mut self) -> Option<&mut ChunkLayout> {
        match &mut self.storage {
            Storage::Chunked(layout) => Some(layout),
            Storage::Scalar(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub attributes: Attributes,
    pub datasets: BTreeMap<String, Dataset>,
}

/// Root of the catalog tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub attributes: Attributes,
    pub groups: BTreeMap<String, Group>,
}

impl Catalog {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }

    pub fn group(&self, name: &str) -> Result<&Group, FormatError> {
        self.groups
            .get(name)
            .ok_or_else(|| FormatError::MissingDataset(format!("/{name}")))
    }

    pub fn group_mut(&mut self, name: &str) -> Result<&mut Group, FormatError> {
        self.groups
            .get_mut(name)
            .ok_or_else(|| FormatError::MissingDataset(format!("/{name}")))
    }

    /// Dataset at `/group/name`.
    pub fn dataset(&self, group: &str, name: &str) -> Result<&Dataset, FormatError> {
        self.group(group)?
            .datasets
            .get(name)
            .ok_or_else(|| FormatError::MissingDataset(format!("/{group}/{name}")))
    }

    pub fn dataset_mut(&mut self, group: &str, name: &str) -> Result<&mut Dataset, FormatError> {
        self.group_mut(group)?
            .datasets
            .get_mut(name)
            .ok_or_else(|| FormatError::MissingDataset(format!("/{group}/{name}")))
    }
}

/// Typed, error-reporting access to an attribute set.
pub struct AttrReader<'a> {
    object: &'a str,
    attrs: &'a Attributes,
}

impl<'a> AttrReader<'a> {
    /// `object` names the owner in error messages, e.g. `/DATA/ndvi`.
    pub fn new(object: &'a str, attrs: &'a Attributes) -> Self {
        Self { object, attrs }
    }

    fn get(&self, name: &str) -> Result<&'a AttrValue, FormatError> {
        self.attrs
            .get(name)
            .ok_or_else(|| FormatError::MissingAttribute {
                object: self.object.to_string(),
                name: name.to_string(),
            })
    }

    fn mismatch(&self, name: &str, want: &str, got: &AttrValue) -> FormatError {
        FormatError::InvalidAttribute {
            object: self.object.to_string(),
            name: name.to_string(),
            reason: format!("expected {want}, found {}", got.type_name()),
        }
    }

    /// String attribute, or `None` when absent. Wrong type is still an error.
    pub fn opt_str(&self, name: &str) -> Result<Option<&'a str>, FormatError> {
        match self.attrs.get(name) {
            None => Ok(None),
            Some(AttrValue::Str(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(self.mismatch(name, "string", other)),
        }
    }

    pub fn str(&self, name: &str) -> Result<&'a str, FormatError> {
        match self.get(name)? {
            AttrValue::Str(s) => Ok(s.as_str()),
            other => Err(self.mismatch(name, "string", other)),
        }
    }

    pub fn u8(&self, name: &str) -> Result<u8, FormatError> {
        match self.get(name)? {
            AttrValue::U8(v) => Ok(*v),
            other => Err(self.mismatch(name, "u8", other)),
        }
    }

    /// Unsigned integer attribute; `u8` values are widened.
    pub fn u32(&self, name: &str) -> Result<u32, FormatError> {
        match self.get(name)? {
            AttrValue::U32(v) => Ok(*v),
            AttrValue::U8(v) => Ok(u32::from(*v)),
            other => Err(self.mismatch(name, "u32", other)),
        }
    }

    pub fn f32(&self, name: &str) -> Result<f32, FormatError> {
        match self.get(name)? {
            AttrValue::F32(v) => Ok(*v),
            other => Err(self.mismatch(name, "f32", other)),
        }
    }

    pub fn i32_array(&self, name: &str) -> Result<&'a [i32], FormatError> {
        match self.get(name)? {
            AttrValue::I32Array(v) => Ok(v.as_slice()),
            other => Err(self.mismatch(name, "i32[]", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Catalog {
        let mut catalog = Catalog::default();
        catalog
            .attributes
            .insert("FILETYPE".into(), AttrValue::Str("x".into()));
        let mut group = Group::default();
        group
            .datasets
            .insert("N".into(), Dataset::scalar_u64(42));
        catalog.groups.insert("META".into(), group);
        catalog
    }

    #[test]
    fn catalog_roundtrip() {
        let catalog = sample();
        let decoded = Catalog::decode(&catalog.encode().unwrap()).unwrap();
        assert_eq!(decoded, catalog);
    }

    #[test]
    fn scalar_dataset() {
        let catalog = sample();
        let ds = catalog.dataset("META", "N").unwrap();
        assert_eq!(ds.read_scalar_u64("N").unwrap(), 42);
    }

    #[test]
    fn missing_paths() {
        let catalog = sample();
        assert!(matches!(
            catalog.dataset("META", "M"),
            Err(FormatError::MissingDataset(p)) if p == "/META/M"
        ));
        assert!(matches!(
            catalog.group("DATA"),
            Err(FormatError::MissingDataset(_))
        ));
    }

    #[test]
    fn chunked_is_not_scalar() {
        let ds = Dataset::chunked_u32(10, 3, 5, FilterPipeline::default());
        assert!(ds.read_scalar_u64("L").is_err());
        assert_eq!(ds.layout().unwrap().chunk_rows, 5);
    }

    #[test]
    fn attr_reader_types() {
        let mut attrs = Attributes::new();
        attrs.insert("A".into(), AttrValue::U8(3));
        attrs.insert("B".into(), AttrValue::F32(1.5));
        let r = AttrReader::new("/x", &attrs);

        assert_eq!(r.u32("A").unwrap(), 3);
        assert_eq!(r.f32("B").unwrap(), 1.5);
        assert!(matches!(
            r.str("A"),
            Err(FormatError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            r.f32("C"),
            Err(FormatError::MissingAttribute { .. })
        ));
        assert_eq!(r.opt_str("C").unwrap(), None);
    }
}
