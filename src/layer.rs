//! Layer metadata and layer creation requests.

use bon::Builder;
use chrono::NaiveDateTime;

use crate::bins::{lookup, Quantizer};
use crate::error::{CubeError, FormatError, Result};
use crate::format::{
    AttrReader, AttrValue, Attributes, Dataset, ATTR_BINS, ATTR_DATE_TIME, ATTR_HAS_DATE_TIME,
    ATTR_NUMBINS, ATTR_OFFSET, ATTR_ORDER, ATTR_SCALE, DATE_TIME_FORMAT, NOT_A_DATE_TIME,
};

/// Description of one histogram layer, as stored in its dataset attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMeta {
    pub name: String,
    /// 1-based insertion sequence number.
    pub order: u32,
    pub scale: f32,
    pub offset: f32,
    /// Bin labels, one per histogram column.
    pub bins: Vec<i32>,
    pub timestamp: Option<NaiveDateTime>,
    pub(crate) chunk_rows: u32,
}

impl LayerMeta {
    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp.is_some()
    }

    pub fn quantizer(&self) -> Quantizer {
        Quantizer::new(self.scale, self.offset)
    }

    /// Rows per stored chunk.
    pub fn chunk_rows(&self) -> u32 {
        self.chunk_rows
    }

    /// Column of a bin label in this layer.
    pub fn bin_position(&self, label: i32) -> Option<usize> {
        lookup(label, &self.bins)
    }

    pub(crate) fn to_attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(ATTR_ORDER.into(), AttrValue::U32(self.order));
        attrs.insert(ATTR_SCALE.into(), AttrValue::F32(self.scale));
        attrs.insert(ATTR_OFFSET.into(), AttrValue::F32(self.offset));
        attrs.insert(ATTR_NUMBINS.into(), AttrValue::U32(self.bins.len() as u32));
        attrs.insert(ATTR_BINS.into(), AttrValue::I32Array(self.bins.clone()));
        attrs.insert(
            ATTR_HAS_DATE_TIME.into(),
            AttrValue::U8(u8::from(self.timestamp.is_some())),
        );
        let date_time = match &self.timestamp {
            Some(ts) => ts.format(DATE_TIME_FORMAT).to_string(),
            None => NOT_A_DATE_TIME.to_string(),
        };
        attrs.insert(ATTR_DATE_TIME.into(), AttrValue::Str(date_time));
        attrs
    }

    /// Rebuild metadata from a `/DATA/<name>` dataset, checking it against
    /// the container's feature count.
    pub(crate) fn from_dataset(
        name: &str,
        dataset: &Dataset,
        num_features: u64,
    ) -> Result<Self, FormatError> {
        let object = format!("/DATA/{name}");
        let attrs = AttrReader::new(&object, &dataset.attributes);
        let invalid = |attr: &str, reason: String| FormatError::InvalidAttribute {
            object: object.clone(),
            name: attr.to_string(),
            reason,
        };

        let order = attrs.u32(ATTR_ORDER)?;
        let scale = attrs.f32(ATTR_SCALE)?;
        let offset = attrs.f32(ATTR_OFFSET)?;
        let num_bins = attrs.u32(ATTR_NUMBINS)? as usize;
        let bins = attrs.i32_array(ATTR_BINS)?.to_vec();
        if bins.len() != num_bins {
            return Err(invalid(
                ATTR_BINS,
                format!("{} labels but NUMBINS = {num_bins}", bins.len()),
            ));
        }

        let timestamp = match attrs.u8(ATTR_HAS_DATE_TIME)? {
            0 => None,
            1 => {
                let text = attrs.str(ATTR_DATE_TIME)?;
                let ts = NaiveDateTime::parse_from_str(text, DATE_TIME_FORMAT)
                    .map_err(|e| invalid(ATTR_DATE_TIME, format!("`{text}`: {e}")))?;
                Some(ts)
            }
            other => return Err(invalid(ATTR_HAS_DATE_TIME, format!("flag {other}"))),
        };

        if dataset.shape.as_slice() != [num_features, num_bins as u64] {
            return Err(FormatError::Corrupt(format!(
                "{object} has shape {:?}, expected [{num_features}, {num_bins}]",
                dataset.shape
            )));
        }
        let chunk_rows = dataset
            .layout()
            .map(|l| l.chunk_rows)
            .ok_or_else(|| FormatError::Corrupt(format!("{object} is not chunked")))?;

        Ok(Self {
            name: name.to_string(),
            order,
            scale,
            offset,
            bins,
            timestamp,
            chunk_rows,
        })
    }
}

/// Request to add a layer to a cube.
///
/// Chunking and compression default to the cube's [`CubeConfig`] when left
/// unset.
///
/// # Example
///
/// ```
/// use histocube::LayerSpec;
/// use histocube::bins::bin_range;
///
/// let spec = LayerSpec::builder()
///     .name("ndvi")
///     .bins(bin_range(-100, 1, 201))
///     .scale(100.0)
///     .build()
///     .unwrap();
/// assert_eq!(spec.bins.len(), 201);
/// ```
///
/// [`CubeConfig`]: crate::CubeConfig
#[derive(Debug, Clone, Builder)]
#[builder(derive(Clone, Debug), finish_fn(vis = "", name = __build_internal))]
pub struct LayerSpec {
    #[builder(into)]
    pub name: String,

    pub bins: Vec<i32>,

    /// Measurement scale. Default: 1.
    #[builder(default = 1.0)]
    pub scale: f32,

    /// Measurement offset. Default: 0.
    #[builder(default = 0.0)]
    pub offset: f32,

    /// Whether the layer carries a timestamp. Default: false.
    #[builder(default)]
    pub has_timestamp: bool,

    pub timestamp: Option<NaiveDateTime>,

    /// Rows per chunk; `None` uses the cube default.
    pub chunk_rows: Option<u32>,

    /// Codec level; `None` uses the cube default.
    pub compression_level: Option<u32>,
}

impl<S: layer_spec_builder::IsComplete> LayerSpecBuilder<S> {
    /// Build and validate the request.
    pub fn build(self) -> Result<LayerSpec> {
        let spec = self.__build_internal();
        spec.validate()?;
        Ok(spec)
    }
}

impl LayerSpec {
    /// Layer whose bins are `start, start + stride, ...` (`count` of them).
    pub fn with_bin_range(
        name: impl Into<String>,
        start: i32,
        stride: i32,
        count: usize,
    ) -> Result<Self> {
        Self::builder()
            .name(name)
            .bins(crate::bins::bin_range(start, stride, count))
            .build()
    }

    /// Checks that do not depend on the target cube.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| CubeError::InvalidLayer {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.is_empty() || self.name.contains('/') {
            return Err(invalid("name must be non-empty and contain no '/'"));
        }
        if self.bins.is_empty() {
            return Err(invalid("at least one bin is required"));
        }
        if u32::try_from(self.bins.len()).is_err() {
            return Err(invalid("too many bins"));
        }
        if self.chunk_rows == Some(0) {
            return Err(invalid("chunk_rows must be at least 1"));
        }
        if !self.scale.is_finite() || !self.offset.is_finite() {
            return Err(invalid("scale and offset must be finite"));
        }
        if self.has_timestamp && self.timestamp.is_none() {
            return Err(CubeError::MissingTimestamp(self.name.clone()));
        }
        Ok(())
    }

    /// Timestamp to persist: only kept when the flag is set.
    pub(crate) fn effective_timestamp(&self) -> Option<NaiveDateTime> {
        if self.has_timestamp {
            self.timestamp
        } else {
            None
        }
    }
}
