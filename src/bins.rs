//! Bin labels, quantization and bin lookup.
//!
//! A layer declares an ordered list of integer bin labels. A raw measurement
//! is mapped onto a label by the layer's [`Quantizer`], and the label onto a
//! column of the histogram row by [`lookup`]. Either step may come up empty;
//! callers treat that as "skip this observation".

/// Position of `value` in `bins`, scanning from the front.
///
/// Returns the first exact match, or `None` when no bin carries the label.
/// Absence is an ordinary outcome, not an error.
///
/// # Example
///
/// ```
/// use histocube::bins::lookup;
///
/// let bins = [10, 20, 30];
/// assert_eq!(lookup(20, &bins), Some(1));
/// assert_eq!(lookup(99, &bins), None);
/// ```
#[inline]
pub fn lookup(value: i32, bins: &[i32]) -> Option<usize> {
    bins.iter().position(|&b| b == value)
}

/// Generate `count` bin labels starting at `start`, `stride` apart.
///
/// Labels that would overflow `i32` end the sequence early.
pub fn bin_range(start: i32, stride: i32, count: usize) -> Vec<i32> {
    let mut bins = Vec::with_capacity(count);
    let mut next = Some(start);
    while bins.len() < count {
        let Some(label) = next else { break };
        bins.push(label);
        next = label.checked_add(stride);
    }
    bins
}

/// Maps raw measurements onto bin labels.
///
/// The label is `ceil(raw * scale + offset + 0.5)`, evaluated in `f64` with
/// the single-precision `scale` and `offset` widened. Note this is not the
/// usual round-half-up `floor(x + 0.5)`: a value sitting exactly on `n - 0.5`
/// lands in bin `n`, while anything above it lands in `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    pub scale: f32,
    pub offset: f32,
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quantizer {
    /// Scale 1, offset 0.
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        offset: 0.0,
    };

    pub fn new(scale: f32, offset: f32) -> Self {
        Self { scale, offset }
    }

    /// Bin label for a raw measurement.
    ///
    /// `None` when the result is not finite or does not fit an `i32`.
    #[inline]
    pub fn label(&self, raw: f64) -> Option<i32> {
        let x = (raw * f64::from(self.scale) + f64::from(self.offset) + 0.5).ceil();
        if x.is_finite() && x >= f64::from(i32::MIN) && x <= f64::from(i32::MAX) {
            Some(x as i32)
        } else {
            None
        }
    }

    /// Column for a raw measurement in a layer with the given bins.
    #[inline]
    pub fn bin_position(&self, raw: f64, bins: &[i32]) -> Option<usize> {
        self.label(raw).and_then(|label| lookup(label, bins))
    }
}
