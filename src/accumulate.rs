//! Populating layers from (feature id, measurement) observations.
//!
//! Counts are aggregated in memory per feature row by a [`HistogramTally`]
//! and written to the cube once per row when the [`Accumulator`] flushes:
//! the stored row is read, the buffered counts are added and the row is
//! written back. A scan therefore touches every row at most once per flush,
//! and no two writers ever race on the same stored row.
//!
//! For parallel scans, build one tally per worker, merge them and hand the
//! result to [`Accumulator::absorb`].
//!
//! # Example
//!
//! ```no_run
//! use histocube::{Accumulator, HistoCube, LayerSpec};
//!
//! # fn main() -> histocube::Result<()> {
//! let mut cube = HistoCube::create("c.hcube", 100)?;
//! cube.create_layer(LayerSpec::builder().name("h").bins(vec![0, 1, 2]).build()?)?;
//!
//! let mut acc = Accumulator::new(&mut cube, "h")?;
//! for _ in 0..5 {
//!     acc.observe(3, 0.2)?; // quantizes to label 1
//! }
//! acc.finish()?;
//! assert_eq!(cube.get_row("h", 3)?, vec![0, 5, 0]);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::ops::AddAssign;

use tracing::{debug, warn};

use crate::bins::{lookup, Quantizer};
use crate::cube::{HistoCube, OpenMode};
use crate::error::{CubeError, Result};
use crate::layer::LayerMeta;

/// What happened to the observations fed to a tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatorStats {
    pub observed: u64,
    /// Observations that incremented a bin.
    pub counted: u64,
    /// Feature id outside `[0, num_features)`.
    pub out_of_range: u64,
    /// Measurement that quantized to no declared bin.
    pub unmatched: u64,
}

impl AddAssign for AccumulatorStats {
    fn add_assign(&mut self, rhs: Self) {
        self.observed += rhs.observed;
        self.counted += rhs.counted;
        self.out_of_range += rhs.out_of_range;
        self.unmatched += rhs.unmatched;
    }
}

/// In-memory bin counts grouped by feature row.
///
/// A tally knows the layer's bins and quantizer but not the cube, so it can
/// be built on any thread and merged later.
#[derive(Debug, Clone)]
pub struct HistogramTally {
    bins: Vec<i32>,
    quantizer: Quantizer,
    num_features: u64,
    rows: BTreeMap<u64, Vec<u32>>,
    stats: AccumulatorStats,
}

impl HistogramTally {
    pub fn new(bins: Vec<i32>, quantizer: Quantizer, num_features: u64) -> Self {
        Self {
            bins,
            quantizer,
            num_features,
            rows: BTreeMap::new(),
            stats: AccumulatorStats::default(),
        }
    }

    /// An empty tally matching a cube layer.
    pub fn for_layer(meta: &LayerMeta, num_features: u64) -> Self {
        Self::new(meta.bins.clone(), meta.quantizer(), num_features)
    }

    /// Count one observation for the 0-based `feature_id`.
    ///
    /// Returns `false` when the observation was skipped: the id is out of
    /// range or the measurement falls in no declared bin.
    #[inline]
    pub fn observe(&mut self, feature_id: i64, raw: f64) -> bool {
        self.stats.observed += 1;

        let row = match u64::try_from(feature_id) {
            Ok(row) if row < self.num_features => row,
            _ => {
                self.stats.out_of_range += 1;
                return false;
            }
        };
        let Some(idx) = self
            .quantizer
            .label(raw)
            .and_then(|label| lookup(label, &self.bins))
        else {
            self.stats.unmatched += 1;
            return false;
        };

        let num_bins = self.bins.len();
        let count = &mut self.rows.entry(row).or_insert_with(|| vec![0; num_bins])[idx];
        *count = count.saturating_add(1);
        self.stats.counted += 1;
        true
    }

    /// Count one observation for a 1-based pixel label (`feature_id = label - 1`).
    #[inline]
    pub fn observe_label(&mut self, label: i64, raw: f64) -> bool {
        self.observe(label.saturating_sub(1), raw)
    }

    /// Fold another tally for the same layer into this one.
    pub fn merge(&mut self, other: HistogramTally) {
        debug_assert!(self.is_compatible(&other));
        for (row, counts) in other.rows {
            match self.rows.get_mut(&row) {
                Some(mine) => add_counts(mine, &counts),
                None => {
                    self.rows.insert(row, counts);
                }
            }
        }
        self.stats += other.stats;
    }

    /// Same bins, quantizer and feature count.
    pub fn is_compatible(&self, other: &HistogramTally) -> bool {
        self.bins == other.bins
            && self.quantizer == other.quantizer
            && self.num_features == other.num_features
    }

    /// Buffered counts of a row, if any were observed.
    pub fn row(&self, feature_id: u64) -> Option<&[u32]> {
        self.rows.get(&feature_id).map(Vec::as_slice)
    }

    /// Number of rows holding buffered counts.
    pub fn buffered_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn stats(&self) -> AccumulatorStats {
        self.stats
    }

    pub fn bins(&self) -> &[i32] {
        &self.bins
    }

}

fn add_counts(into: &mut [u32], from: &[u32]) {
    for (a, b) in into.iter_mut().zip(from) {
        *a = a.saturating_add(*b);
    }
}

/// Adds observations to one layer of a read-write cube.
///
/// Observations are buffered in a [`HistogramTally`]; once it holds
/// `flush_rows` rows (see [`CubeConfig`](crate::CubeConfig)) it is added to
/// the stored counts. Call [`finish`](Self::finish) at the end of the scan;
/// dropping an unfinished accumulator flushes and only logs failures.
#[derive(Debug)]
pub struct Accumulator<'c> {
    cube: &'c mut HistoCube,
    layer: String,
    tally: HistogramTally,
    flush_rows: usize,
    scratch: Vec<u32>,
    finished: bool,
}

impl<'c> Accumulator<'c> {
    pub fn new(cube: &'c mut HistoCube, layer: &str) -> Result<Self> {
        if cube.mode() == OpenMode::ReadOnly {
            return Err(CubeError::ReadOnly);
        }
        let (_, meta) = cube.layer_slot(layer)?;
        let tally = HistogramTally::for_layer(meta, cube.feature_count());
        let scratch = vec![0; meta.num_bins()];
        let flush_rows = cube.config().flush_rows;

        Ok(Self {
            cube,
            layer: layer.to_string(),
            tally,
            flush_rows,
            scratch,
            finished: false,
        })
    }

    /// Override the number of buffered rows that triggers a flush.
    pub fn with_flush_rows(mut self, flush_rows: usize) -> Self {
        self.flush_rows = flush_rows.max(1);
        self
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// An empty tally for this layer, e.g. one per worker thread.
    pub fn new_tally(&self) -> HistogramTally {
        HistogramTally::new(
            self.tally.bins.clone(),
            self.tally.quantizer,
            self.tally.num_features,
        )
    }

    /// Observe a measurement for the 0-based `feature_id`.
    ///
    /// Out-of-range ids and unmatched measurements are skipped silently.
    pub fn observe(&mut self, feature_id: i64, raw: f64) -> Result<()> {
        if self.tally.observe(feature_id, raw) && self.tally.buffered_rows() >= self.flush_rows {
            self.flush()?;
        }
        Ok(())
    }

    /// Observe a measurement for a 1-based pixel label.
    pub fn observe_label(&mut self, label: i64, raw: f64) -> Result<()> {
        self.observe(label.saturating_sub(1), raw)
    }

    /// Merge a tally built elsewhere for this layer.
    pub fn absorb(&mut self, tally: HistogramTally) -> Result<()> {
        if !self.tally.is_compatible(&tally) {
            return Err(CubeError::InvalidLayer {
                name: self.layer.clone(),
                reason: "tally was built for different bins or feature count".into(),
            });
        }
        self.tally.merge(tally);
        if self.tally.buffered_rows() >= self.flush_rows {
            self.flush()?;
        }
        Ok(())
    }

    /// Add buffered counts to the stored rows and clear the buffer.
    ///
    /// A row leaves the buffer only once it is written, so after an error
    /// the unwritten rows are still pending and a retry picks them up.
    pub fn flush(&mut self) -> Result<()> {
        let n = self.tally.rows.len();
        if n == 0 {
            return Ok(());
        }
        while let Some((&row, counts)) = self.tally.rows.first_key_value() {
            self.cube.read_row_into(&self.layer, row, &mut self.scratch)?;
            add_counts(&mut self.scratch, counts);
            self.cube.set_row(&self.layer, row, &self.scratch)?;
            self.tally.rows.pop_first();
        }
        debug!(layer = %self.layer, rows = n, "flushed accumulated counts");
        Ok(())
    }

    /// Flush and report what was observed.
    pub fn finish(mut self) -> Result<AccumulatorStats> {
        self.finished = true;
        self.flush()?;
        Ok(self.tally.stats())
    }

    pub fn stats(&self) -> AccumulatorStats {
        self.tally.stats()
    }
}

impl Drop for Accumulator<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.tally.is_empty() {
            if let Err(e) = self.flush() {
                warn!(layer = %self.layer, error = %e, "dropped accumulator failed to flush");
            }
        }
    }
}
