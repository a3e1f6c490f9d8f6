//! Block-level drivers between raster data and a cube.
//!
//! A raster scan engine hands over one tile at a time: a 2-D block of 1-based
//! feature labels (0 usually meaning "no feature") and the measurements that
//! line up with it. Populating visits every pixel pair; exporting turns each
//! label back into per-band values.

use ndarray::{Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::accumulate::{Accumulator, HistogramTally};
use crate::bins::Quantizer;
use crate::cube::HistoCube;
use crate::error::{CubeError, Result};
use crate::materialize::Materializer;
use crate::stats::{StatKind, StatsExporter};

/// Receives one (label, measurement) pair per pixel.
pub trait PixelVisitor {
    fn visit(&mut self, label: i64, value: f64) -> Result<()>;
}

impl PixelVisitor for Accumulator<'_> {
    #[inline]
    fn visit(&mut self, label: i64, value: f64) -> Result<()> {
        self.observe_label(label, value)
    }
}

impl PixelVisitor for HistogramTally {
    #[inline]
    fn visit(&mut self, label: i64, value: f64) -> Result<()> {
        self.observe_label(label, value);
        Ok(())
    }
}

/// Produces a fixed number of output values per pixel label.
pub trait PixelExporter {
    fn outputs(&self) -> usize;

    /// Fill `out` for a 1-based label; `false` means no value for this pixel.
    fn export(&mut self, label: i64, out: &mut [f32]) -> Result<bool>;
}

impl PixelExporter for Materializer<'_> {
    fn outputs(&self) -> usize {
        self.num_outputs()
    }

    fn export(&mut self, label: i64, out: &mut [f32]) -> Result<bool> {
        self.materialize_label(label, out)
    }
}

impl PixelExporter for StatsExporter<'_> {
    fn outputs(&self) -> usize {
        self.kinds().len()
    }

    fn export(&mut self, label: i64, out: &mut [f32]) -> Result<bool> {
        StatsExporter::export(self, label.saturating_sub(1), out)
    }
}

fn check_shape(labels: &[usize], values: &[usize]) -> Result<()> {
    if labels != values {
        return Err(CubeError::Shape(format!(
            "labels {labels:?} vs measurements {values:?}"
        )));
    }
    Ok(())
}

/// Visit every pixel of a label block with the measurement at the same place.
pub fn populate_block<V: PixelVisitor + ?Sized>(
    visitor: &mut V,
    labels: ArrayView2<'_, i64>,
    values: ArrayView2<'_, f64>,
) -> Result<()> {
    check_shape(labels.shape(), values.shape())?;
    for (&label, &value) in labels.iter().zip(values.iter()) {
        visitor.visit(label, value)?;
    }
    Ok(())
}

/// Like [`populate_block`], taking measurements from one band of a
/// `(band, row, col)` block.
pub fn populate_band<V: PixelVisitor + ?Sized>(
    visitor: &mut V,
    labels: ArrayView2<'_, i64>,
    bands: ArrayView3<'_, f64>,
    band: usize,
) -> Result<()> {
    let n_bands = bands.len_of(Axis(0));
    if band >= n_bands {
        return Err(CubeError::Shape(format!(
            "band {band} requested from a block of {n_bands} bands"
        )));
    }
    populate_block(visitor, labels, bands.index_axis(Axis(0), band))
}

/// Tally a block with one worker per group of rows and merge the results.
///
/// The outcome equals visiting the block sequentially.
pub fn tally_block_parallel(
    labels: ArrayView2<'_, i64>,
    values: ArrayView2<'_, f64>,
    bins: &[i32],
    quantizer: Quantizer,
    num_features: u64,
) -> Result<HistogramTally> {
    check_shape(labels.shape(), values.shape())?;
    let empty = || HistogramTally::new(bins.to_vec(), quantizer, num_features);

    let tally = (0..labels.nrows())
        .into_par_iter()
        .fold(empty, |mut tally, r| {
            for (&label, &value) in labels.row(r).iter().zip(values.row(r).iter()) {
                tally.observe_label(label, value);
            }
            tally
        })
        .reduce(empty, |mut a, b| {
            a.merge(b);
            a
        });
    Ok(tally)
}

/// Export every pixel of a label block into a `(band, row, col)` block.
///
/// Pixels the exporter has no value for are set to `no_data` in every band.
pub fn export_block<E: PixelExporter + ?Sized>(
    exporter: &mut E,
    labels: ArrayView2<'_, i64>,
    no_data: f32,
) -> Result<Array3<f32>> {
    let n = exporter.outputs();
    let (rows, cols) = labels.dim();
    let mut block = Array3::from_elem((n, rows, cols), no_data);
    let mut pixel = vec![0.0f32; n];

    for ((r, c), &label) in labels.indexed_iter() {
        if exporter.export(label, &mut pixel)? {
            for (b, &v) in pixel.iter().enumerate() {
                block[[b, r, c]] = v;
            }
        }
    }
    Ok(block)
}

/// Export statistics of `layer`, one band per entry of `kinds`.
///
/// Pixels of features with an empty histogram get `no_data`.
pub fn export_stats_block(
    cube: &mut HistoCube,
    layer: &str,
    kinds: &[StatKind],
    labels: ArrayView2<'_, i64>,
    no_data: f32,
) -> Result<Array3<f32>> {
    let mut exporter = StatsExporter::new(cube, layer, kinds.to_vec())?;
    export_block(&mut exporter, labels, no_data)
}
