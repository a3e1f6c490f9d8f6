//! Reading selected histogram bins back out per pixel.

use crate::cube::HistoCube;
use crate::error::{CubeError, Result};

/// Copies chosen bin counts of a layer into per-pixel output values.
///
/// The most recently read row is kept, so a run of pixels belonging to the
/// same feature costs a single row read.
#[derive(Debug)]
pub struct Materializer<'c> {
    cube: &'c mut HistoCube,
    layer: String,
    positions: Vec<usize>,
    num_features: u64,
    row: Vec<u32>,
    current: Option<u64>,
}

impl<'c> Materializer<'c> {
    /// Export the bins at `positions` (column indices), in that order.
    pub fn new(cube: &'c mut HistoCube, layer: &str, positions: Vec<usize>) -> Result<Self> {
        let (_, meta) = cube.layer_slot(layer)?;
        let num_bins = meta.num_bins();
        if let Some(&position) = positions.iter().find(|&&p| p >= num_bins) {
            return Err(CubeError::BinPosition {
                layer: layer.to_string(),
                position,
                num_bins,
            });
        }
        let num_features = cube.feature_count();

        Ok(Self {
            cube,
            layer: layer.to_string(),
            positions,
            num_features,
            row: vec![0; num_bins],
            current: None,
        })
    }

    /// Export the bins carrying `labels`, in that order.
    pub fn for_labels(cube: &'c mut HistoCube, layer: &str, labels: &[i32]) -> Result<Self> {
        let (_, meta) = cube.layer_slot(layer)?;
        let positions = labels
            .iter()
            .map(|&label| {
                meta.bin_position(label).ok_or_else(|| CubeError::UnknownBin {
                    layer: layer.to_string(),
                    label,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(cube, layer, positions)
    }

    /// Export every bin of the layer.
    pub fn all_bins(cube: &'c mut HistoCube, layer: &str) -> Result<Self> {
        let (_, meta) = cube.layer_slot(layer)?;
        let positions = (0..meta.num_bins()).collect();
        Self::new(cube, layer, positions)
    }

    /// Number of values written per pixel.
    pub fn num_outputs(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Fill `out` with the selected counts of the 0-based `feature_id`.
    ///
    /// Returns `false`, leaving `out` untouched, when the id is out of range.
    pub fn materialize(&mut self, feature_id: i64, out: &mut [f32]) -> Result<bool> {
        if out.len() != self.positions.len() {
            return Err(CubeError::BufferLength {
                expected: self.positions.len(),
                actual: out.len(),
            });
        }
        let row = match u64::try_from(feature_id) {
            Ok(row) if row < self.num_features => row,
            _ => return Ok(false),
        };
        if self.current != Some(row) {
            self.current = None;
            self.cube.read_row_into(&self.layer, row, &mut self.row)?;
            self.current = Some(row);
        }
        for (o, &p) in out.iter_mut().zip(&self.positions) {
            *o = self.row[p] as f32;
        }
        Ok(true)
    }

    /// Same as [`materialize`](Self::materialize) for a 1-based pixel label.
    pub fn materialize_label(&mut self, label: i64, out: &mut [f32]) -> Result<bool> {
        self.materialize(label.saturating_sub(1), out)
    }
}
