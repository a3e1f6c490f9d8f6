//! Summary statistics of a feature's histogram.
//!
//! Values are bin labels weighted by their counts, so a layer with bins
//! `[0, 10, 20]` and counts `[1, 0, 3]` has mean `15`.

use crate::cube::HistoCube;
use crate::error::{CubeError, Result};

/// One statistic of a histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    Total,
    Min,
    Max,
    Mean,
    StdDev,
    Median,
    Mode,
    Range,
}

impl StatKind {
    pub const ALL: [StatKind; 8] = [
        StatKind::Total,
        StatKind::Min,
        StatKind::Max,
        StatKind::Mean,
        StatKind::StdDev,
        StatKind::Median,
        StatKind::Mode,
        StatKind::Range,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StatKind::Total => "total",
            StatKind::Min => "min",
            StatKind::Max => "max",
            StatKind::Mean => "mean",
            StatKind::StdDev => "std_dev",
            StatKind::Median => "median",
            StatKind::Mode => "mode",
            StatKind::Range => "range",
        }
    }
}

/// Statistics of a non-empty histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramStats {
    pub total: u64,
    pub min: i32,
    pub max: i32,
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub median: i32,
    /// Label with the greatest count; the first in bin order on ties.
    pub mode: i32,
}

impl HistogramStats {
    /// Returns `None` when every count is zero.
    ///
    /// `counts` and `bins` must have the same length.
    pub fn from_counts(counts: &[u32], bins: &[i32]) -> Option<Self> {
        debug_assert_eq!(counts.len(), bins.len());
        let occupied = || {
            bins.iter()
                .zip(counts)
                .filter(|&(_, &c)| c > 0)
                .map(|(&b, &c)| (b, c))
        };

        let total: u64 = counts.iter().map(|&c| u64::from(c)).sum();
        if total == 0 {
            return None;
        }

        let mut min = i32::MAX;
        let mut max = i32::MIN;
        let mut sum = 0.0f64;
        let mut mode = (0, 0u32);
        for (label, count) in occupied() {
            min = min.min(label);
            max = max.max(label);
            sum += f64::from(label) * f64::from(count);
            if count > mode.1 {
                mode = (label, count);
            }
        }
        let n = total as f64;
        let mean = sum / n;
        let variance = occupied()
            .map(|(label, count)| {
                let d = f64::from(label) - mean;
                d * d * f64::from(count)
            })
            .sum::<f64>()
            / n;

        // Median walks labels in ascending order, whatever the bin order.
        let mut sorted: Vec<(i32, u32)> = occupied().collect();
        sorted.sort_unstable_by_key(|&(label, _)| label);
        let mut cumulative = 0u64;
        let mut median = max;
        for (label, count) in sorted {
            cumulative += u64::from(count);
            if cumulative * 2 >= total {
                median = label;
                break;
            }
        }

        Some(Self {
            total,
            min,
            max,
            mean,
            std_dev: variance.sqrt(),
            median,
            mode: mode.0,
        })
    }

    pub fn range(&self) -> i64 {
        i64::from(self.max) - i64::from(self.min)
    }

    pub fn get(&self, kind: StatKind) -> f64 {
        match kind {
            StatKind::Total => self.total as f64,
            StatKind::Min => f64::from(self.min),
            StatKind::Max => f64::from(self.max),
            StatKind::Mean => self.mean,
            StatKind::StdDev => self.std_dev,
            StatKind::Median => f64::from(self.median),
            StatKind::Mode => f64::from(self.mode),
            StatKind::Range => self.range() as f64,
        }
    }
}

/// Writes chosen statistics of a layer's rows as per-pixel values.
///
/// Works like [`Materializer`](crate::Materializer): out-of-range ids leave
/// the output untouched, and the last row read is kept. A feature with an
/// empty histogram makes [`export`](Self::export) return `false`.
#[derive(Debug)]
pub struct StatsExporter<'c> {
    cube: &'c mut HistoCube,
    layer: String,
    kinds: Vec<StatKind>,
    bins: Vec<i32>,
    num_features: u64,
    row: Vec<u32>,
    current: Option<(u64, Option<HistogramStats>)>,
}

impl<'c> StatsExporter<'c> {
    pub fn new(cube: &'c mut HistoCube, layer: &str, kinds: Vec<StatKind>) -> Result<Self> {
        let (_, meta) = cube.layer_slot(layer)?;
        let bins = meta.bins.clone();
        let num_features = cube.feature_count();

        Ok(Self {
            cube,
            layer: layer.to_string(),
            kinds,
            row: vec![0; bins.len()],
            bins,
            num_features,
            current: None,
        })
    }

    pub fn kinds(&self) -> &[StatKind] {
        &self.kinds
    }

    /// Statistics of the 0-based `feature_id`.
    ///
    /// `Ok(None)` for out-of-range ids and empty histograms.
    pub fn stats(&mut self, feature_id: i64) -> Result<Option<HistogramStats>> {
        let row = match u64::try_from(feature_id) {
            Ok(row) if row < self.num_features => row,
            _ => return Ok(None),
        };
        match self.current {
            Some((cached, stats)) if cached == row => Ok(stats),
            _ => {
                self.current = None;
                self.cube.read_row_into(&self.layer, row, &mut self.row)?;
                let stats = HistogramStats::from_counts(&self.row, &self.bins);
                self.current = Some((row, stats));
                Ok(stats)
            }
        }
    }

    /// Fill `out` with the selected statistics of `feature_id`.
    ///
    /// Returns `false`, leaving `out` untouched, when the id is out of range
    /// or its histogram is empty.
    pub fn export(&mut self, feature_id: i64, out: &mut [f32]) -> Result<bool> {
        if out.len() != self.kinds.len() {
            return Err(CubeError::BufferLength {
                expected: self.kinds.len(),
                actual: out.len(),
            });
        }
        let Some(stats) = self.stats(feature_id)? else {
            return Ok(false);
        };
        for (o, &kind) in out.iter_mut().zip(&self.kinds) {
            *o = stats.get(kind) as f32;
        }
        Ok(true)
    }
}
