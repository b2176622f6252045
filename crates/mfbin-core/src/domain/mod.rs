pub mod errors;

pub use errors::{DecodeError, DecodeResult, ErrorCategory, ExitPlaceholder};

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Model discretization shared by every decoder of one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    pub layers: u32,
    pub rows: u32,
    pub cols: u32,
    pub periods: u32,
    pub cell_size_x: f64,
    pub cell_size_y: f64,
}

impl GridGeometry {
    pub fn new(layers: u32, rows: u32, cols: u32, periods: u32) -> DecodeResult<Self> {
        Self::with_cell_size(layers, rows, cols, periods, 1.0, 1.0)
    }

    pub fn with_cell_size(
        layers: u32,
        rows: u32,
        cols: u32,
        periods: u32,
        cell_size_x: f64,
        cell_size_y: f64,
    ) -> DecodeResult<Self> {
        if layers == 0 {
            return Err(DecodeError::InvalidGeometry {
                message: "layer count must be at least 1".to_string(),
            });
        }
        if rows == 0 || cols == 0 {
            return Err(DecodeError::InvalidGeometry {
                message: format!("grid must have cells, got {rows} rows x {cols} cols"),
            });
        }
        if !(cell_size_x.is_finite() && cell_size_x > 0.0)
            || !(cell_size_y.is_finite() && cell_size_y > 0.0)
        {
            return Err(DecodeError::InvalidGeometry {
                message: format!("cell sizes must be positive, got {cell_size_x} x {cell_size_y}"),
            });
        }

        Ok(Self {
            layers,
            rows,
            cols,
            periods,
            cell_size_x,
            cell_size_y,
        })
    }

    pub const fn cells_per_layer(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub const fn cells_per_volume(&self) -> usize {
        self.cells_per_layer() * self.layers as usize
    }

    /// Default layer selection: every layer of the model.
    pub fn all_layers(&self) -> std::collections::BTreeSet<i32> {
        (1..=self.layers as i32).collect()
    }

    /// Default period selection: every stress period of the model.
    pub fn all_periods(&self) -> std::collections::BTreeSet<i32> {
        (1..=self.periods as i32).collect()
    }
}

/// Dense row-major grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid2D<T> {
    rows: usize,
    cols: usize,
    values: Vec<T>,
}

impl<T: Copy> Grid2D<T> {
    pub fn from_vec(rows: usize, cols: usize, values: Vec<T>) -> DecodeResult<Self> {
        if rows * cols != values.len() {
            return Err(DecodeError::InvalidArgument {
                message: format!(
                    "grid of {rows}x{cols} needs {} values, got {}",
                    rows * cols,
                    values.len()
                ),
            });
        }
        Ok(Self { rows, cols, values })
    }

    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            values: vec![value; rows * cols],
        }
    }

    pub const fn rows(&self) -> usize {
        self.rows
    }

    pub const fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.values.get(row * self.cols + col).copied()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }

    pub fn same_shape<U>(&self, other: &Grid2D<U>) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    pub(crate) fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }
}

impl Grid2D<f32> {
    pub fn summary(&self) -> GridSummary {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0_f64;
        for value in &self.values {
            min = min.min(*value);
            max = max.max(*value);
            sum += f64::from(*value);
        }
        let mean = if self.values.is_empty() {
            0.0
        } else {
            sum / self.values.len() as f64
        };
        GridSummary {
            cells: self.values.len(),
            min,
            max,
            mean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridSummary {
    pub cells: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f64,
}

/// One complete layer slice decoded from a snapshot or budget record.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSlice {
    pub term: String,
    pub stress_period: i32,
    pub time_step: i32,
    pub layer: i32,
    pub total_time: f64,
    pub values: Grid2D<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    pub magnitude: Grid2D<f32>,
    pub direction_degrees: Grid2D<f32>,
}

/// Why a decoding pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    EndOfStream,
    PastMaxPeriod,
    Cancelled,
}

/// Summary of one decoding pass, including the periods that could not be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    pub slices_emitted: usize,
    pub records_scanned: usize,
    pub seeks: usize,
    pub seek_fallbacks: usize,
    pub missing_periods: Vec<i32>,
}

impl ScanReport {
    pub(crate) fn new() -> Self {
        Self {
            outcome: ScanOutcome::EndOfStream,
            slices_emitted: 0,
            records_scanned: 0,
            seeks: 0,
            seek_fallbacks: 0,
            missing_periods: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome != ScanOutcome::Cancelled && self.missing_periods.is_empty()
    }
}

/// Advisory stop flag polled by the decoders between records.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::{CancellationToken, DecodeError, Grid2D, GridGeometry};

    #[test]
    fn geometry_rejects_empty_grids() {
        assert!(matches!(
            GridGeometry::new(0, 2, 2, 1),
            Err(DecodeError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            GridGeometry::new(1, 0, 2, 1),
            Err(DecodeError::InvalidGeometry { .. })
        ));
        assert!(GridGeometry::with_cell_size(1, 2, 2, 1, -5.0, 5.0).is_err());

        let geometry = GridGeometry::new(3, 4, 5, 12).expect("geometry should build");
        assert_eq!(geometry.cells_per_layer(), 20);
        assert_eq!(geometry.cells_per_volume(), 60);
        assert_eq!(geometry.all_layers().len(), 3);
        assert_eq!(geometry.all_periods().last(), Some(&12));
    }

    #[test]
    fn grid_is_row_major() {
        let grid = Grid2D::from_vec(2, 3, vec![1, 2, 3, 4, 5, 6]).expect("grid should build");
        assert_eq!(grid.get(0, 2), Some(3));
        assert_eq!(grid.get(1, 0), Some(4));
        assert_eq!(grid.get(2, 0), None);
        assert!(Grid2D::from_vec(2, 2, vec![1, 2, 3]).is_err());
    }

    #[test]
    fn summary_reports_extremes_and_mean() {
        let grid = Grid2D::from_vec(1, 4, vec![1.0_f32, -3.0, 4.0, 2.0]).expect("grid");
        let summary = grid.summary();
        assert_eq!(summary.cells, 4);
        assert_eq!(summary.min, -3.0);
        assert_eq!(summary.max, 4.0);
        assert!((summary.mean - 1.0).abs() < 1.0e-12);
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
