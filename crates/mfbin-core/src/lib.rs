//! Decoding of MODFLOW binary output: head and concentration snapshots,
//! cell-by-cell budgets, and flow vectors derived from face flows.

pub mod budget;
pub mod codec;
pub mod domain;
pub mod model;
pub mod output_control;
pub mod range;
pub mod seek;
pub mod snapshot;
pub mod vector;

pub use domain::{
    CancellationToken, DecodeError, DecodeResult, DecodedSlice, Grid2D, GridGeometry, ScanOutcome,
    ScanReport, VectorField,
};
