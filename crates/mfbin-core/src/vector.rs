//! Flow vectors from the right-face and front-face budget terms.
//!
//! A negative right-face flow points east and a negative front-face flow points
//! south. Directions are `atan2(front, right)` in degrees, shifted into
//! `[0, 360)`, so 0 degrees is due west and 180 degrees due east.

use crate::budget::{FLOW_FRONT_FACE, FLOW_RIGHT_FACE};
use crate::domain::{DecodeError, DecodeResult, DecodedSlice, Grid2D, VectorField};
use std::collections::BTreeMap;
use tracing::debug;

pub fn compile_vector(right_face: &Grid2D<f32>, front_face: &Grid2D<f32>) -> DecodeResult<VectorField> {
    if !right_face.same_shape(front_face) {
        return Err(DecodeError::GridShapeMismatch {
            expected_rows: right_face.rows(),
            expected_cols: right_face.cols(),
            rows: front_face.rows(),
            cols: front_face.cols(),
        });
    }

    let (magnitude, direction): (Vec<f32>, Vec<f32>) = right_face
        .values()
        .iter()
        .zip(front_face.values())
        .map(|(right, front)| {
            let (right, front) = (f64::from(*right), f64::from(*front));
            (right.hypot(front) as f32, direction_degrees(right, front))
        })
        .unzip();

    Ok(VectorField {
        magnitude: Grid2D::from_vec(right_face.rows(), right_face.cols(), magnitude)?,
        direction_degrees: Grid2D::from_vec(right_face.rows(), right_face.cols(), direction)?,
    })
}

/// Direction in `[0, 360)`. Signed zero folds to `0` and a negative angle
/// too small to survive the shift wraps to `0` instead of `360`.
fn direction_degrees(right: f64, front: f64) -> f32 {
    let mut degrees = front.atan2(right).to_degrees();
    if degrees < 0.0 {
        degrees += 360.0;
    }
    let degrees = degrees as f32;
    if degrees >= 360.0 || degrees == 0.0 {
        0.0
    } else {
        degrees
    }
}

/// Sums `factor x factor` blocks. Partial blocks on the bottom and right edges
/// sum whatever cells they cover.
pub fn resample_sum(grid: &Grid2D<f32>, factor: usize) -> DecodeResult<Grid2D<f32>> {
    if factor == 0 {
        return Err(DecodeError::invalid_argument("resample factor must be at least 1"));
    }
    let rows = grid.rows().div_ceil(factor);
    let cols = grid.cols().div_ceil(factor);
    let mut sums = vec![0.0_f64; rows * cols];
    for (index, value) in grid.values().iter().enumerate() {
        let (row, col) = (index / grid.cols(), index % grid.cols());
        sums[(row / factor) * cols + col / factor] += f64::from(*value);
    }
    Grid2D::from_vec(rows, cols, sums.into_iter().map(|sum| sum as f32).collect())
}

/// Resamples both components before deriving magnitude and direction.
pub fn compile_vector_resampled(
    right_face: &Grid2D<f32>,
    front_face: &Grid2D<f32>,
    factor: usize,
) -> DecodeResult<VectorField> {
    if factor <= 1 {
        return compile_vector(right_face, front_face);
    }
    compile_vector(&resample_sum(right_face, factor)?, &resample_sum(front_face, factor)?)
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSlice {
    pub stress_period: i32,
    pub time_step: i32,
    pub layer: i32,
    pub resample: usize,
    pub field: VectorField,
}

impl VectorSlice {
    /// `LAY0nDIR_PPPPP`, with `DIRX` for resampled fields.
    pub fn direction_label(&self) -> String {
        self.label("DIR")
    }

    pub fn magnitude_label(&self) -> String {
        self.label("MAG")
    }

    fn label(&self, kind: &str) -> String {
        let suffix = if self.resample > 1 { "X" } else { "" };
        format!("LAY0{}{kind}{suffix}_{:05}", self.layer, self.stress_period)
    }
}

type SliceKey = (i32, i32, i32);

/// Pairs right-face and front-face slices streaming out of a budget pass.
///
/// Slices arrive in period order, so a face still waiting when a later
/// period or step shows up can never pair and is dropped.
#[derive(Debug, Default)]
pub struct VectorAssembler {
    resample: usize,
    right: BTreeMap<SliceKey, Grid2D<f32>>,
    front: BTreeMap<SliceKey, Grid2D<f32>>,
    dropped: usize,
}

impl VectorAssembler {
    pub fn new(resample: usize) -> Self {
        Self {
            resample: resample.max(1),
            ..Self::default()
        }
    }

    /// Accepts one slice; returns the compiled vector once both faces of its
    /// period, step and layer have arrived. Other terms are ignored.
    pub fn push(&mut self, slice: DecodedSlice) -> DecodeResult<Option<VectorSlice>> {
        let key = (slice.stress_period, slice.time_step, slice.layer);
        if slice.term == FLOW_RIGHT_FACE || slice.term == FLOW_FRONT_FACE {
            self.drop_before(key.0, key.1);
        }
        let (own, other) = match slice.term.as_str() {
            FLOW_RIGHT_FACE => (&mut self.right, &mut self.front),
            FLOW_FRONT_FACE => (&mut self.front, &mut self.right),
            _ => return Ok(None),
        };
        let Some(partner) = other.remove(&key) else {
            own.insert(key, slice.values);
            return Ok(None);
        };

        let (right, front) = if slice.term == FLOW_RIGHT_FACE {
            (slice.values, partner)
        } else {
            (partner, slice.values)
        };
        let field = compile_vector_resampled(&right, &front, self.resample)?;
        Ok(Some(VectorSlice {
            stress_period: key.0,
            time_step: key.1,
            layer: key.2,
            resample: self.resample,
            field,
        }))
    }

    /// Slices that never met their partner face, dropped or still waiting.
    pub fn unpaired(&self) -> usize {
        self.dropped + self.pending()
    }

    /// Slices held for a partner that may still arrive.
    pub fn pending(&self) -> usize {
        self.right.len() + self.front.len()
    }

    fn drop_before(&mut self, stress_period: i32, time_step: i32) {
        let boundary = (stress_period, time_step, i32::MIN);
        for faces in [&mut self.right, &mut self.front] {
            let current = faces.split_off(&boundary);
            let stale = std::mem::replace(faces, current);
            if !stale.is_empty() {
                debug!(
                    count = stale.len(),
                    stress_period, time_step, "dropping face flows left unpaired by an earlier step"
                );
                self.dropped += stale.len();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{VectorAssembler, compile_vector, compile_vector_resampled, resample_sum};
    use crate::domain::{DecodeError, DecodedSlice, Grid2D};

    fn grid(rows: usize, cols: usize, values: &[f32]) -> Grid2D<f32> {
        Grid2D::from_vec(rows, cols, values.to_vec()).expect("grid should build")
    }

    fn slice(term: &str, layer: i32, value: f32) -> DecodedSlice {
        DecodedSlice {
            term: term.to_string(),
            stress_period: 7,
            time_step: 1,
            layer,
            total_time: 7.0,
            values: Grid2D::filled(2, 2, value),
        }
    }

    #[test]
    fn directions_follow_the_compass_convention() {
        let right = grid(1, 4, &[-1.0, 1.0, 1.0, -1.0]);
        let front = grid(1, 4, &[-1.0, -1.0, 1.0, 1.0]);
        let field = compile_vector(&right, &front).expect("vector");
        let expected = [225.0, 315.0, 45.0, 135.0];
        for (actual, expected) in field.direction_degrees.values().iter().zip(expected) {
            assert!((actual - expected).abs() < 1.0e-4, "{actual} != {expected}");
        }
        for magnitude in field.magnitude.values() {
            assert!((magnitude - 2.0_f32.sqrt()).abs() < 1.0e-6);
        }
    }

    #[test]
    fn eastward_flow_is_180_and_westward_is_zero() {
        let field = compile_vector(&grid(1, 2, &[-1.0, 1.0]), &grid(1, 2, &[0.0, 0.0]))
            .expect("vector");
        assert_eq!(field.direction_degrees.values(), &[180.0, 0.0]);
        assert_eq!(field.magnitude.values(), &[1.0, 1.0]);
    }

    #[test]
    fn directions_never_carry_a_sign_or_reach_360() {
        let right = grid(1, 3, &[1.0, -1.0, 1.0]);
        let front = grid(1, 3, &[-0.0, -0.0, -1.0e-30]);
        let field = compile_vector(&right, &front).expect("vector");
        let directions = field.direction_degrees.values();
        assert_eq!(directions, &[0.0, 180.0, 0.0]);
        assert!(directions[0].is_sign_positive());
        assert!(directions[2].is_sign_positive());
        assert!(directions.iter().all(|degrees| (0.0..360.0).contains(degrees)));
    }

    #[test]
    fn resampling_sums_components_before_combining() {
        let right = Grid2D::filled(2, 2, 2.0_f32);
        let front = Grid2D::filled(2, 2, 0.0_f32);
        let field = compile_vector_resampled(&right, &front, 2).expect("vector");
        assert_eq!(field.magnitude.rows(), 1);
        assert_eq!(field.magnitude.values(), &[8.0]);
        assert_eq!(field.direction_degrees.values(), &[0.0]);
    }

    #[test]
    fn partial_edge_blocks_are_summed() {
        let values: Vec<f32> = (1..=9).map(|value| value as f32).collect();
        let summed = resample_sum(&grid(3, 3, &values), 2).expect("resample");
        assert_eq!(summed.rows(), 2);
        assert_eq!(summed.cols(), 2);
        assert_eq!(summed.values(), &[12.0, 9.0, 15.0, 9.0]);
        assert!(resample_sum(&summed, 0).is_err());
    }

    #[test]
    fn mismatched_components_are_rejected() {
        let error = compile_vector(&Grid2D::filled(2, 2, 1.0), &Grid2D::filled(2, 3, 1.0))
            .expect_err("shapes differ");
        assert!(matches!(
            error,
            DecodeError::GridShapeMismatch {
                rows: 2,
                cols: 3,
                ..
            }
        ));
    }

    #[test]
    fn assembler_pairs_faces_by_layer() {
        let mut assembler = VectorAssembler::new(1);
        assert!(assembler.push(slice("FLOW_RIGHT_FACE", 1, -3.0)).expect("push").is_none());
        assert!(assembler.push(slice("FLOW_RIGHT_FACE", 2, 1.0)).expect("push").is_none());
        assert!(assembler.push(slice("STORAGE", 1, 9.0)).expect("push").is_none());

        let vector = assembler
            .push(slice("FLOW_FRONT_FACE", 1, 4.0))
            .expect("push")
            .expect("pair complete");
        assert_eq!(vector.layer, 1);
        assert_eq!(vector.field.magnitude.values(), &[5.0; 4]);
        assert_eq!(vector.direction_label(), "LAY01DIR_00007");
        assert_eq!(vector.magnitude_label(), "LAY01MAG_00007");
        assert_eq!(assembler.unpaired(), 1);
    }

    #[test]
    fn faces_left_behind_by_a_later_period_are_dropped() {
        let mut assembler = VectorAssembler::new(1);
        assembler.push(slice("FLOW_RIGHT_FACE", 1, 1.0)).expect("push");
        assembler.push(slice("FLOW_FRONT_FACE", 2, 1.0)).expect("push");
        assert_eq!(assembler.pending(), 2);

        let mut later = slice("FLOW_RIGHT_FACE", 1, 2.0);
        later.stress_period = 8;
        assert!(assembler.push(later).expect("push").is_none());
        assert_eq!(assembler.pending(), 1);
        assert_eq!(assembler.unpaired(), 3);
    }

    #[test]
    fn resampled_labels_are_marked() {
        let mut assembler = VectorAssembler::new(2);
        assembler.push(slice("FLOW_FRONT_FACE", 3, 0.0)).expect("push");
        let vector = assembler
            .push(slice("FLOW_RIGHT_FACE", 3, 2.0))
            .expect("push")
            .expect("pair complete");
        assert_eq!(vector.field.magnitude.values(), &[8.0]);
        assert_eq!(vector.direction_label(), "LAY03DIRX_00007");
    }
}
