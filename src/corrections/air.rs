use crate::config::DistributeOptions;
use crate::corrections::correction::{Correction, CorrectionAxis, CorrectionConfig};
use crate::distribute::distribute;
use crate::error::{CorrectionError, Result};
use correction_macros::register_correction;
use ndarray::{s, Array3, ArrayView1, ArrayViewMut1, Axis};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Divisors below this magnitude leave the pixel untouched.
const MIN_DIVISOR: f32 = 1e-6;

#[register_correction]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirCorrection {
    /// Number of air pixels at each end of a detector row.
    pub air: usize,
}

impl Default for AirCorrection {
    fn default() -> Self {
        AirCorrection { air: 10 }
    }
}

impl Correction for AirCorrection {
    fn new() -> Self
    where
        Self: Sized,
    {
        AirCorrection::default()
    }

    fn config(&self) -> CorrectionConfig {
        CorrectionConfig {
            name: "Air Correction".to_string(),
            description: "Normalizes every detector row by the intensity of the air regions \
                          at its ends, interpolated linearly in between."
                .to_string(),
            hyperlink: None,
            axis: CorrectionAxis::Projection,
        }
    }

    fn apply(&self, volume: &mut Array3<f32>, options: &DistributeOptions) -> Result<()> {
        correct_air(volume, self.air, options)
    }
}

fn mean(values: ArrayView1<f32>) -> f32 {
    (values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64) as f32
}

/// Air means at or below zero are replaced by 1.
fn anchor(value: f32) -> (f32, bool) {
    if value > 0.0 {
        (value, false)
    } else {
        (1.0, true)
    }
}

/// Divides one row by its air-intensity profile. Returns `true` if an air mean was not positive
/// and had to be replaced.
pub(crate) fn correct_row(mut row: ArrayViewMut1<f32>, air: usize) -> bool {
    let n = row.len();
    let (left, left_replaced) = anchor(mean(row.slice(s![..air])));
    let (right, right_replaced) = anchor(mean(row.slice(s![n - air..])));
    let span = (n - 2 * air + 1) as f32;

    for (i, value) in row.iter_mut().enumerate() {
        let divisor = if i < air {
            left
        } else if i >= n - air {
            right
        } else {
            let t = (i + 1 - air) as f32 / span;
            left + (right - left) * t
        };
        if divisor.abs() >= MIN_DIVISOR {
            *value /= divisor;
        }
    }
    left_replaced || right_replaced
}

/// Weights every projection row by the intensity of its air regions.
///
/// The first and the last `air` pixels of every row are assumed to see no sample. The row is
/// divided by the mean of the left air region on the left, by the mean of the right air region
/// on the right and by a linear blend of both in between, so both air regions average to 1
/// afterwards. An air mean that is not positive is replaced by 1, so the divisor never changes
/// sign along the row.
///
/// # Arguments
/// - `volume`: 3D data indexed (projection, row, column), modified in place.
/// - `air`: Number of air pixels at each side. Clamped to half the row width.
/// - `options`: Worker configuration.
pub fn correct_air(volume: &mut Array3<f32>, air: usize, options: &DistributeOptions) -> Result<()> {
    if air == 0 {
        return Err(CorrectionError::invalid(
            "air",
            "at least one air pixel per side is needed",
        ));
    }
    let cols = volume.len_of(Axis(2));
    let effective = air.min(cols / 2);
    if effective != air {
        log::warn!("air region of {air} pixels does not fit {cols} columns, using {effective}");
    }
    if effective == 0 {
        log::warn!("rows of {cols} pixels have no room for air regions, skipping air correction");
        return Ok(());
    }

    let start = Instant::now();
    let replaced = AtomicUsize::new(0);
    distribute(volume, Axis(0), options, |mut chunk, _| {
        for row in chunk.lanes_mut(Axis(2)) {
            if correct_row(row, effective) {
                replaced.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    })?;
    let replaced = replaced.into_inner();
    if replaced > 0 {
        log::warn!("{replaced} rows had a non-positive air mean, which was replaced by 1");
    }
    log::debug!("air correction (air = {effective}) took {:?}", start.elapsed());
    Ok(())
}
