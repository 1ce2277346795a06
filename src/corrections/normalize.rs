use crate::config::DistributeOptions;
use crate::distribute::distribute;
use crate::error::{CorrectionError, Result};
use ndarray::{Array2, Array3, Axis, Zip};
use std::time::Instant;

/// Replacement for a flat-minus-dark denominator that is exactly zero.
const ZERO_DENOMINATOR: f32 = 1e-6;

/// Mean over axis 0 of a reference field whose images must match the projections.
fn reference_mean(
    what: &'static str,
    field: &Array3<f32>,
    rows: usize,
    cols: usize,
) -> Result<Array2<f32>> {
    let (n, frows, fcols) = field.dim();
    if (frows, fcols) != (rows, cols) {
        return Err(CorrectionError::ShapeMismatch {
            what,
            expected: vec![n, rows, cols],
            found: field.shape().to_vec(),
        });
    }
    field
        .mean_axis(Axis(0))
        .ok_or_else(|| CorrectionError::invalid(what, "needs at least one image"))
}

/// Normalizes raw projections with flat and dark fields.
///
/// Every projection becomes `(proj - dark) / (flat - dark)`, with `flat` and `dark` averaged
/// over their first axis. Pixels whose denominator is exactly zero are divided by `1e-6`
/// instead. With a `cutoff`, results above it are clamped to it.
///
/// # Arguments
/// - `volume`: Projections indexed (projection, row, column), modified in place.
/// - `flat`: White-field images, any number of them, each the size of one projection.
/// - `dark`: Dark-field images, same constraint.
/// - `cutoff`: Optional upper bound of the normalized values.
/// - `options`: Worker configuration.
pub fn normalize(
    volume: &mut Array3<f32>,
    flat: &Array3<f32>,
    dark: &Array3<f32>,
    cutoff: Option<f32>,
    options: &DistributeOptions,
) -> Result<()> {
    let (_, rows, cols) = volume.dim();
    let flat_mean = reference_mean("flat field", flat, rows, cols)?;
    let dark_mean = reference_mean("dark field", dark, rows, cols)?;
    let denominator = (&flat_mean - &dark_mean).mapv(|d| if d == 0.0 { ZERO_DENOMINATOR } else { d });

    let start = Instant::now();
    distribute(volume, Axis(0), options, |mut chunk, _| {
        for mut projection in chunk.axis_iter_mut(Axis(0)) {
            Zip::from(&mut projection)
                .and(&dark_mean)
                .and(&denominator)
                .for_each(|value, &dark, &denominator| {
                    let normalized = (*value - dark) / denominator;
                    *value = match cutoff {
                        Some(cutoff) if normalized > cutoff => cutoff,
                        _ => normalized,
                    };
                });
        }
        Ok(())
    })?;
    log::debug!(
        "normalized {} projections (cutoff {:?}) in {:?}",
        volume.len_of(Axis(0)),
        cutoff,
        start.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_end_to_end_half_transmission() {
        let mut volume = Array3::<f32>::from_elem((4, 8, 8), 2.0);
        let flat = Array3::<f32>::from_elem((4, 8, 8), 4.0);
        let dark = Array3::<f32>::zeros((4, 8, 8));
        normalize(&mut volume, &flat, &dark, None, &DistributeOptions::default()).unwrap();
        assert!(volume.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_round_trip_recovers_transmission() {
        let transmission = Array3::from_shape_fn((5, 3, 4), |(p, r, c)| {
            0.1 * (p + r + c) as f32 / 10.0 + 0.05
        });
        let dark = Array3::from_shape_fn((2, 3, 4), |(i, r, c)| 10.0 + (i + r + c) as f32);
        let flat = Array3::from_shape_fn((3, 3, 4), |(i, r, c)| 1000.0 + 5.0 * (i + r * c) as f32);
        let dark_mean = dark.mean_axis(Axis(0)).unwrap();
        let flat_mean = flat.mean_axis(Axis(0)).unwrap();

        let mut volume = transmission.clone();
        for mut projection in volume.axis_iter_mut(Axis(0)) {
            let raw = &dark_mean + &(&projection * &(&flat_mean - &dark_mean));
            projection.assign(&raw);
        }
        let options = DistributeOptions::default().with_ncore(2);
        normalize(&mut volume, &flat, &dark, None, &options).unwrap();
        assert_abs_diff_eq!(volume, transmission, epsilon = 1e-5);
    }

    #[test]
    fn test_unit_gap_yields_offset() {
        let dark = Array3::<f32>::from_elem((2, 3, 3), 5.0);
        let flat = Array3::<f32>::from_elem((2, 3, 3), 6.0);
        let raw = Array3::<f32>::from_elem((3, 3, 3), 5.75);

        let mut volume = raw.clone();
        normalize(&mut volume, &flat, &dark, None, &DistributeOptions::default()).unwrap();
        assert!(volume.iter().all(|&v| v == 0.75));

        let mut volume = raw;
        normalize(&mut volume, &flat, &dark, Some(0.5), &DistributeOptions::default()).unwrap();
        assert!(volume.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_cutoff_clamps_from_above_only() {
        let mut volume = Array3::from_shape_fn((1, 1, 3), |(_, _, c)| [0.5, 3.0, -1.0][c]);
        let flat = Array3::<f32>::ones((1, 1, 3));
        let dark = Array3::<f32>::zeros((1, 1, 3));
        normalize(&mut volume, &flat, &dark, Some(1.0), &DistributeOptions::sequential()).unwrap();
        assert_eq!(volume.into_raw_vec_and_offset().0, vec![0.5, 1.0, -1.0]);
    }

    #[test]
    fn test_zero_denominator_is_replaced() {
        let mut volume = Array3::<f32>::from_elem((1, 2, 2), 2.0);
        volume[[0, 0, 0]] = 1.0;
        let flat = Array3::<f32>::ones((1, 2, 2));
        let dark = Array3::<f32>::ones((1, 2, 2));
        normalize(&mut volume, &flat, &dark, None, &DistributeOptions::sequential()).unwrap();
        assert_eq!(volume[[0, 0, 0]], 0.0);
        assert_abs_diff_eq!(volume[[0, 1, 1]], 1e6, epsilon = 1.0);
    }

    #[test]
    fn test_reference_shape_is_checked_before_work() {
        let mut volume = Array3::<f32>::from_elem((2, 4, 4), 2.0);
        let flat = Array3::<f32>::ones((1, 4, 5));
        let dark = Array3::<f32>::zeros((1, 4, 4));
        let err = normalize(&mut volume, &flat, &dark, None, &DistributeOptions::default()).unwrap_err();
        assert!(matches!(err, CorrectionError::ShapeMismatch { what: "flat field", .. }));
        assert!(volume.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_empty_reference_is_rejected() {
        let mut volume = Array3::<f32>::ones((1, 2, 2));
        let flat = Array3::<f32>::ones((0, 2, 2));
        let dark = Array3::<f32>::zeros((1, 2, 2));
        assert!(normalize(&mut volume, &flat, &dark, None, &DistributeOptions::default()).is_err());
    }
}
