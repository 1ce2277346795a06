use crate::config::DistributeOptions;
use crate::corrections::air::correct_row;
use crate::corrections::correction::{Correction, CorrectionAxis, CorrectionConfig};
use crate::distribute::distribute;
use crate::error::{CorrectionError, Result};
use correction_macros::register_correction;
use ndarray::{s, Array2, Array3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::Range;

#[register_correction]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircularRoi {
    /// Mask diameter relative to the smaller projection dimension.
    pub ratio: f32,
    /// Value written outside the circle, the mean inside the circle when `None`.
    pub val: Option<f32>,
}

impl Default for CircularRoi {
    fn default() -> Self {
        CircularRoi {
            ratio: 1.0,
            val: None,
        }
    }
}

impl Correction for CircularRoi {
    fn new() -> Self
    where
        Self: Sized,
    {
        CircularRoi::default()
    }

    fn config(&self) -> CorrectionConfig {
        CorrectionConfig {
            name: "Circular ROI".to_string(),
            description: "Overwrites every projection outside a centered circle.".to_string(),
            hyperlink: None,
            axis: CorrectionAxis::Projection,
        }
    }

    fn apply(&self, volume: &mut Array3<f32>, options: &DistributeOptions) -> Result<()> {
        circular_roi(volume, self.ratio, self.val, options)
    }
}

/// `true` for pixels outside the circle of radius `ratio * min(rows, cols) / 2`.
fn outside_circle(rows: usize, cols: usize, ratio: f32) -> Array2<bool> {
    let (rad_rows, rad_cols) = (rows as f64 / 2.0, cols as f64 / 2.0);
    let radius = rad_rows.min(rad_cols) * ratio as f64;
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let y = r as f64 - rad_rows;
        let x = c as f64 - rad_cols;
        x * x + y * y > radius * radius
    })
}

/// Sets every pixel outside a centered circle to `val`.
///
/// The circle has the diameter `ratio * min(rows, cols)`. Without `val`, the mean of all
/// pixels inside the circle over the whole volume is used.
pub fn circular_roi(
    volume: &mut Array3<f32>,
    ratio: f32,
    val: Option<f32>,
    options: &DistributeOptions,
) -> Result<()> {
    if !(ratio.is_finite() && ratio >= 0.0) {
        return Err(CorrectionError::invalid(
            "ratio",
            format!("must be non-negative, got {ratio}"),
        ));
    }
    let (_, rows, cols) = volume.dim();
    let mask = outside_circle(rows, cols, ratio);

    let val = match val {
        Some(val) => val,
        None => {
            let (mut sum, mut count) = (0.0f64, 0usize);
            for projection in volume.axis_iter(Axis(0)) {
                Zip::from(&projection).and(&mask).for_each(|&v, &outside| {
                    if !outside {
                        sum += v as f64;
                        count += 1;
                    }
                });
            }
            if count == 0 {
                log::warn!("circular mask with ratio {ratio} is empty, filling with 0");
                0.0
            } else {
                (sum / count as f64) as f32
            }
        }
    };

    distribute(volume, Axis(0), options, |mut chunk, _| {
        for mut projection in chunk.axis_iter_mut(Axis(0)) {
            Zip::from(&mut projection).and(&mask).for_each(|v, &outside| {
                if outside {
                    *v = val;
                }
            });
        }
        Ok(())
    })
}

/// Location and size of a circular region of interest in the reconstruction plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusRegion {
    /// Diameter of the region in pixels.
    pub dia: usize,
    /// Horizontal offset of the region center from the rotation axis.
    pub xcoord: f32,
    /// Vertical offset of the region center from the rotation axis.
    pub ycoord: f32,
    /// Rotation axis position, the detector center when `None`.
    pub center: Option<f32>,
    /// Keep the full detector width, with ones outside the window.
    pub pad: bool,
    /// Apply an air correction with one air pixel to every trimmed window.
    pub corr: bool,
}

impl Default for FocusRegion {
    fn default() -> Self {
        FocusRegion {
            dia: 0,
            xcoord: 0.0,
            ycoord: 0.0,
            center: None,
            pad: false,
            corr: true,
        }
    }
}

impl FocusRegion {
    /// Detector columns that see the region in projection `m` of `nproj` over half a turn.
    fn window(&self, m: usize, nproj: usize, cols: usize) -> Range<usize> {
        let center = self.center.map_or(cols as f64 / 2.0, |c| c as f64);
        let (x, y) = (self.xcoord as f64, self.ycoord as f64);
        let rad = (x * x + y * y).sqrt();
        let alpha = x.atan2(y);
        let left = center - self.dia as f64 / 2.0;
        let delta = PI / nproj as f64;

        let offset = (alpha - m as f64 * delta).cos() * rad + left;
        let clamp = |v: f64| v.clamp(0.0, cols as f64) as usize;
        clamp(offset.ceil())..clamp((offset + self.dia as f64).floor())
    }
}

/// Trims the projections of a 0-180 degree scan to the detector window that sees a circular
/// region of interest.
///
/// Returns a new volume `dia` columns wide, or as wide as the input when `region.pad` is set.
/// Columns not covered by the window are one.
pub fn focus_region(
    volume: &Array3<f32>,
    region: &FocusRegion,
    options: &DistributeOptions,
) -> Result<Array3<f32>> {
    if region.dia == 0 {
        return Err(CorrectionError::invalid("dia", "region diameter must be positive"));
    }
    let (nproj, rows, cols) = volume.dim();
    let width = if region.pad { cols } else { region.dia };
    let mut out = Array3::<f32>::ones((nproj, rows, width));

    distribute(&mut out, Axis(0), options, |mut chunk, range| {
        for (mut target, m) in chunk.axis_iter_mut(Axis(0)).zip(range) {
            let window = region.window(m, nproj, cols);
            let start = if region.pad { window.start } else { 0 };
            let mut target = target.slice_mut(s![.., start..start + window.len()]);
            target.assign(&volume.slice(s![m, .., window]));
            if region.corr && target.ncols() >= 2 {
                for row in target.lanes_mut(Axis(1)) {
                    correct_row(row, 1);
                }
            }
        }
        Ok(())
    })?;
    log::debug!("trimmed {nproj} projections to a {width} pixel wide focus region");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn indexed_volume() -> Array3<f32> {
        Array3::from_shape_fn((6, 3, 20), |(p, r, c)| 1.0 + p as f32 + 0.1 * r as f32 + c as f32)
    }

    #[test]
    fn test_circle_mask() {
        let mask = outside_circle(4, 4, 1.0);
        assert!(mask[[0, 0]]);
        assert!(!mask[[1, 1]]);
        assert!(!mask[[2, 2]]);
        assert!(!mask[[0, 2]]);
        assert!(mask.iter().filter(|&&m| m).count() < 16);
    }

    #[test]
    fn test_circular_roi_with_value() {
        let mut volume = Array3::<f32>::ones((2, 8, 8));
        circular_roi(&mut volume, 1.0, Some(-1.0), &DistributeOptions::default()).unwrap();
        assert_eq!(volume[[0, 0, 0]], -1.0);
        assert_eq!(volume[[1, 0, 0]], -1.0);
        assert_eq!(volume[[1, 4, 4]], 1.0);
    }

    #[test]
    fn test_circular_roi_default_is_inside_mean() {
        let mut volume = Array3::from_shape_fn((2, 6, 6), |(p, r, c)| (p + r + c) as f32);
        let mask = outside_circle(6, 6, 0.5);
        let mut inside = Vec::new();
        for projection in volume.axis_iter(Axis(0)) {
            for (v, outside) in projection.iter().zip(mask.iter()) {
                if !outside {
                    inside.push(*v);
                }
            }
        }
        let expected = inside.iter().sum::<f32>() / inside.len() as f32;

        CircularRoi { ratio: 0.5, val: None }
            .apply(&mut volume, &DistributeOptions::default())
            .unwrap();
        assert_abs_diff_eq!(volume[[0, 0, 0]], expected, epsilon = 1e-5);
        assert_eq!(volume[[1, 3, 3]], 7.0);
    }

    #[test]
    fn test_centered_region_is_a_fixed_window() {
        let volume = indexed_volume();
        let region = FocusRegion {
            dia: 8,
            corr: false,
            ..FocusRegion::default()
        };
        let out = focus_region(&volume, &region, &DistributeOptions::default()).unwrap();
        assert_eq!(out.dim(), (6, 3, 8));
        assert_eq!(out, volume.slice(s![.., .., 6..14]));
    }

    #[test]
    fn test_padded_region_keeps_width() {
        let volume = indexed_volume();
        let region = FocusRegion {
            dia: 8,
            pad: true,
            corr: false,
            ..FocusRegion::default()
        };
        let out = focus_region(&volume, &region, &DistributeOptions::default()).unwrap();
        assert_eq!(out.dim(), (6, 3, 20));
        assert_eq!(out.slice(s![.., .., 6..14]), volume.slice(s![.., .., 6..14]));
        assert!(out.slice(s![.., .., ..6]).iter().all(|&v| v == 1.0));
        assert!(out.slice(s![.., .., 14..]).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_corrected_window_edges_are_one() {
        let volume = indexed_volume();
        let region = FocusRegion {
            dia: 8,
            ..FocusRegion::default()
        };
        let out = focus_region(&volume, &region, &DistributeOptions::default()).unwrap();
        for row in out.lanes(Axis(2)) {
            assert_abs_diff_eq!(row[0], 1.0, epsilon = 1e-6);
            assert_abs_diff_eq!(row[7], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_offset_region_moves_with_angle() {
        let region = FocusRegion {
            dia: 4,
            xcoord: 0.0,
            ycoord: 5.0,
            ..FocusRegion::default()
        };
        // alpha = 0: window starts at the offset at m = 0 and moves back over half a turn
        assert_eq!(region.window(0, 4, 40), 23..27);
        assert_eq!(region.window(2, 4, 40), 18..22);
        let region = FocusRegion {
            dia: 4,
            ycoord: -100.0,
            ..FocusRegion::default()
        };
        assert_eq!(region.window(0, 4, 40), 0..0);
    }

    #[test]
    fn test_zero_diameter_is_rejected() {
        let volume = indexed_volume();
        assert!(focus_region(&volume, &FocusRegion::default(), &DistributeOptions::default()).is_err());
    }
}
