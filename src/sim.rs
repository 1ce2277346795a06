//! Simulation helpers: projection angles and parallel-beam forward projection of voxelized
//! objects into projection stacks that the corrections can be tested on.

use crate::config::DistributeOptions;
use crate::distribute::distribute;
use crate::error::{CorrectionError, Result};
use ndarray::{Array1, Array3, ArrayView1, ArrayView3, ArrayViewMut3, Axis};
use std::ops::Range;
use std::time::Instant;

/// `nang` uniformly spaced projection angles in radians from `ang1` to `ang2` degrees, both
/// included.
pub fn angles(nang: usize, ang1: f64, ang2: f64) -> Array1<f32> {
    let (start, end) = (ang1.to_radians(), ang2.to_radians());
    match nang {
        0 => Array1::zeros(0),
        1 => Array1::from_elem(1, start as f32),
        _ => {
            let step = (end - start) / (nang - 1) as f64;
            Array1::from_shape_fn(nang, |i| (start + step * i as f64) as f32)
        }
    }
}

/// Position of the rotation axis on the detector.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RotationCenter {
    /// The middle of the detector row.
    #[default]
    Detector,
    /// The same column position for every detector row.
    Uniform(f32),
    /// One column position per detector row.
    PerRow(Array1<f32>),
}

impl RotationCenter {
    /// One center per detector row for a detector of `rows x cols` pixels.
    pub fn expand(&self, rows: usize, cols: usize) -> Result<Array1<f32>> {
        match self {
            RotationCenter::Detector => Ok(Array1::from_elem(rows, cols as f32 / 2.0)),
            RotationCenter::Uniform(center) => Ok(Array1::from_elem(rows, *center)),
            RotationCenter::PerRow(centers) if centers.len() == rows => Ok(centers.clone()),
            RotationCenter::PerRow(centers) => Err(CorrectionError::ShapeMismatch {
                what: "rotation centers",
                expected: vec![rows],
                found: vec![centers.len()],
            }),
        }
    }
}

/// A parallel-beam forward projection routine.
///
/// Implementations fill a range of projections of the output stack. The output view is
/// indexed from 0; `range` tells which global projection indices (and thus which entries of
/// `theta`) it holds.
pub trait ForwardProjector: Send + Sync {
    fn project_range(
        &self,
        object: ArrayView3<f32>,
        projections: ArrayViewMut3<f32>,
        theta: ArrayView1<f32>,
        center: ArrayView1<f32>,
        range: Range<usize>,
    ) -> Result<()>;
}

/// Reference projector: every voxel is spread onto the two nearest detector pixels with
/// linear weights. Slow but exact in the total mass.
#[derive(Clone, Copy, Debug, Default)]
pub struct PixelDrivenProjector;

impl ForwardProjector for PixelDrivenProjector {
    fn project_range(
        &self,
        object: ArrayView3<f32>,
        mut projections: ArrayViewMut3<f32>,
        theta: ArrayView1<f32>,
        center: ArrayView1<f32>,
        range: Range<usize>,
    ) -> Result<()> {
        let (_, oy, oz) = object.dim();
        let dz = projections.len_of(Axis(2));
        let (half_y, half_z) = (oy as f64 / 2.0, oz as f64 / 2.0);

        for (mut projection, p) in projections.axis_iter_mut(Axis(0)).zip(range) {
            let angle = theta[p] as f64;
            let (sin, cos) = angle.sin_cos();
            for ((mut row, slice), &c) in projection
                .axis_iter_mut(Axis(0))
                .zip(object.axis_iter(Axis(0)))
                .zip(center.iter())
            {
                for ((iy, iz), &value) in slice.indexed_iter() {
                    if value == 0.0 {
                        continue;
                    }
                    let y = iy as f64 + 0.5 - half_y;
                    let z = iz as f64 + 0.5 - half_z;
                    // continuous detector index, pixel k centered at k + 0.5
                    let u = z * cos + y * sin + c as f64 - 0.5;
                    let k0 = u.floor();
                    let w = (u - k0) as f32;
                    let k0 = k0 as isize;
                    for (k, weight) in [(k0, 1.0 - w), (k0 + 1, w)] {
                        if k >= 0 && (k as usize) < dz && weight != 0.0 {
                            row[k as usize] += value * weight;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Projects a voxelized object (slice, y, z) at the angles `theta`.
///
/// The result has `theta.len()` projections of `ox` rows and `ceil(sqrt(oy^2 + oz^2))`
/// columns. The work is distributed over the projections.
pub fn project(
    object: &Array3<f32>,
    theta: &Array1<f32>,
    center: &RotationCenter,
    projector: &dyn ForwardProjector,
    options: &DistributeOptions,
) -> Result<Array3<f32>> {
    let (ox, oy, oz) = object.dim();
    let dz = ((oy * oy + oz * oz) as f64).sqrt().ceil() as usize;
    let center = center.expand(ox, dz)?;
    let mut tomo = Array3::<f32>::zeros((theta.len(), ox, dz));

    let start = Instant::now();
    distribute(&mut tomo, Axis(0), options, |chunk, range| {
        projector.project_range(object.view(), chunk, theta.view(), center.view(), range)
    })?;
    log::debug!(
        "projected a {ox}x{oy}x{oz} object at {} angles in {:?}",
        theta.len(),
        start.elapsed()
    );
    Ok(tomo)
}
