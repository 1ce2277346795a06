use crate::config::DistributeOptions;
use crate::corrections::correction::{Correction, CorrectionAxis, CorrectionConfig};
use crate::distribute::distribute;
use crate::error::{CorrectionError, Result};
use correction_macros::register_correction;
use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::Instant;

const CG_TOLERANCE: f64 = 1e-7;
const CG_MAX_ITERATIONS: usize = 1_000_000;

/// Finite-difference kernels indexed by derivative order and accuracy order.
const KERNELS: &[&[&[f64]]] = &[
    &[
        &[1.0, -1.0],
        &[-3.0 / 2.0, 2.0, -1.0 / 2.0],
        &[-11.0 / 6.0, 3.0, -3.0 / 2.0, 1.0 / 3.0],
    ],
    &[&[-1.0, 2.0, -1.0], &[2.0, -5.0, 4.0, -1.0]],
    &[&[-1.0, 3.0, -3.0, 1.0]],
];

/// First-order difference, used by the first correction pass.
const FIRST_DIFFERENCE: &[f64] = KERNELS[0][0];

/// Second-order difference, used by the second correction pass.
const SECOND_DIFFERENCE: &[f64] = KERNELS[1][0];

/// Finite-difference kernel of derivative `order` (1..=3) and accuracy `accuracy`.
pub fn kernel(order: usize, accuracy: usize) -> Option<&'static [f64]> {
    KERNELS
        .get(order.checked_sub(1)?)?
        .get(accuracy.checked_sub(1)?)
        .copied()
}

#[register_correction]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitarenkoStripes {
    /// Number of projection blocks corrected independently, 0 for the whole sinogram.
    pub nblock: usize,
    /// Damping factor of the final recombination.
    pub alpha: f32,
}

impl Default for TitarenkoStripes {
    fn default() -> Self {
        TitarenkoStripes {
            nblock: 0,
            alpha: 1.5,
        }
    }
}

impl Correction for TitarenkoStripes {
    fn new() -> Self
    where
        Self: Sized,
    {
        TitarenkoStripes::default()
    }

    fn config(&self) -> CorrectionConfig {
        CorrectionConfig {
            name: "Titarenko Stripe Removal".to_string(),
            description: "Removes ring artifacts by a regularized smoothing of the mean \
                          column profile of every sinogram."
                .to_string(),
            hyperlink: None,
            axis: CorrectionAxis::Sinogram,
        }
    }

    fn apply(&self, volume: &mut Array3<f32>, options: &DistributeOptions) -> Result<()> {
        remove_stripe_ti(volume, self.nblock, self.alpha, options)
    }
}

fn dot(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    a.dot(b)
}

/// `K^T K x`, with `K` the matrix applying `h` as a valid correlation.
fn normal_product(h: &[f64], x: ArrayView1<f64>) -> Array1<f64> {
    let n = x.len();
    let l = h.len();
    let valid = n + 1 - l;
    let u: Vec<f64> = (0..valid)
        .map(|i| h.iter().enumerate().map(|(j, hj)| hj * x[i + j]).sum())
        .collect();
    Array1::from_shape_fn(n, |k| {
        let lo = k.saturating_sub(l - 1);
        let hi = k.min(valid - 1);
        (lo..=hi).map(|i| h[k - i] * u[i]).sum()
    })
}

/// Solves `(K^T K + a I) x = f` by conjugate gradients.
fn conjugate_gradient(h: &[f64], a: f64, f: &Array1<f64>) -> Array1<f64> {
    let apply = |v: &Array1<f64>| normal_product(h, v.view()) + &(v * a);

    let mut x = Array1::zeros(f.len());
    let mut r = f.clone();
    let mut p = r.clone();
    let mut rs = dot(&r, &r);
    if rs.sqrt() < CG_TOLERANCE {
        return x;
    }

    for iteration in 0..CG_MAX_ITERATIONS {
        let ap = apply(&p);
        let pap = dot(&p, &ap);
        if !(pap.is_finite() && pap > 0.0) {
            log::warn!("conjugate gradient broke down after {iteration} iterations");
            return x;
        }
        let step = rs / pap;
        x.scaled_add(step, &p);
        r.scaled_add(-step, &ap);
        let rs_next = dot(&r, &r);
        if rs_next.sqrt() < CG_TOLERANCE {
            return x;
        }
        p = &r + &(&p * (rs_next / rs));
        rs = rs_next;
    }
    log::warn!(
        "conjugate gradient did not converge in {CG_MAX_ITERATIONS} iterations, residual {}",
        rs.sqrt()
    );
    x
}

/// Additive column correction for one sinogram (projections x columns).
///
/// Returns `q` with `(K^T K + a I) q = -K^T K p`, where `p` is the column-mean profile, `K`
/// applies `kernel` and `a = 1 / (2 (max - min))` of the per-projection sums. The correction
/// is zero when the profile is annihilated by the kernel, when all projections have the same
/// sum or when the sinogram is narrower than the kernel.
pub fn ring_correction(sinogram: ArrayView2<f64>, kernel: &[f64]) -> Array1<f64> {
    let (n, cols) = sinogram.dim();
    if n == 0 || cols < kernel.len() {
        return Array1::zeros(cols);
    }
    let sums = sinogram.sum_axis(Axis(1));
    let max = sums.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = sums.iter().copied().fold(f64::INFINITY, f64::min);
    let spread = max - min;
    if !(spread.is_finite() && spread > 0.0) {
        return Array1::zeros(cols);
    }
    let a = 1.0 / (2.0 * spread);

    let profile = sinogram.sum_axis(Axis(0)) / n as f64;
    let f = -normal_product(kernel, profile.view());
    conjugate_gradient(kernel, a, &f)
}

/// Splits `n` projections into `nblock` blocks, the last one taking the remainder.
fn block_ranges(n: usize, nblock: usize) -> Vec<Range<usize>> {
    if nblock <= 1 || n == 0 {
        return vec![0..n];
    }
    let nblock = nblock.min(n);
    let size = n / nblock;
    (0..nblock)
        .map(|k| {
            let end = if k + 1 == nblock { n } else { (k + 1) * size };
            k * size..end
        })
        .collect()
}

/// The sinogram with the ring correction of `kernel` added, blockwise.
fn corrected(sinogram: &Array2<f64>, blocks: &[Range<usize>], kernel: &[f64]) -> Array2<f64> {
    let mut out = sinogram.clone();
    for block in blocks {
        let q = ring_correction(sinogram.slice(s![block.clone(), ..]), kernel);
        let mut target = out.slice_mut(s![block.clone(), ..]);
        target += &q;
    }
    out
}

fn correct_sinogram(mut sinogram: ArrayViewMut2<f32>, blocks: &[Range<usize>], alpha: f64) {
    let data = sinogram.mapv(|v| if v.is_nan() { 0.0 } else { v as f64 });
    let product =
        corrected(&data, blocks, FIRST_DIFFERENCE) * corrected(&data, blocks, SECOND_DIFFERENCE);
    let floor = alpha * product.iter().copied().fold(f64::INFINITY, f64::min).abs();
    Zip::from(&mut sinogram)
        .and(&product)
        .for_each(|v, &p| *v = (p + floor).max(0.0).sqrt() as f32);
}

/// Removes ring artifacts from sinograms with Titarenko's regularization.
///
/// Every sinogram is corrected twice, with a first- and a second-order difference kernel.
/// The two results are multiplied and recombined as `sqrt(p + alpha |min p|)`. With
/// `nblock > 0` the projections are corrected in `nblock` independent blocks.
pub fn remove_stripe_ti(
    volume: &mut Array3<f32>,
    nblock: usize,
    alpha: f32,
    options: &DistributeOptions,
) -> Result<()> {
    if !(alpha.is_finite() && alpha >= 0.0) {
        return Err(CorrectionError::invalid(
            "alpha",
            format!("must be non-negative, got {alpha}"),
        ));
    }
    let n = volume.len_of(Axis(0));
    if nblock > n && n > 0 {
        log::warn!("{nblock} blocks requested for {n} projections, using {n}");
    }
    let blocks = block_ranges(n, nblock);

    let start = Instant::now();
    distribute(volume, Axis(1), options, |mut chunk, _| {
        for sinogram in chunk.axis_iter_mut(Axis(1)) {
            correct_sinogram(sinogram, &blocks, alpha as f64);
        }
        Ok(())
    })?;
    log::info!(
        "titarenko stripe removal (nblock {nblock}, alpha {alpha}) took {:?}",
        start.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn striped_sinogram() -> Array2<f64> {
        let mut sinogram = Array2::from_shape_fn((20, 16), |(p, _)| 1.0 + 0.1 * p as f64);
        sinogram.column_mut(5).mapv_inplace(|v| v + 0.3);
        sinogram
    }

    #[test]
    fn test_kernel_table() {
        assert_eq!(kernel(1, 1), Some(&[1.0, -1.0][..]));
        assert_eq!(kernel(2, 1), Some(&[-1.0, 2.0, -1.0][..]));
        assert_eq!(kernel(3, 1).map(|k| k.len()), Some(4));
        assert_eq!(kernel(2, 3), None);
        assert_eq!(kernel(0, 1), None);
        for order in KERNELS {
            for k in order.iter() {
                assert_abs_diff_eq!(k.iter().sum::<f64>(), 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_normal_product_matches_dense_matrix() {
        let h = [-1.0, 2.0, -1.0];
        let x = Array1::from(vec![1.0, 4.0, 2.0, -3.0, 0.5]);
        let mut k = Array2::<f64>::zeros((3, 5));
        for i in 0..3 {
            for (j, hj) in h.iter().enumerate() {
                k[[i, i + j]] = *hj;
            }
        }
        let dense = k.t().dot(&k.dot(&x));
        assert_abs_diff_eq!(normal_product(&h, x.view()), dense, epsilon = 1e-12);
    }

    #[test]
    fn test_smooth_profile_needs_no_correction() {
        // constant columns are annihilated by both kernels
        let sinogram = Array2::from_shape_fn((12, 10), |(p, _)| 2.0 + p as f64);
        for (m, n) in [(1, 1), (2, 1)] {
            let q = ring_correction(sinogram.view(), kernel(m, n).unwrap());
            assert!(q.iter().all(|&v| v == 0.0));
        }
        // linear columns are annihilated by the second difference
        let ramp = Array2::from_shape_fn((12, 10), |(p, c)| 2.0 + p as f64 + 0.5 * c as f64);
        let q = ring_correction(ramp.view(), kernel(2, 1).unwrap());
        assert_abs_diff_eq!(q, Array1::<f64>::zeros(10), epsilon = 1e-9);
    }

    #[test]
    fn test_correction_solves_regularized_system() {
        let sinogram = striped_sinogram();
        let h = kernel(2, 1).unwrap();
        let q = ring_correction(sinogram.view(), h);

        let profile = sinogram.mean_axis(Axis(0)).unwrap();
        let spread = 16.0 * 0.1 * 19.0;
        let a = 1.0 / (2.0 * spread);
        let lhs = normal_product(h, q.view()) + &(&q * a);
        let rhs = -normal_product(h, profile.view());
        assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-6);
    }

    #[test]
    fn test_identical_projections_yield_zero_correction() {
        let mut sinogram = Array2::<f64>::ones((6, 8));
        sinogram.column_mut(3).fill(5.0);
        let q = ring_correction(sinogram.view(), kernel(1, 1).unwrap());
        assert!(q.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_stripe_is_suppressed() {
        let mut volume = striped_sinogram().mapv(|v| v as f32).insert_axis(Axis(1));
        remove_stripe_ti(&mut volume, 0, 1.5, &DistributeOptions::default()).unwrap();
        for p in 0..20usize {
            let row = volume.slice(s![p, 0usize, ..]);
            assert!((row[5] - 0.5 * (row[4] + row[6])).abs() < 0.05, "projection {p}: {row}");
        }
    }

    #[test]
    fn test_stripe_free_data_is_unchanged_without_damping() {
        let mut volume = Array3::from_shape_fn((8, 3, 10), |(p, r, _)| 1.0 + p as f32 + r as f32);
        let original = volume.clone();
        remove_stripe_ti(&mut volume, 0, 0.0, &DistributeOptions::default()).unwrap();
        assert_eq!(volume, original);
    }

    #[test]
    fn test_blocks_absorb_remainder() {
        assert_eq!(block_ranges(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(block_ranges(10, 0), vec![0..10]);
        assert_eq!(block_ranges(2, 5), vec![0..1, 1..2]);
    }

    #[test]
    fn test_nan_and_blocks_give_finite_output() {
        let mut volume = Array3::from_shape_fn((13, 2, 9), |(p, r, c)| {
            1.0 + 0.2 * p as f32 + 0.1 * r as f32 + if c == 4 { 0.4 } else { 0.0 }
        });
        volume[[3, 1, 2]] = f32::NAN;
        remove_stripe_ti(&mut volume, 3, 1.5, &DistributeOptions::default()).unwrap();
        assert_eq!(volume.dim(), (13, 2, 9));
        assert!(volume.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_negative_alpha_is_rejected() {
        let mut volume = Array3::<f32>::ones((2, 2, 4));
        assert!(matches!(
            remove_stripe_ti(&mut volume, 0, -1.0, &DistributeOptions::default()),
            Err(CorrectionError::InvalidParameter { name: "alpha", .. })
        ));
    }

    #[test]
    fn test_result_does_not_depend_on_chunking() {
        let mut a = Array3::from_shape_fn((10, 6, 12), |(p, r, c)| {
            2.0 + 0.3 * p as f32 + ((r * 5 + c * 3) % 7) as f32 * 0.1
        });
        let mut b = a.clone();
        remove_stripe_ti(&mut a, 2, 1.5, &DistributeOptions::sequential()).unwrap();
        TitarenkoStripes { nblock: 2, alpha: 1.5 }
            .apply(&mut b, &DistributeOptions::default().with_ncore(4).with_nchunk(1))
            .unwrap();
        assert_eq!(a, b);
    }
}
