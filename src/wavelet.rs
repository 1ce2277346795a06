//! Discrete wavelet transform primitive.
//!
//! Orthogonal wavelets are described by their reconstruction low-pass filter; the other three
//! filters of the bank follow from it by the quadrature-mirror relations. Signals are extended
//! with half-sample symmetry at the borders, so one decomposition level of an `n`-sample
//! signal with a filter of length `f` produces `(n + f - 1) / 2` coefficients and the inverse
//! produces `2 * m - f + 2` samples from `m` coefficients.

use crate::error::{CorrectionError, Result};
use crate::math_tools::reflect_index;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

const HAAR: [f64; 2] = [std::f64::consts::FRAC_1_SQRT_2, std::f64::consts::FRAC_1_SQRT_2];

const DB2: [f64; 4] = [
    0.48296291314469025,
    0.8365163037378079,
    0.22414386804185735,
    -0.12940952255092145,
];

const DB3: [f64; 6] = [
    0.3326705529509569,
    0.8068915093133388,
    0.4598775021193313,
    -0.13501102001039084,
    -0.08544127388224149,
    0.035226291882100656,
];

const DB4: [f64; 8] = [
    0.23037781330885523,
    0.7148465705525415,
    0.6308807679295904,
    -0.02798376941698385,
    -0.18703481171888114,
    0.030841381835986965,
    0.032883011666982945,
    -0.010597401784997278,
];

const DB5: [f64; 10] = [
    0.160102397974125,
    0.6038292697974729,
    0.7243085284385744,
    0.13842814590110342,
    -0.24229488706619015,
    -0.03224486958502952,
    0.07757149384006515,
    -0.006241490213011705,
    -0.012580751999015526,
    0.003335725285001549,
];

/// An orthogonal wavelet filter bank.
#[derive(Debug, Clone, PartialEq)]
pub struct Wavelet {
    name: String,
    dec_lo: Vec<f64>,
    dec_hi: Vec<f64>,
    rec_lo: Vec<f64>,
    rec_hi: Vec<f64>,
}

/// Detail coefficients of one 2D decomposition level.
///
/// `horizontal` is high-pass along axis 0, `vertical` is high-pass along axis 1 and
/// `diagonal` is high-pass along both.
#[derive(Debug, Clone)]
pub struct SubBands {
    pub horizontal: Array2<f64>,
    pub vertical: Array2<f64>,
    pub diagonal: Array2<f64>,
}

impl Wavelet {
    /// Looks up a wavelet by name: `haar`, `db1` ... `db5`.
    pub fn from_name(name: &str) -> Result<Self> {
        let rec_lo: &[f64] = match name.to_ascii_lowercase().as_str() {
            "haar" | "db1" => &HAAR,
            "db2" => &DB2,
            "db3" => &DB3,
            "db4" => &DB4,
            "db5" => &DB5,
            _ => return Err(CorrectionError::UnknownWavelet(name.to_string())),
        };
        Ok(Self::from_reconstruction_low_pass(name, rec_lo))
    }

    fn from_reconstruction_low_pass(name: &str, rec_lo: &[f64]) -> Self {
        let n = rec_lo.len();
        let rec_hi: Vec<f64> = (0..n)
            .map(|k| {
                let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                sign * rec_lo[n - 1 - k]
            })
            .collect();
        let dec_lo: Vec<f64> = rec_lo.iter().rev().copied().collect();
        let dec_hi: Vec<f64> = rec_hi.iter().rev().copied().collect();
        Wavelet {
            name: name.to_string(),
            dec_lo,
            dec_hi,
            rec_lo: rec_lo.to_vec(),
            rec_hi,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter_len(&self) -> usize {
        self.rec_lo.len()
    }

    /// Number of coefficients one decomposition level produces from `n` samples.
    pub fn coefficient_len(&self, n: usize) -> usize {
        (n + self.filter_len() - 1) / 2
    }

    /// Single-level 1D decomposition into (approximation, detail).
    pub fn dwt(&self, signal: ArrayView1<f64>) -> (Array1<f64>, Array1<f64>) {
        let n = signal.len();
        let m = self.coefficient_len(n);
        let mut approx = Array1::zeros(m);
        let mut detail = Array1::zeros(m);
        for o in 0..m {
            let center = 2 * o as isize + 1;
            let (mut a, mut d) = (0.0, 0.0);
            for (j, (lo, hi)) in self.dec_lo.iter().zip(&self.dec_hi).enumerate() {
                let x = signal[reflect_index(center - j as isize, n)];
                a += lo * x;
                d += hi * x;
            }
            approx[o] = a;
            detail[o] = d;
        }
        (approx, detail)
    }

    /// Single-level 1D reconstruction from coefficients of equal length.
    pub fn idwt(&self, approx: ArrayView1<f64>, detail: ArrayView1<f64>) -> Array1<f64> {
        let m = approx.len();
        let f = self.filter_len();
        let out_len = (2 * m + 2).saturating_sub(f);
        let offset = f - 2;
        Array1::from_shape_fn(out_len, |i| {
            // upsampled input has the coefficient k at position 2k
            let pos = i + offset;
            let mut acc = 0.0;
            for j in (pos % 2..f.min(pos + 1)).step_by(2) {
                let k = (pos - j) / 2;
                if k < m {
                    acc += self.rec_lo[j] * approx[k] + self.rec_hi[j] * detail[k];
                }
            }
            acc
        })
    }

    /// Applies `dwt` to every lane along `axis`.
    fn dwt_axis(&self, data: ArrayView2<f64>, axis: Axis) -> (Array2<f64>, Array2<f64>) {
        let mut shape = [data.nrows(), data.ncols()];
        shape[axis.index()] = self.coefficient_len(data.len_of(axis));
        let mut approx = Array2::zeros(shape);
        let mut detail = Array2::zeros(shape);
        for ((lane, mut a), mut d) in data
            .lanes(axis)
            .into_iter()
            .zip(approx.lanes_mut(axis))
            .zip(detail.lanes_mut(axis))
        {
            let (la, ld) = self.dwt(lane);
            a.assign(&la);
            d.assign(&ld);
        }
        (approx, detail)
    }

    /// Applies `idwt` to every pair of lanes along `axis`.
    fn idwt_axis(&self, approx: ArrayView2<f64>, detail: ArrayView2<f64>, axis: Axis) -> Array2<f64> {
        let m = approx.len_of(axis);
        let mut shape = [approx.nrows(), approx.ncols()];
        shape[axis.index()] = (2 * m + 2).saturating_sub(self.filter_len());
        let mut out = Array2::zeros(shape);
        for ((a, d), mut o) in approx
            .lanes(axis)
            .into_iter()
            .zip(detail.lanes(axis))
            .zip(out.lanes_mut(axis))
        {
            o.assign(&self.idwt(a, d));
        }
        out
    }

    /// Single-level 2D decomposition. Returns the approximation and the three detail bands.
    pub fn dwt2(&self, data: ArrayView2<f64>) -> (Array2<f64>, SubBands) {
        let (lo0, hi0) = self.dwt_axis(data, Axis(0));
        let (approx, vertical) = self.dwt_axis(lo0.view(), Axis(1));
        let (horizontal, diagonal) = self.dwt_axis(hi0.view(), Axis(1));
        (
            approx,
            SubBands {
                horizontal,
                vertical,
                diagonal,
            },
        )
    }

    /// Single-level 2D reconstruction. All four inputs must have the same shape.
    pub fn idwt2(&self, approx: ArrayView2<f64>, bands: &SubBands) -> Result<Array2<f64>> {
        let shape = approx.shape();
        for (what, band) in [
            ("horizontal detail", &bands.horizontal),
            ("vertical detail", &bands.vertical),
            ("diagonal detail", &bands.diagonal),
        ] {
            if band.shape() != shape {
                return Err(CorrectionError::ShapeMismatch {
                    what,
                    expected: shape.to_vec(),
                    found: band.shape().to_vec(),
                });
            }
        }
        let lo0 = self.idwt_axis(approx, bands.vertical.view(), Axis(1));
        let hi0 = self.idwt_axis(bands.horizontal.view(), bands.diagonal.view(), Axis(1));
        Ok(self.idwt_axis(lo0.view(), hi0.view(), Axis(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_filter_banks_are_orthonormal() {
        for name in ["haar", "db2", "db3", "db4", "db5"] {
            let w = Wavelet::from_name(name).unwrap();
            let sum: f64 = w.rec_lo.iter().sum();
            assert_abs_diff_eq!(sum, std::f64::consts::SQRT_2, epsilon = 1e-9);
            let f = w.filter_len();
            // orthogonal to its own even shifts
            for shift in (0..f).step_by(2) {
                let dot: f64 = (0..f - shift).map(|k| w.rec_lo[k] * w.rec_lo[k + shift]).sum();
                let expected = if shift == 0 { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(dot, expected, epsilon = 1e-9);
            }
            let hi_sum: f64 = w.rec_hi.iter().sum();
            assert_abs_diff_eq!(hi_sum, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_unknown_wavelet() {
        assert!(matches!(
            Wavelet::from_name("coif99"),
            Err(CorrectionError::UnknownWavelet(name)) if name == "coif99"
        ));
    }

    #[test]
    fn test_haar_coefficients() {
        let w = Wavelet::from_name("haar").unwrap();
        let signal = Array1::from(vec![1.0, 2.0, 3.0, 5.0]);
        let (a, d) = w.dwt(signal.view());
        let s = std::f64::consts::FRAC_1_SQRT_2;
        assert_abs_diff_eq!(a, Array1::from(vec![3.0 * s, 8.0 * s]), epsilon = 1e-12);
        assert_abs_diff_eq!(d, Array1::from(vec![-s, -2.0 * s]), epsilon = 1e-12);
    }

    #[test]
    fn test_perfect_reconstruction_1d() {
        let signal = Array1::from_shape_fn(21, |i| ((i * 7) % 5) as f64 + 0.1 * i as f64);
        for name in ["haar", "db2", "db5"] {
            let w = Wavelet::from_name(name).unwrap();
            let (a, d) = w.dwt(signal.view());
            assert_eq!(a.len(), w.coefficient_len(21));
            let rec = w.idwt(a.view(), d.view());
            assert_abs_diff_eq!(
                rec.slice(ndarray::s![..21]),
                signal.view(),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_perfect_reconstruction_2d() {
        let data = Array2::from_shape_fn((12, 9), |(r, c)| ((r * 3 + c * 5) % 7) as f64 - 2.0);
        let w = Wavelet::from_name("db3").unwrap();
        let (approx, bands) = w.dwt2(data.view());
        assert_eq!(approx.dim(), (8, 7));
        assert_eq!(bands.vertical.dim(), (8, 7));
        let rec = w.idwt2(approx.view(), &bands).unwrap();
        assert_abs_diff_eq!(
            rec.slice(ndarray::s![..12, ..9]),
            data.view(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_idwt2_rejects_mismatched_bands() {
        let w = Wavelet::from_name("haar").unwrap();
        let (approx, mut bands) = w.dwt2(Array2::<f64>::ones((4, 4)).view());
        bands.diagonal = Array2::zeros((1, 1));
        assert!(matches!(
            w.idwt2(approx.view(), &bands),
            Err(CorrectionError::ShapeMismatch { .. })
        ));
    }
}
