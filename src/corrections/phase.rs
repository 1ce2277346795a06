use crate::config::DistributeOptions;
use crate::corrections::correction::{Correction, CorrectionAxis, CorrectionConfig};
use crate::distribute::distribute;
use crate::error::{CorrectionError, Result};
use crate::math_tools::{fft2, fft_frequencies};
use correction_macros::register_correction;
use ndarray::{s, Array2, Array3, ArrayViewMut2, Axis, Zip};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Reduced Planck constant in keV·s.
const PLANCK_CONSTANT: f64 = 6.58211928e-19;

/// Speed of light in cm/s.
const SPEED_OF_LIGHT: f64 = 299792458e2;

/// Wavelength in cm of a photon with the given energy in keV.
pub fn wavelength(energy: f64) -> f64 {
    2.0 * PI * PLANCK_CONSTANT * SPEED_OF_LIGHT / energy
}

#[register_correction]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseRetrieval {
    /// Detector pixel size in cm.
    pub psize: f32,
    /// Propagation distance in cm.
    pub dist: f32,
    /// Photon energy in keV.
    pub energy: f32,
    /// Regularization parameter.
    pub alpha: f32,
    /// Embed projections into a larger power-of-two frame before filtering.
    pub pad: bool,
}

impl Default for PhaseRetrieval {
    fn default() -> Self {
        PhaseRetrieval {
            psize: 1e-4,
            dist: 50.0,
            energy: 20.0,
            alpha: 1e-3,
            pad: true,
        }
    }
}

impl Correction for PhaseRetrieval {
    fn new() -> Self
    where
        Self: Sized,
    {
        PhaseRetrieval::default()
    }

    fn config(&self) -> CorrectionConfig {
        CorrectionConfig {
            name: "Phase Retrieval".to_string(),
            description: "Single-distance phase retrieval with the Paganin low-pass filter."
                .to_string(),
            hyperlink: Some((
                Some("Paganin et al. 2002".to_string()),
                "https://doi.org/10.1046/j.1365-2818.2002.01010.x".to_string(),
            )),
            axis: CorrectionAxis::Projection,
        }
    }

    fn apply(&self, volume: &mut Array3<f32>, options: &DistributeOptions) -> Result<()> {
        retrieve_phase(volume, self, options)
    }
}

/// Precomputed Paganin transfer function for one detector size, together with the FFT plans
/// for its padded frame. Shared read-only by all workers.
pub struct PaganinFilter {
    filter: Array2<f32>,
    max: f32,
    detector: (usize, usize),
    offset: (usize, usize),
    forward_rows: Arc<dyn Fft<f32>>,
    forward_cols: Arc<dyn Fft<f32>>,
    inverse_rows: Arc<dyn Fft<f32>>,
    inverse_cols: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for PaganinFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaganinFilter")
            .field("detector", &self.detector)
            .field("frame", &self.filter.dim())
            .field("offset", &self.offset)
            .field("max", &self.max)
            .finish()
    }
}

fn check_positive(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CorrectionError::invalid(
            name,
            format!("must be positive, got {value}"),
        ))
    }
}

impl PaganinFilter {
    /// Builds the filter for projections of `rows x cols` pixels.
    pub fn new(rows: usize, cols: usize, params: &PhaseRetrieval) -> Result<Self> {
        check_positive("psize", params.psize)?;
        check_positive("energy", params.energy)?;
        check_positive("alpha", params.alpha)?;
        if !(params.dist.is_finite() && params.dist >= 0.0) {
            return Err(CorrectionError::invalid(
                "dist",
                format!("must be non-negative, got {}", params.dist),
            ));
        }

        let psize = params.psize as f64;
        let dist = params.dist as f64;
        let alpha = params.alpha as f64;
        let lambda = wavelength(params.energy as f64);

        let (frame_rows, frame_cols) = if params.pad {
            let pad = (PI * lambda * dist / (psize * psize)).ceil() as usize;
            (
                (rows + pad).next_power_of_two(),
                (cols + pad).next_power_of_two(),
            )
        } else {
            (rows, cols)
        };

        let v = fft_frequencies(frame_rows, psize);
        let u = fft_frequencies(frame_cols, psize);
        let filter = Array2::from_shape_fn((frame_rows, frame_cols), |(r, c)| {
            let w2 = u[c] * u[c] + v[r] * v[r];
            (1.0 / (lambda * dist * w2 / (4.0 * PI) + alpha)) as f32
        });
        let max = filter.iter().copied().fold(f32::MIN, f32::max);

        let mut planner = FftPlanner::<f32>::new();
        Ok(PaganinFilter {
            max,
            detector: (rows, cols),
            offset: ((frame_rows - rows) / 2, (frame_cols - cols) / 2),
            forward_rows: planner.plan_fft_forward(frame_cols),
            forward_cols: planner.plan_fft_forward(frame_rows),
            inverse_rows: planner.plan_fft_inverse(frame_cols),
            inverse_cols: planner.plan_fft_inverse(frame_rows),
            filter,
        })
    }

    /// The transfer function in FFT order.
    pub fn transfer_function(&self) -> &Array2<f32> {
        &self.filter
    }

    /// Size of the frame the projections are embedded into.
    pub fn frame_shape(&self) -> (usize, usize) {
        self.filter.dim()
    }

    /// Filters one projection in place. Pixels of the frame outside the projection are set to
    /// `pad_value`.
    pub fn apply(&self, mut projection: ArrayViewMut2<f32>, pad_value: f32) -> Result<()> {
        if projection.dim() != self.detector {
            return Err(CorrectionError::ShapeMismatch {
                what: "projection",
                expected: vec![self.detector.0, self.detector.1],
                found: projection.shape().to_vec(),
            });
        }
        let (rows, cols) = self.detector;
        let (r0, c0) = self.offset;
        let window = s![r0..r0 + rows, c0..c0 + cols];

        let mut frame = Array2::from_elem(self.filter.dim(), Complex32::new(pad_value, 0.0));
        frame
            .slice_mut(window)
            .zip_mut_with(&projection, |f, &v| *f = Complex32::new(v, 0.0));

        fft2(&mut frame, &self.forward_rows, &self.forward_cols);
        Zip::from(&mut frame)
            .and(&self.filter)
            .for_each(|f, &h| *f *= h);
        fft2(&mut frame, &self.inverse_rows, &self.inverse_cols);

        let scale = 1.0 / (frame.len() as f32 * self.max);
        projection.zip_mut_with(&frame.slice(window), |v, f| *v = f.re * scale);
        Ok(())
    }
}

/// Mean over all projections of the average of the first and last detector columns.
fn edge_mean(volume: &Array3<f32>) -> f32 {
    let cols = volume.len_of(Axis(2));
    let first = volume.index_axis(Axis(2), 0);
    let last = volume.index_axis(Axis(2), cols - 1);
    let sum: f64 = first
        .iter()
        .zip(last.iter())
        .map(|(&a, &b)| (a as f64 + b as f64) / 2.0)
        .sum();
    (sum / first.len() as f64) as f32
}

/// Single-step phase retrieval of phase-contrast projections.
///
/// Every projection is low-pass filtered with the Paganin transfer function
/// `H = 1 / (lambda * dist * |k|^2 / (4 pi) + alpha)` and rescaled by `1 / max(H)`. With
/// `pad`, projections are embedded centered into a power-of-two frame large enough for the
/// Fresnel fringes, filled with the mean intensity of the outermost detector columns.
pub fn retrieve_phase(
    volume: &mut Array3<f32>,
    params: &PhaseRetrieval,
    options: &DistributeOptions,
) -> Result<()> {
    let (n, rows, cols) = volume.dim();
    if n == 0 || rows == 0 || cols == 0 {
        return Ok(());
    }
    let filter = PaganinFilter::new(rows, cols, params)?;
    let pad_value = if params.pad { edge_mean(volume) } else { 0.0 };
    log::debug!("phase retrieval with {filter:?}, pad value {pad_value}");

    let start = Instant::now();
    distribute(volume, Axis(0), options, |mut chunk, _| {
        for projection in chunk.axis_iter_mut(Axis(0)) {
            filter.apply(projection, pad_value)?;
        }
        Ok(())
    })?;
    log::info!("phase retrieval of {n} projections took {:?}", start.elapsed());
    Ok(())
}
