//! Numerical helpers shared by the corrections: boundary reflection, median filtering,
//! 2D Fourier transforms and FFT frequency grids.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use num_complex::Complex32;
use rustfft::Fft;
use std::sync::Arc;

/// Maps any (possibly out-of-range) index onto `0..len` by half-sample symmetric reflection
/// (`d c b a | a b c d | d c b a`).
///
/// This is the boundary rule of both the median filter and the wavelet transform. Indices
/// further away than one period keep reflecting, so short signals work with long filters.
#[inline]
pub fn reflect_index(idx: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let m = idx.rem_euclid(period);
    if m < len as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Median of an odd-length buffer. The buffer is reordered.
fn median_odd(values: &mut [f32]) -> f32 {
    let mid = values.len() / 2;
    let (_, median, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *median
}

/// Square `size x size` median filter with reflected boundaries.
///
/// # Arguments
/// - `image`: The 2D input.
/// - `size`: Window width, expected to be odd.
///
/// # Returns
/// The filtered image, same shape as the input.
pub fn median_filter_2d(image: ArrayView2<f32>, size: usize) -> Array2<f32> {
    let (rows, cols) = image.dim();
    let radius = (size / 2) as isize;
    let mut window = Vec::with_capacity(size * size);

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        window.clear();
        for dr in -radius..=radius {
            let rr = reflect_index(r as isize + dr, rows);
            for dc in -radius..=radius {
                let cc = reflect_index(c as isize + dc, cols);
                window.push(image[[rr, cc]]);
            }
        }
        median_odd(&mut window)
    })
}

/// Applies `fft` to every lane of `data` along `axis`, in place.
///
/// The transform is unnormalized, as with `rustfft` itself.
pub fn fft_along_axis(data: &mut Array2<Complex32>, axis: Axis, fft: &Arc<dyn Fft<f32>>) {
    let mut buffer = vec![Complex32::new(0.0, 0.0); data.len_of(axis)];
    let mut scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];
    for mut lane in data.lanes_mut(axis) {
        buffer
            .iter_mut()
            .zip(lane.iter())
            .for_each(|(b, v)| *b = *v);
        fft.process_with_scratch(&mut buffer, &mut scratch);
        lane.iter_mut().zip(buffer.iter()).for_each(|(v, b)| *v = *b);
    }
}

/// 2D transform: `row_fft` along axis 1 (length = columns), then `col_fft` along axis 0.
///
/// Pass forward plans for a forward transform and inverse plans for an inverse transform; the
/// inverse is not scaled.
pub fn fft2(
    data: &mut Array2<Complex32>,
    row_fft: &Arc<dyn Fft<f32>>,
    col_fft: &Arc<dyn Fft<f32>>,
) {
    fft_along_axis(data, Axis(1), row_fft);
    fft_along_axis(data, Axis(0), col_fft);
}

/// Sample frequencies of an `n`-point FFT with sample spacing `d`, in FFT order
/// (`0, 1, ..., n/2 - 1, -n/2, ..., -1` divided by `n * d`).
pub fn fft_frequencies(n: usize, d: f64) -> Array1<f64> {
    let scale = 1.0 / (n as f64 * d);
    Array1::from_shape_fn(n, |k| {
        let k = if k < n.div_ceil(2) {
            k as isize
        } else {
            k as isize - n as isize
        };
        k as f64 * scale
    })
}
