//! Chunk distributor: runs a correction over contiguous ranges of a volume axis.
//!
//! The volume is split with `split_at` into disjoint mutable views, one per range, and every
//! view is handed to the worker together with the global index range it covers. Workers can
//! therefore only touch their own part of the volume, and the result does not depend on the
//! number of workers or the chunk size.

use crate::config::DistributeOptions;
use crate::error::{CorrectionError, Result};
use chunked_loops::{default_core_count, par_for_each_chunk, partition};
use ndarray::{Array3, ArrayD, ArrayViewMut3, Axis, Ix3};
use std::ops::Range;
use std::time::Instant;

/// Converts a dynamic-rank array into a volume, rejecting anything that is not 3D.
pub fn as_volume(array: ArrayD<f32>) -> Result<Array3<f32>> {
    let found = array.ndim();
    array
        .into_dimensionality::<Ix3>()
        .map_err(|_| CorrectionError::InvalidRank { expected: 3, found })
}

/// Index ranges the distributor would use for an axis of length `extent`.
pub fn chunk_ranges(extent: usize, options: &DistributeOptions) -> Vec<Range<usize>> {
    partition(extent, options.ncore, options.nchunk)
}

/// Applies `func` once per range of `axis`, in parallel.
///
/// `func` receives the mutable view of its range (indexed from 0 along `axis`) and the global
/// range. The volume is modified in place. If any worker fails or panics, the error of the
/// lowest failing range is returned; the other ranges keep their results.
pub fn distribute<F>(
    volume: &mut Array3<f32>,
    axis: Axis,
    options: &DistributeOptions,
    func: F,
) -> Result<()>
where
    F: Fn(ArrayViewMut3<'_, f32>, Range<usize>) -> Result<()> + Sync + Send,
{
    if axis.index() >= 3 {
        return Err(CorrectionError::invalid(
            "axis",
            format!("volume has 3 axes, got axis {}", axis.index()),
        ));
    }

    let extent = volume.len_of(axis);
    let ranges = chunk_ranges(extent, options);
    let ncore = options
        .ncore
        .unwrap_or_else(default_core_count)
        .clamp(1, extent.max(1));

    let mut chunks = Vec::with_capacity(ranges.len());
    let mut rest = volume.view_mut();
    for range in ranges {
        let (head, tail) = rest.split_at(axis, range.len());
        chunks.push((range, head));
        rest = tail;
    }

    let start = Instant::now();
    let n_chunks = chunks.len();
    par_for_each_chunk(chunks, ncore, |range, chunk| func(chunk, range))?;
    log::debug!(
        "distributed {} ranges over axis {} on {} workers in {:?}",
        n_chunks,
        axis.index(),
        ncore,
        start.elapsed()
    );
    Ok(())
}
