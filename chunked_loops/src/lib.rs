//! # chunked_loops
//!
//! A small utility crate for running a job over contiguous index ranges, either sequentially
//! or in parallel on a dedicated Rayon thread pool.
//!
//! The crate provides two things:
//!
//! - [`partition`] splits an axis of length `N` into half-open ranges that cover `[0, N)`
//!   exactly, following a requested worker count and/or chunk size.
//! - [`for_each_chunk`] and [`par_for_each_chunk`] run a fallible function once per range.
//!   Every range is processed even if a sibling fails; the failure of the lowest range is
//!   reported together with that range. Panics inside the function are caught and reported
//!   the same way.
//!
//! ## Example
//!
//! ```
//! use chunked_loops::{par_for_each_chunk, partition};
//!
//! let mut data = vec![0u32; 10];
//! let ranges = partition(data.len(), Some(3), None);
//! assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
//!
//! // hand every worker its own disjoint slice
//! let mut chunks = Vec::new();
//! let mut rest = data.as_mut_slice();
//! for range in &ranges {
//!     let (head, tail) = rest.split_at_mut(range.len());
//!     chunks.push((range.clone(), head));
//!     rest = tail;
//! }
//!
//! par_for_each_chunk(chunks, 3, |range, slice: &mut [u32]| {
//!     for (value, index) in slice.iter_mut().zip(range) {
//!         *value = index as u32 * 2;
//!     }
//!     Ok::<(), std::fmt::Error>(())
//! })
//! .unwrap();
//!
//! assert_eq!(data[9], 18);
//! ```

use rayon::prelude::*;
use std::any::Any;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Failure of a chunked loop.
#[derive(Debug, Error)]
pub enum ChunkError<E> {
    /// The job returned an error for the given range.
    #[error("job failed on range {range:?}: {source}")]
    Failed {
        range: Range<usize>,
        #[source]
        source: E,
    },
    /// The job panicked while processing the given range.
    #[error("job panicked on range {range:?}: {message}")]
    Panicked { range: Range<usize>, message: String },
    /// The worker pool could not be created.
    #[error("could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl<E> ChunkError<E> {
    /// The range the failure originated from, if any.
    pub fn range(&self) -> Option<&Range<usize>> {
        match self {
            ChunkError::Failed { range, .. } | ChunkError::Panicked { range, .. } => Some(range),
            ChunkError::ThreadPool(_) => None,
        }
    }
}

/// Number of workers used when the caller does not ask for a specific count.
pub fn default_core_count() -> usize {
    num_cpus::get().max(1)
}

/// Splits `0..extent` into contiguous, non-overlapping ranges.
///
/// * `ncore` - requested number of workers, defaults to [`default_core_count`].
/// * `nchunk` - requested range length. When omitted, the extent is divided evenly among the
///   workers and the remainder is handed to the first ranges, one extra index each.
///
/// Zero or oversized requests are clamped to `1..=extent`, so no range is ever empty or out
/// of bounds. An empty axis yields no ranges.
///
/// # Examples
///
/// ```
/// use chunked_loops::partition;
///
/// assert_eq!(partition(7, Some(2), None), vec![0..4, 4..7]);
/// assert_eq!(partition(7, Some(2), Some(3)), vec![0..3, 3..6, 6..7]);
/// assert_eq!(partition(3, Some(0), Some(100)), vec![0..3]);
/// assert!(partition(0, None, None).is_empty());
/// ```
pub fn partition(extent: usize, ncore: Option<usize>, nchunk: Option<usize>) -> Vec<Range<usize>> {
    if extent == 0 {
        return Vec::new();
    }

    let ncore = ncore.unwrap_or_else(default_core_count).clamp(1, extent);

    match nchunk {
        Some(size) => {
            let size = size.clamp(1, extent);
            (0..extent)
                .step_by(size)
                .map(|start| start..(start + size).min(extent))
                .collect()
        }
        None => {
            let base = extent / ncore;
            let remainder = extent % ncore;
            let mut ranges = Vec::with_capacity(ncore);
            let mut start = 0;
            for i in 0..ncore {
                let len = base + usize::from(i < remainder);
                ranges.push(start..start + len);
                start += len;
            }
            ranges
        }
    }
}

/// Turns a panic payload into a readable message.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs one job and converts both errors and panics into a [`ChunkError`].
fn run_guarded<T, E, F>(range: Range<usize>, item: T, func: &F) -> Result<(), ChunkError<E>>
where
    F: Fn(Range<usize>, T) -> Result<(), E>,
{
    match catch_unwind(AssertUnwindSafe(|| func(range.clone(), item))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(ChunkError::Failed { range, source }),
        Err(payload) => Err(ChunkError::Panicked {
            range,
            message: panic_message(payload),
        }),
    }
}

/// Picks the failure with the lowest range start so the reported error does not depend on
/// scheduling.
fn first_failure<E>(results: Vec<Result<(), ChunkError<E>>>) -> Result<(), ChunkError<E>> {
    let mut failures: Vec<ChunkError<E>> = results.into_iter().filter_map(Result::err).collect();
    if failures.is_empty() {
        return Ok(());
    }
    if failures.len() > 1 {
        log::warn!("{} ranges failed, reporting the first one", failures.len());
    }
    failures.sort_by_key(|e| e.range().map(|r| r.start).unwrap_or(0));
    Err(failures.remove(0))
}

/// Executes a job sequentially for every `(range, item)` pair.
///
/// All ranges are processed even if one of them fails.
///
/// # Examples
///
/// ```
/// use chunked_loops::{for_each_chunk, ChunkError};
///
/// let chunks = vec![(0..2, 1), (2..4, -1), (4..5, 3)];
/// let result = for_each_chunk(chunks, |_, value: i32| {
///     if value < 0 {
///         Err("negative")
///     } else {
///         Ok(())
///     }
/// });
///
/// match result {
///     Err(ChunkError::Failed { range, .. }) => assert_eq!(range, 2..4),
///     _ => panic!("expected a failure"),
/// }
/// ```
pub fn for_each_chunk<T, E, F>(chunks: Vec<(Range<usize>, T)>, func: F) -> Result<(), ChunkError<E>>
where
    F: Fn(Range<usize>, T) -> Result<(), E>,
{
    let results = chunks
        .into_iter()
        .map(|(range, item)| run_guarded(range, item, &func))
        .collect();
    first_failure(results)
}

/// Executes a job in parallel for every `(range, item)` pair on a pool of `ncore` threads.
///
/// With a single worker or a single chunk this falls back to [`for_each_chunk`], so no pool
/// is spun up for trivial work. Sibling jobs are never interrupted by a failing job.
pub fn par_for_each_chunk<T, E, F>(
    chunks: Vec<(Range<usize>, T)>,
    ncore: usize,
    func: F,
) -> Result<(), ChunkError<E>>
where
    T: Send,
    E: Send,
    F: Fn(Range<usize>, T) -> Result<(), E> + Sync + Send,
{
    let ncore = ncore.max(1).min(chunks.len().max(1));
    if ncore == 1 || chunks.len() <= 1 {
        return for_each_chunk(chunks, func);
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(ncore).build()?;
    log::debug!("dispatching {} chunks on {} workers", chunks.len(), ncore);

    let results = pool.install(|| {
        chunks
            .into_par_iter()
            .map(|(range, item)| run_guarded(range, item, &func))
            .collect::<Vec<_>>()
    });
    first_failure(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assert_partition(extent: usize, ranges: &[Range<usize>]) {
        let mut next = 0;
        for range in ranges {
            assert_eq!(range.start, next, "gap or overlap in {ranges:?}");
            assert!(range.end > range.start, "empty range in {ranges:?}");
            next = range.end;
        }
        assert_eq!(next, extent);
    }

    #[test]
    fn test_partition_covers_axis_for_any_request() {
        for extent in 1..40 {
            for ncore in [None, Some(0), Some(1), Some(3), Some(7), Some(64)] {
                for nchunk in [None, Some(0), Some(1), Some(2), Some(5), Some(1000)] {
                    let ranges = partition(extent, ncore, nchunk);
                    assert_partition(extent, &ranges);
                }
            }
        }
    }

    #[test]
    fn test_partition_default_sizes_differ_by_at_most_one() {
        let ranges = partition(10, Some(4), None);
        assert_eq!(ranges, vec![0..3, 3..6, 6..8, 8..10]);
        let lengths: Vec<usize> = partition(101, Some(8), None).iter().map(|r| r.len()).collect();
        let min = *lengths.iter().min().unwrap();
        let max = *lengths.iter().max().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_partition_more_workers_than_indices() {
        assert_eq!(partition(3, Some(16), None), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_par_for_each_chunk_visits_every_range_once() {
        let visited = AtomicUsize::new(0);
        let chunks: Vec<(Range<usize>, ())> =
            partition(50, Some(4), Some(3)).into_iter().map(|r| (r, ())).collect();
        par_for_each_chunk(chunks, 4, |range, _| {
            visited.fetch_add(range.len(), Ordering::Relaxed);
            Ok::<(), String>(())
        })
        .unwrap();
        assert_eq!(visited.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn test_par_for_each_chunk_reports_lowest_failing_range() {
        let completed = AtomicUsize::new(0);
        let chunks: Vec<(Range<usize>, ())> =
            partition(12, Some(4), None).into_iter().map(|r| (r, ())).collect();
        let result = par_for_each_chunk(chunks, 4, |range, _| {
            if range.start >= 6 {
                return Err(format!("bad range {range:?}"));
            }
            completed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        match result {
            Err(ChunkError::Failed { range, source }) => {
                assert_eq!(range, 6..9);
                assert!(source.contains("6..9"));
            }
            other => panic!("unexpected result {other:?}"),
        }
        // the two healthy ranges still ran
        assert_eq!(completed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_panics_are_reported_with_their_range() {
        let chunks = vec![(0..1, 0), (1..2, 1)];
        let result = par_for_each_chunk(chunks, 2, |_, value: i32| {
            if value == 1 {
                panic!("boom");
            }
            Ok::<(), String>(())
        });
        match result {
            Err(ChunkError::Panicked { range, message }) => {
                assert_eq!(range, 1..2);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
