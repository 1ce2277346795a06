//! Error type shared by all corrections.

use chunked_loops::ChunkError;
use std::ops::Range;
use thiserror::Error;

/// Errors raised by the corrections and the chunk distributor.
///
/// Shape and parameter problems are reported before any work is dispatched. Numerical
/// degeneracies (zero denominators, non-converging solvers) are handled in place and never
/// show up here.
#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("expected a {expected}D array, got {found}D")]
    InvalidRank { expected: usize, found: usize },

    #[error("shape mismatch for {what}: expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("invalid value for `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("unknown wavelet `{0}`")]
    UnknownWavelet(String),

    #[error("correction failed on range {range:?}")]
    Worker {
        range: Range<usize>,
        #[source]
        source: Box<CorrectionError>,
    },

    #[error("correction panicked on range {range:?}: {message}")]
    WorkerPanicked { range: Range<usize>, message: String },

    #[error("fourier transform failed: {0}")]
    Fft(#[from] realfft::FftError),

    #[error("could not start workers: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl CorrectionError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        CorrectionError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

impl From<ChunkError<CorrectionError>> for CorrectionError {
    fn from(err: ChunkError<CorrectionError>) -> Self {
        match err {
            ChunkError::Failed { range, source } => CorrectionError::Worker {
                range,
                source: Box::new(source),
            },
            ChunkError::Panicked { range, message } => {
                CorrectionError::WorkerPanicked { range, message }
            }
            ChunkError::ThreadPool(e) => CorrectionError::ThreadPool(e),
        }
    }
}

pub type Result<T, E = CorrectionError> = std::result::Result<T, E>;
