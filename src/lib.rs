//! Pre-processing corrections for tomographic projection data.
//!
//! Volumes are `ndarray::Array3<f32>` indexed (projection, row, column). The corrections in
//! [`corrections`] remove detector and beamline artifacts in place: air-intensity drift,
//! stripes that turn into ring artifacts, zingers, and the phase contrast of propagation-based
//! imaging. Every correction is split into contiguous ranges of its natural processing axis
//! and run in parallel by the chunk distributor in [`distribute`].
//!
//! ```ignore
//! use tomo_prep::config::DistributeOptions;
//! use tomo_prep::corrections::{normalize::normalize, zinger::remove_zinger};
//!
//! let options = DistributeOptions::default();
//! normalize(&mut volume, &flat, &dark, None, &options)?;
//! remove_zinger(&mut volume, 1000.0, 3, &options)?;
//! ```

pub mod config;
pub mod corrections;
pub mod distribute;
pub mod error;
pub mod math_tools;
pub mod pipeline;
pub mod sim;
pub mod wavelet;

pub use config::{CorrectionStep, DistributeOptions, PipelineConfig};
pub use corrections::correction::{Correction, CorrectionRegistry};
pub use distribute::{as_volume, distribute};
pub use error::{CorrectionError, Result};
pub use pipeline::Pipeline;
