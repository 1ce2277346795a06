//! Artifact corrections for tomographic projection data.
//!
//! Every correction works on a volume indexed (projection, row, column) and modifies it in
//! place. Corrections that act on one projection image at a time are distributed along axis 0,
//! corrections that act on one sinogram at a time along axis 1.
//!
//! # Correction Implementations
//!
//! Each configurable correction implements the `Correction` trait defined in the `correction`
//! module and registers itself in the global registry. Corrections that need extra inputs
//! (reference fields) are plain functions.

/// Air-region normalization of detector rows.
pub mod air;

/// Core correction interfaces and the correction registry.
pub mod correction;

/// Flat/dark-field normalization.
pub mod normalize;

/// Paganin single-distance phase retrieval.
pub mod phase;

/// Circular region-of-interest masking and focus-region trimming.
pub mod roi;

/// Stripe removal by combined wavelet and Fourier filtering.
pub mod stripe_fw;

/// Ring-artifact removal with the Titarenko regularization.
pub mod stripe_ti;

/// Removal of transient bright pixels.
pub mod zinger;
