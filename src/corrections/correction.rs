//! This module provides the `Correction` trait and related structures for managing corrections
//! and their configuration. It also implements a global, thread-safe registry so corrections can
//! be looked up by name.

use crate::config::DistributeOptions;
use crate::error::Result;
#[allow(unused_imports)] // this dependency is required by the `register_correction` macro
use ctor::ctor;
use ndarray::{Array3, Axis};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Mutex;

/// The `Correction` trait defines the structure and behavior of a volume correction.
///
/// Corrections must implement:
/// - A `new` function to initialize a correction with default parameters.
/// - A `config` function to provide metadata about the correction.
/// - An `apply` function that corrects a volume in place.
///
/// To add a new correction, create a struct that derives `Clone` and `Debug`, implement this
/// trait and annotate the struct with `#[register_correction]`. The module also needs to be
/// listed in `src/corrections/mod.rs`.
///
/// **Example**:
/// ```ignore
/// #[register_correction]
/// #[derive(Clone, Debug)]
/// struct Offset {
///     value: f32,
/// }
///
/// impl Correction for Offset {
///     fn new() -> Self {
///         Offset { value: 0.0 }
///     }
///
///     fn config(&self) -> CorrectionConfig {
///         CorrectionConfig {
///             name: "Offset".to_string(),
///             description: "Adds a constant to every pixel.".to_string(),
///             hyperlink: None,
///             axis: CorrectionAxis::Projection,
///         }
///     }
///
///     fn apply(&self, volume: &mut Array3<f32>, options: &DistributeOptions) -> Result<()> {
///         distribute(volume, self.config().axis.axis(), options, |mut chunk, _| {
///             chunk.mapv_inplace(|v| v + self.value);
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Correction: Send + Sync + Debug + CloneBoxedCorrection {
    /// Creates a new instance of the correction with default parameters.
    fn new() -> Self
    where
        Self: Sized;

    /// Returns the correction metadata, including name, description and processing axis.
    fn config(&self) -> CorrectionConfig;

    /// Applies the correction to `volume` in place.
    ///
    /// # Arguments
    ///
    /// - `volume`: 3D data indexed (projection, row, column).
    /// - `options`: worker count and chunk size used by the chunk distributor.
    fn apply(&self, volume: &mut Array3<f32>, options: &DistributeOptions) -> Result<()>;
}

/// The slicing direction a correction is distributed along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionAxis {
    /// One projection image at a time (axis 0).
    Projection,
    /// One sinogram at a time (axis 1).
    Sinogram,
}

impl CorrectionAxis {
    pub fn axis(&self) -> Axis {
        match self {
            CorrectionAxis::Projection => Axis(0),
            CorrectionAxis::Sinogram => Axis(1),
        }
    }
}

/// Metadata of a correction.
///
/// # Fields
/// - `name`: A human-readable name, also used as registry key.
/// - `description`: What the correction does.
/// - `hyperlink`: Optional DOI or reference link with label.
/// - `axis`: The distribution axis, represented as a `CorrectionAxis`.
#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    pub name: String,
    pub description: String,
    pub hyperlink: Option<(Option<String>, String)>, // (optional_label, url)
    pub axis: CorrectionAxis,
}

/// A trait to allow cloning of boxed corrections.
/// This is necessary because `Box<dyn Correction>` cannot be cloned directly.
pub trait CloneBoxedCorrection {
    fn clone_box(&self) -> Box<dyn Correction>;
}

impl<T> CloneBoxedCorrection for T
where
    T: 'static + Correction + Clone,
{
    fn clone_box(&self) -> Box<dyn Correction> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Correction> {
    fn clone(&self) -> Box<dyn Correction> {
        self.as_ref().clone_box()
    }
}

/// A registry of the available corrections, keyed by their configured name.
///
/// **Example**:
/// ```ignore
/// // Retrieve a correction with default parameters
/// if let Some(correction) = CorrectionRegistry::get("Zinger Removal") {
///     correction.apply(&mut volume, &DistributeOptions::default())?;
/// }
/// ```
#[derive(Debug, Default)]
pub struct CorrectionRegistry {
    pub corrections: BTreeMap<String, Box<dyn Correction>>,
}

impl CorrectionRegistry {
    /// Registers a default instance of `C` in the global registry.
    pub fn register_correction<C: Correction + 'static>() {
        let instance = C::new();
        let name = instance.config().name;
        match CORRECTION_REGISTRY.lock() {
            Ok(mut registry) => {
                registry.corrections.insert(name, Box::new(instance));
            }
            Err(err) => log::error!("correction registry is poisoned: {err}"),
        }
    }

    /// Returns a fresh copy of the registered correction called `name`.
    pub fn get(name: &str) -> Option<Box<dyn Correction>> {
        CORRECTION_REGISTRY
            .lock()
            .ok()
            .and_then(|registry| registry.corrections.get(name).cloned())
    }

    /// Names of all registered corrections in alphabetical order.
    pub fn names() -> Vec<String> {
        CORRECTION_REGISTRY
            .lock()
            .map(|registry| registry.corrections.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// A global, thread-safe correction registry, filled at program start by
/// `#[register_correction]`.
pub static CORRECTION_REGISTRY: Lazy<Mutex<CorrectionRegistry>> =
    Lazy::new(|| Mutex::new(CorrectionRegistry::default()));
