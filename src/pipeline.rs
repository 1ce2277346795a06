//! Runs a sequence of corrections over a volume.

use crate::config::{DistributeOptions, PipelineConfig};
use crate::corrections::correction::{Correction, CorrectionRegistry};
use crate::error::{CorrectionError, Result};
use ndarray::Array3;
use std::time::Instant;

/// An ordered list of corrections sharing one set of distribution options.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    options: DistributeOptions,
    corrections: Vec<Box<dyn Correction>>,
}

impl Pipeline {
    pub fn new(options: DistributeOptions) -> Self {
        Pipeline {
            options,
            corrections: Vec::new(),
        }
    }

    pub fn from_config(config: PipelineConfig) -> Self {
        Pipeline {
            options: config.options,
            corrections: config
                .steps
                .into_iter()
                .map(|step| step.into_correction())
                .collect(),
        }
    }

    /// Appends a correction.
    pub fn push(&mut self, correction: Box<dyn Correction>) {
        self.corrections.push(correction);
    }

    /// Appends the registered correction called `name` with its default parameters.
    pub fn push_named(&mut self, name: &str) -> Result<()> {
        let correction = CorrectionRegistry::get(name).ok_or_else(|| {
            CorrectionError::invalid(
                "correction",
                format!(
                    "no correction called `{name}`, available: {}",
                    CorrectionRegistry::names().join(", ")
                ),
            )
        })?;
        self.corrections.push(correction);
        Ok(())
    }

    pub fn options(&self) -> &DistributeOptions {
        &self.options
    }

    /// Names of the corrections in the order they run.
    pub fn names(&self) -> Vec<String> {
        self.corrections.iter().map(|c| c.config().name).collect()
    }

    pub fn len(&self) -> usize {
        self.corrections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty()
    }

    /// Applies every correction in order. Stops at the first failing correction; the volume
    /// keeps the results of the corrections applied before it.
    pub fn run(&self, volume: &mut Array3<f32>) -> Result<()> {
        let total = Instant::now();
        for correction in &self.corrections {
            let config = correction.config();
            log::info!("applying {} to a {:?} volume", config.name, volume.dim());
            let start = Instant::now();
            correction.apply(volume, &self.options).map_err(|err| {
                log::error!("{} failed: {err}", config.name);
                err
            })?;
            log::info!("{} finished in {:?}", config.name, start.elapsed());
        }
        log::debug!(
            "pipeline of {} corrections took {:?}",
            self.corrections.len(),
            total.elapsed()
        );
        Ok(())
    }
}
