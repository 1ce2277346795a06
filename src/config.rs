//! Serializable configuration: how work is distributed and which corrections a pipeline runs.

use crate::corrections::air::AirCorrection;
use crate::corrections::correction::Correction;
use crate::corrections::phase::PhaseRetrieval;
use crate::corrections::roi::CircularRoi;
use crate::corrections::stripe_fw::FourierWaveletStripes;
use crate::corrections::stripe_ti::TitarenkoStripes;
use crate::corrections::zinger::ZingerRemoval;
use serde::{Deserialize, Serialize};

/// Worker and chunk-size overrides for the chunk distributor.
///
/// `None` means "pick automatically": one worker per available core and an even split of the
/// distribution axis among the workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributeOptions {
    pub ncore: Option<usize>,
    pub nchunk: Option<usize>,
}

impl DistributeOptions {
    pub fn with_ncore(mut self, ncore: usize) -> Self {
        self.ncore = Some(ncore);
        self
    }

    pub fn with_nchunk(mut self, nchunk: usize) -> Self {
        self.nchunk = Some(nchunk);
        self
    }

    /// Everything on the calling thread, as a single range.
    pub fn sequential() -> Self {
        DistributeOptions {
            ncore: Some(1),
            nchunk: None,
        }
    }
}

/// One entry of a correction pipeline together with its parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "correction", rename_all = "snake_case")]
pub enum CorrectionStep {
    CorrectAir(AirCorrection),
    RemoveStripeFw(FourierWaveletStripes),
    RemoveStripeTi(TitarenkoStripes),
    RemoveZinger(ZingerRemoval),
    RetrievePhase(PhaseRetrieval),
    CircularRoi(CircularRoi),
}

impl CorrectionStep {
    pub fn into_correction(self) -> Box<dyn Correction> {
        match self {
            CorrectionStep::CorrectAir(c) => Box::new(c),
            CorrectionStep::RemoveStripeFw(c) => Box::new(c),
            CorrectionStep::RemoveStripeTi(c) => Box::new(c),
            CorrectionStep::RemoveZinger(c) => Box::new(c),
            CorrectionStep::RetrievePhase(c) => Box::new(c),
            CorrectionStep::CircularRoi(c) => Box::new(c),
        }
    }
}

/// A list of corrections applied in order, sharing one set of distribution options.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub options: DistributeOptions,
    pub steps: Vec<CorrectionStep>,
}
