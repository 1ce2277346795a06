use crate::config::DistributeOptions;
use crate::corrections::correction::{Correction, CorrectionAxis, CorrectionConfig};
use crate::distribute::distribute;
use crate::error::{CorrectionError, Result};
use crate::math_tools::median_filter_2d;
use correction_macros::register_correction;
use ndarray::{Array3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[register_correction]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZingerRemoval {
    /// Minimum excess over the local median for a pixel to count as a zinger.
    pub dif: f32,
    /// Width of the square median window, odd.
    pub size: usize,
}

impl Default for ZingerRemoval {
    fn default() -> Self {
        ZingerRemoval {
            dif: 1000.0,
            size: 3,
        }
    }
}

impl Correction for ZingerRemoval {
    fn new() -> Self
    where
        Self: Sized,
    {
        ZingerRemoval::default()
    }

    fn config(&self) -> CorrectionConfig {
        CorrectionConfig {
            name: "Zinger Removal".to_string(),
            description: "Replaces isolated bright pixels by the median of their neighborhood."
                .to_string(),
            hyperlink: None,
            axis: CorrectionAxis::Projection,
        }
    }

    fn apply(&self, volume: &mut Array3<f32>, options: &DistributeOptions) -> Result<()> {
        remove_zinger(volume, self.dif, self.size, options)
    }
}

/// Removes zingers (isolated bright spots from direct detector hits) from every projection.
///
/// A pixel is replaced by the median of its `size x size` neighborhood when it exceeds that
/// median by at least `dif`.
pub fn remove_zinger(
    volume: &mut Array3<f32>,
    dif: f32,
    size: usize,
    options: &DistributeOptions,
) -> Result<()> {
    if size == 0 || size % 2 == 0 {
        return Err(CorrectionError::invalid(
            "size",
            format!("median window must be odd, got {size}"),
        ));
    }

    let start = Instant::now();
    distribute(volume, Axis(0), options, |mut chunk, _| {
        for mut projection in chunk.axis_iter_mut(Axis(0)) {
            let filtered = median_filter_2d(projection.view(), size);
            Zip::from(&mut projection)
                .and(&filtered)
                .for_each(|value, &median| {
                    if *value - median >= dif {
                        *value = median;
                    }
                });
        }
        Ok(())
    })?;
    log::debug!(
        "zinger removal (dif = {dif}, size = {size}) took {:?}",
        start.elapsed()
    );
    Ok(())
}
