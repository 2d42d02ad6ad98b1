//! Volume moving average and relative volume.
//!
//! VolumeMA(n) = SMA(volume, n)
//! RelVol(n)[i] = volume[i] / VolumeMA(n)[i], zero while the average is zero.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::calculate_sma;

pub fn calculate_volume_ma(volumes: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    calculate_sma(volumes, period)
}

pub fn calculate_relative_volume(
    volumes: &[f64],
    period: usize,
) -> Result<Vec<f64>, IndicatorError> {
    let ma = calculate_volume_ma(volumes, period)?;
    Ok(volumes
        .iter()
        .zip(&ma)
        .map(|(&v, &avg)| if avg > 0.0 { v / avg } else { 0.0 })
        .collect())
}
