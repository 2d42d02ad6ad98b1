//! Stochastic oscillator.
//!
//! %K = (close - lowest_low(k)) / (highest_high(k) - lowest_low(k)) * 100,
//! 50 when the k-bar range is zero.
//! %D = SMA(%K, d) over valid %K values.
//! Warmup: %K is zero before index k-1, %D before index k-1 + d-1.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::{require_period, require_same_len};

pub const DEFAULT_K: usize = 14;
pub const DEFAULT_D: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct StochasticSeries {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn calculate_stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_period: usize,
    d_period: usize,
) -> Result<StochasticSeries, IndicatorError> {
    require_period("STOCHASTIC", k_period)?;
    require_period("STOCHASTIC", d_period)?;
    require_same_len("STOCHASTIC", high.len(), low.len())?;
    require_same_len("STOCHASTIC", high.len(), close.len())?;

    let len = close.len();
    let mut k = vec![0.0; len];
    let mut d = vec![0.0; len];

    for i in (k_period - 1)..len {
        let start = i + 1 - k_period;
        let highest = high[start..=i]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let lowest = low[start..=i].iter().copied().fold(f64::INFINITY, f64::min);
        let range = highest - lowest;
        k[i] = if range > 0.0 {
            (close[i] - lowest) / range * 100.0
        } else {
            50.0
        };
    }

    let d_start = k_period - 1 + d_period - 1;
    for i in d_start..len {
        d[i] = k[i + 1 - d_period..=i].iter().sum::<f64>() / d_period as f64;
    }

    Ok(StochasticSeries { k, d })
}
