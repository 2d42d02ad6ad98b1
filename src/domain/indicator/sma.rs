//! Simple Moving Average indicator.
//!
//! SMA(n)[i] = (P[i-n+1] + ... + P[i]) / n, computed with a sliding sum.
//! Warmup: first (n-1) values are the zero sentinel.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::require_period;

pub fn calculate_sma(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    require_period("SMA", period)?;

    let mut out = vec![0.0; values.len()];
    let mut window_sum = 0.0;

    for (i, &value) in values.iter().enumerate() {
        window_sum += value;
        if i >= period {
            window_sum -= values[i - period];
        }
        if i + 1 >= period {
            out[i] = window_sum / period as f64;
        }
    }

    Ok(out)
}
