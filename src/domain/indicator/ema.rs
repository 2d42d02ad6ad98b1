//! Exponential Moving Average indicator.
//!
//! k = 2/(n+1), seed with the simple average of the first n values, then
//! EMA[i] = P[i]*k + EMA[i-1]*(1-k).
//! Warmup: first (n-1) values are the zero sentinel.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::require_period;

pub fn calculate_ema(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    require_period("EMA", period)?;

    let mut out = vec![0.0; values.len()];
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = 0.0;
    let mut sum = 0.0;

    for (i, &value) in values.iter().enumerate() {
        if i < period - 1 {
            sum += value;
        } else if i == period - 1 {
            sum += value;
            ema = sum / period as f64;
            out[i] = ema;
        } else {
            ema = value * k + ema * (1.0 - k);
            out[i] = ema;
        }
    }

    Ok(out)
}
