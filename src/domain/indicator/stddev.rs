//! Rolling standard deviation.
//!
//! Population standard deviation over n values.
//! STDDEV(n)[i] = sqrt(sum((P[i-j] - SMA(n)[i])^2 for j in 0..n) / n)
//! Warmup: first (n-1) values are the zero sentinel.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::require_period;

pub fn calculate_stddev(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    require_period("STDDEV", period)?;

    let mut out = vec![0.0; values.len()];
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window
            .iter()
            .map(|v| {
                let diff = v - mean;
                diff * diff
            })
            .sum::<f64>()
            / period as f64;
        out[i] = variance.sqrt();
    }

    Ok(out)
}
