//! Weighted Moving Average indicator.
//!
//! O(n) sliding window: the weighted sum drops the whole previous window and
//! adds the newest value at full weight.
//! WMA(n) = (1*P[i-n+1] + 2*P[i-n+2] + ... + n*P[i]) / (n*(n+1)/2)
//! Warmup: first (n-1) values are the zero sentinel.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::require_period;

pub fn calculate_wma(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    require_period("WMA", period)?;

    let mut out = vec![0.0; values.len()];
    let divisor = (period * (period + 1)) as f64 / 2.0;
    let mut weighted_sum: f64 = 0.0;
    let mut window_sum: f64 = 0.0;

    for (i, &value) in values.iter().enumerate() {
        if i < period {
            weighted_sum += (i + 1) as f64 * value;
            window_sum += value;
        } else {
            weighted_sum += period as f64 * value - window_sum;
            window_sum += value - values[i - period];
        }

        if i + 1 >= period {
            out[i] = weighted_sum / divisor;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_wma(values: &[f64], end: usize, period: usize) -> f64 {
        let window = &values[end + 1 - period..=end];
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(j, v)| (j + 1) as f64 * v)
            .sum();
        weighted / ((period * (period + 1)) as f64 / 2.0)
    }

    #[test]
    fn wma_basic() {
        let series = calculate_wma(&[10.0, 20.0, 30.0], 3).unwrap();
        // (1*10 + 2*20 + 3*30) / 6 = 140/6
        assert!((series[2] - 140.0 / 6.0).abs() < 1e-10);
        assert_eq!(series[0], 0.0);
        assert_eq!(series[1], 0.0);
    }

    #[test]
    fn wma_sliding_matches_naive() {
        let prices = [3.0, 7.0, 1.0, 9.0, 4.0, 8.0, 2.0, 6.0];
        let series = calculate_wma(&prices, 4).unwrap();
        for i in 3..prices.len() {
            assert!(
                (series[i] - naive_wma(&prices, i, 4)).abs() < 1e-9,
                "mismatch at {}",
                i
            );
        }
    }

    #[test]
    fn wma_period_0() {
        assert!(calculate_wma(&[1.0], 0).is_err());
    }
}
