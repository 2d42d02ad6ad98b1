//! Bollinger Bands indicator.
//!
//! - Middle: SMA over n periods
//! - Upper: Middle + (multiplier x StdDev)
//! - Lower: Middle - (multiplier x StdDev)
//! - %B: (close - lower) / (upper - lower), 0.5 when the bands collapse
//! - Bandwidth: (upper - lower) / middle, 0 when middle is 0
//!
//! StdDev is the population standard deviation (divides by N, not N-1).
//! Default parameters: period=20, multiplier=2.0
//! Warmup: first (period-1) values are the zero sentinel on every band.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::{calculate_sma, calculate_stddev, require_period};

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
    pub percent_b: Vec<f64>,
    pub bandwidth: Vec<f64>,
}

pub fn calculate_bollinger(
    closes: &[f64],
    period: usize,
    multiplier: f64,
) -> Result<BollingerBands, IndicatorError> {
    require_period("BOLLINGER", period)?;

    let len = closes.len();
    let middle = calculate_sma(closes, period)?;
    let stddev = calculate_stddev(closes, period)?;

    let mut upper = vec![0.0; len];
    let mut lower = vec![0.0; len];
    let mut percent_b = vec![0.0; len];
    let mut bandwidth = vec![0.0; len];

    for i in (period - 1)..len {
        upper[i] = middle[i] + multiplier * stddev[i];
        lower[i] = middle[i] - multiplier * stddev[i];

        let width = upper[i] - lower[i];
        percent_b[i] = if width > 0.0 {
            (closes[i] - lower[i]) / width
        } else {
            0.5
        };
        bandwidth[i] = if middle[i] != 0.0 {
            width / middle[i]
        } else {
            0.0
        };
    }

    Ok(BollingerBands {
        upper,
        middle,
        lower,
        percent_b,
        bandwidth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_warmup() {
        let bands = calculate_bollinger(&[10.0, 20.0, 30.0, 40.0, 50.0], 3, 2.0).unwrap();
        assert_eq!(bands.upper[0], 0.0);
        assert_eq!(bands.middle[1], 0.0);
        assert_eq!(bands.lower[1], 0.0);
        assert!(bands.middle[2] > 0.0);
    }

    #[test]
    fn bollinger_constant_values_collapse() {
        let bands = calculate_bollinger(&[100.0; 5], 3, 2.0).unwrap();
        assert!((bands.middle[2] - 100.0).abs() < f64::EPSILON);
        assert!((bands.upper[2] - 100.0).abs() < f64::EPSILON);
        assert!((bands.lower[2] - 100.0).abs() < f64::EPSILON);
        assert!((bands.percent_b[2] - 0.5).abs() < f64::EPSILON);
        assert_eq!(bands.bandwidth[2], 0.0);
    }

    #[test]
    fn bollinger_basic_calculation() {
        let closes = [10.0, 20.0, 30.0];
        let bands = calculate_bollinger(&closes, 3, 2.0).unwrap();

        let mean: f64 = 20.0;
        let variance: f64 = (100.0 + 0.0 + 100.0) / 3.0;
        let stddev = variance.sqrt();

        assert!((bands.middle[2] - mean).abs() < 1e-10);
        assert!((bands.upper[2] - (mean + 2.0 * stddev)).abs() < 1e-10);
        assert!((bands.lower[2] - (mean - 2.0 * stddev)).abs() < 1e-10);

        let expected_b = (30.0 - (mean - 2.0 * stddev)) / (4.0 * stddev);
        assert!((bands.percent_b[2] - expected_b).abs() < 1e-10);
        assert!((bands.bandwidth[2] - 4.0 * stddev / mean).abs() < 1e-10);
    }

    #[test]
    fn bollinger_zero_period() {
        assert!(calculate_bollinger(&[1.0], 0, 2.0).is_err());
    }
}
