//! Average True Range indicator.
//!
//! TR[i] = max(H[i]-L[i], |H[i]-C[i-1]|, |L[i]-C[i-1]|) for i >= 1.
//! Seed: simple average of the first n true ranges (TR[1..=n]), placed at
//! index n. Then Wilder smoothing: ATR[i] = (ATR[i-1]*(n-1) + TR[i]) / n.
//! Warmup: first n values are the zero sentinel.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::{require_period, require_same_len};

pub fn calculate_atr(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
) -> Result<Vec<f64>, IndicatorError> {
    require_period("ATR", period)?;
    require_same_len("ATR", high.len(), low.len())?;
    require_same_len("ATR", high.len(), close.len())?;

    let len = close.len();
    let mut out = vec![0.0; len];
    if len <= period {
        return Ok(out);
    }

    let true_range = |i: usize| -> f64 {
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        hl.max(hc).max(lc)
    };

    let seed: f64 = (1..=period).map(&true_range).sum::<f64>() / period as f64;
    out[period] = seed;

    let mut atr = seed;
    for i in (period + 1)..len {
        atr = (atr * (period - 1) as f64 + true_range(i)) / period as f64;
        out[i] = atr;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(bars: &[(f64, f64, f64)]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        (
            bars.iter().map(|b| b.0).collect(),
            bars.iter().map(|b| b.1).collect(),
            bars.iter().map(|b| b.2).collect(),
        )
    }

    #[test]
    fn atr_warmup() {
        let (h, l, c) = split(&[(110.0, 90.0, 100.0); 6]);
        let series = calculate_atr(&h, &l, &c, 3).unwrap();
        assert_eq!(series.len(), 6);
        assert_eq!(&series[..3], &[0.0, 0.0, 0.0]);
        assert!(series[3] > 0.0);
    }

    #[test]
    fn atr_seed_is_average_of_true_ranges() {
        let (h, l, c) = split(&[
            (110.0, 100.0, 105.0),
            (115.0, 105.0, 110.0),
            (120.0, 110.0, 115.0),
            (125.0, 115.0, 120.0),
        ]);
        let series = calculate_atr(&h, &l, &c, 3).unwrap();
        // every TR = 10 (H-L=10, |H-prevC|=10)
        assert!((series[3] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn atr_wilder_smoothing() {
        let (h, l, c) = split(&[
            (110.0, 100.0, 105.0),
            (115.0, 105.0, 110.0),
            (120.0, 110.0, 115.0),
            (125.0, 115.0, 120.0),
            (150.0, 120.0, 140.0),
        ]);
        let series = calculate_atr(&h, &l, &c, 3).unwrap();
        // TR[4] = max(30, |150-120|, |120-120|) = 30
        let expected = (10.0 * 2.0 + 30.0) / 3.0;
        assert!((series[4] - expected).abs() < 1e-9);
    }

    #[test]
    fn atr_gap_uses_previous_close() {
        let (h, l, c) = split(&[(110.0, 100.0, 105.0), (130.0, 120.0, 125.0)]);
        let series = calculate_atr(&h, &l, &c, 1).unwrap();
        // |130-105| = 25 dominates H-L = 10
        assert!((series[1] - 25.0).abs() < 1e-9);
    }

    #[test]
    fn atr_insufficient_bars_all_zero() {
        let (h, l, c) = split(&[(110.0, 90.0, 100.0); 2]);
        let series = calculate_atr(&h, &l, &c, 5).unwrap();
        assert_eq!(series, vec![0.0, 0.0]);
    }

    #[test]
    fn atr_mismatched_lengths() {
        let err = calculate_atr(&[1.0, 2.0], &[1.0], &[1.0, 2.0], 1).unwrap_err();
        assert_eq!(
            err,
            IndicatorError::LengthMismatch {
                indicator: "ATR",
                left: 2,
                right: 1
            }
        );
    }
}
