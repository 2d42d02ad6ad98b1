//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of the MACD line, seeded by the simple average of
//! the first `signal` MACD values
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: the line is zero before index max(fast, slow) - 1; signal and
//! histogram are zero before index max(fast, slow) - 1 + signal - 1.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::{calculate_ema, require_period};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Result<MacdSeries, IndicatorError> {
    require_period("MACD", fast)?;
    require_period("MACD", slow)?;
    require_period("MACD", signal_period)?;

    let len = closes.len();
    let ema_fast = calculate_ema(closes, fast)?;
    let ema_slow = calculate_ema(closes, slow)?;

    let line_start = fast.max(slow) - 1;
    let mut line = vec![0.0; len];
    for i in line_start..len {
        line[i] = ema_fast[i] - ema_slow[i];
    }

    let mut signal = vec![0.0; len];
    let mut histogram = vec![0.0; len];
    let signal_start = line_start + signal_period - 1;

    if signal_start < len {
        let k = 2.0 / (signal_period as f64 + 1.0);
        let seed: f64 =
            line[line_start..=signal_start].iter().sum::<f64>() / signal_period as f64;
        let mut signal_ema = seed;
        signal[signal_start] = seed;

        for i in (signal_start + 1)..len {
            signal_ema = line[i] * k + signal_ema * (1.0 - k);
            signal[i] = signal_ema;
        }

        for i in signal_start..len {
            histogram[i] = line[i] - signal[i];
        }
    }

    Ok(MacdSeries {
        line,
        signal,
        histogram,
    })
}
