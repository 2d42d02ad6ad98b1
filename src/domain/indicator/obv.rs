//! OBV (On-Balance Volume) indicator.

use crate::domain::error::IndicatorError;
use crate::domain::indicator::require_same_len;

/// Calculate OBV (On-Balance Volume).
///
/// OBV[0] = volume[0]
/// If close[i] > close[i-1]: OBV[i] = OBV[i-1] + volume[i]
/// If close[i] < close[i-1]: OBV[i] = OBV[i-1] - volume[i]
/// If close[i] == close[i-1]: OBV[i] = OBV[i-1]
///
/// No warmup period.
pub fn calculate_obv(closes: &[f64], volumes: &[f64]) -> Result<Vec<f64>, IndicatorError> {
    require_same_len("OBV", closes.len(), volumes.len())?;

    let mut out = Vec::with_capacity(closes.len());
    let mut obv = 0.0;

    for (i, (&close, &volume)) in closes.iter().zip(volumes).enumerate() {
        if i == 0 {
            obv = volume;
        } else if close > closes[i - 1] {
            obv += volume;
        } else if close < closes[i - 1] {
            obv -= volume;
        }
        out.push(obv);
    }

    Ok(out)
}
