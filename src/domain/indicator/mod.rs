//! Technical indicator library.
//!
//! Every function maps an input series to an output series of identical
//! length. Positions before an indicator's warmup length hold the zero
//! sentinel, which callers must never read as a real value.
//!
//! Contract violations (a zero period, mismatched input lengths) are returned
//! as [`IndicatorError`]; numeric edge cases such as a flat window resolve to
//! the fallback documented on each function.

pub mod atr;
pub mod bollinger;
pub mod crossover;
pub mod ema;
pub mod macd;
pub mod obv;
pub mod rsi;
pub mod sma;
pub mod stddev;
pub mod stochastic;
pub mod volume;
pub mod wma;

pub use atr::calculate_atr;
pub use bollinger::{calculate_bollinger, BollingerBands};
pub use crossover::{
    detect_crossovers, detect_divergences, swing_highs, swing_lows, CrossEvent, CrossKind,
    Divergence,
};
pub use ema::calculate_ema;
pub use macd::{calculate_macd, MacdSeries};
pub use obv::calculate_obv;
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;
pub use stddev::calculate_stddev;
pub use stochastic::{calculate_stochastic, StochasticSeries};
pub use volume::{calculate_relative_volume, calculate_volume_ma};
pub use wma::calculate_wma;

use crate::domain::error::IndicatorError;

pub(crate) fn require_period(indicator: &'static str, period: usize) -> Result<(), IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod { indicator });
    }
    Ok(())
}

pub(crate) fn require_same_len(
    indicator: &'static str,
    left: usize,
    right: usize,
) -> Result<(), IndicatorError> {
    if left != right {
        return Err(IndicatorError::LengthMismatch {
            indicator,
            left,
            right,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn require_period_rejects_zero() {
        assert_eq!(
            require_period("SMA", 0),
            Err(IndicatorError::InvalidPeriod { indicator: "SMA" })
        );
        assert!(require_period("SMA", 1).is_ok());
    }

    #[test]
    fn require_same_len_reports_both_sides() {
        assert_eq!(
            require_same_len("OBV", 3, 2),
            Err(IndicatorError::LengthMismatch {
                indicator: "OBV",
                left: 3,
                right: 2
            })
        );
    }

    proptest! {
        #[test]
        fn moving_averages_keep_length_and_zero_warmup(
            prices in proptest::collection::vec(1.0f64..500.0, 0..80),
            period in 1usize..30,
        ) {
            for series in [
                calculate_sma(&prices, period).unwrap(),
                calculate_ema(&prices, period).unwrap(),
                calculate_wma(&prices, period).unwrap(),
            ] {
                prop_assert_eq!(series.len(), prices.len());
                for v in series.iter().take(period - 1) {
                    prop_assert_eq!(*v, 0.0);
                }
            }
        }

        #[test]
        fn rsi_stays_in_range_after_warmup(
            prices in proptest::collection::vec(1.0f64..500.0, 0..80),
            period in 1usize..20,
        ) {
            let rsi = calculate_rsi(&prices, period).unwrap();
            prop_assert_eq!(rsi.len(), prices.len());
            for (i, v) in rsi.iter().enumerate() {
                if i < period {
                    prop_assert_eq!(*v, 0.0);
                } else {
                    prop_assert!((0.0..=100.0).contains(v));
                }
            }
        }
    }
}
