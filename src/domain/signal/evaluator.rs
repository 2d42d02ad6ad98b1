//! Six independent confirmation checks on the latest bar.
//!
//! | check      | long passes when                      | short passes when |
//! |------------|---------------------------------------|-------------------|
//! | trend      | SMA short > SMA medium (weekly first) | short < medium    |
//! | momentum   | RSI < 70                              | RSI > 30          |
//! | volume     | volume >= 1.2 x trailing average      | same              |
//! | volatility | ATR within 0.5x..2.0x trailing ATR    | same              |
//! | macd       | histogram > 0                         | histogram < 0     |
//! | stochastic | %K < 80                               | %K > 20           |
//!
//! Score is the weight of passed checks over the weight of all checks.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Direction;
use crate::domain::candle::Timeframe;
use crate::domain::orchestrator::AnnotatedCandle;
use crate::domain::snapshot::IndicatorSnapshot;

const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;
const STOCH_OVERBOUGHT: f64 = 80.0;
const STOCH_OVERSOLD: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckKind {
    Trend,
    Momentum,
    Volume,
    Volatility,
    Macd,
    Stochastic,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckKind::Trend => "trend",
            CheckKind::Momentum => "momentum",
            CheckKind::Volume => "volume",
            CheckKind::Volatility => "volatility",
            CheckKind::Macd => "macd",
            CheckKind::Stochastic => "stochastic",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    pub trend: f64,
    pub momentum: f64,
    pub volume: f64,
    pub volatility: f64,
    pub macd: f64,
    pub stochastic: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            trend: 0.25,
            momentum: 0.20,
            volume: 0.15,
            volatility: 0.10,
            macd: 0.15,
            stochastic: 0.15,
        }
    }
}

impl SignalWeights {
    fn weight(&self, kind: CheckKind) -> f64 {
        match kind {
            CheckKind::Trend => self.trend,
            CheckKind::Momentum => self.momentum,
            CheckKind::Volume => self.volume,
            CheckKind::Volatility => self.volatility,
            CheckKind::Macd => self.macd,
            CheckKind::Stochastic => self.stochastic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalCheck {
    pub kind: CheckKind,
    pub passed: bool,
    pub weight: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvaluation {
    pub direction: Direction,
    pub checks: Vec<SignalCheck>,
    /// 0.0..=1.0
    pub score: f64,
}

impl SignalEvaluation {
    pub fn passed(&self, kind: CheckKind) -> bool {
        self.checks.iter().any(|c| c.kind == kind && c.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvaluator {
    pub weights: SignalWeights,
    pub volume_multiplier: f64,
    pub volatility_band: (f64, f64),
    /// Bars before the latest one used for trailing averages.
    pub lookback: usize,
}

impl Default for SignalEvaluator {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            volume_multiplier: 1.2,
            volatility_band: (0.5, 2.0),
            lookback: 20,
        }
    }
}

impl SignalEvaluator {
    pub fn new(weights: SignalWeights) -> Self {
        Self {
            weights,
            ..Default::default()
        }
    }

    /// Evaluate the last bar of `bars`. `None` for an empty slice.
    pub fn evaluate(&self, bars: &[AnnotatedCandle], direction: Direction) -> Option<SignalEvaluation> {
        let (latest, history) = bars.split_last()?;
        let start = history.len().saturating_sub(self.lookback);
        let history = &history[start..];
        let ind = &latest.indicators;

        let checks = vec![
            self.check(CheckKind::Trend, trend_check(latest, direction)),
            self.check(CheckKind::Momentum, momentum_check(ind, direction)),
            self.check(CheckKind::Volume, self.volume_check(latest, history)),
            self.check(CheckKind::Volatility, self.volatility_check(ind, history)),
            self.check(CheckKind::Macd, macd_check(ind, direction)),
            self.check(CheckKind::Stochastic, stochastic_check(ind, direction)),
        ];

        let total: f64 = checks.iter().map(|c| c.weight).sum();
        let passed: f64 = checks.iter().filter(|c| c.passed).map(|c| c.weight).sum();
        let score = if total > 0.0 { passed / total } else { 0.0 };

        Some(SignalEvaluation {
            direction,
            checks,
            score,
        })
    }

    fn check(&self, kind: CheckKind, (passed, detail): (bool, String)) -> SignalCheck {
        SignalCheck {
            kind,
            passed,
            weight: self.weights.weight(kind),
            detail,
        }
    }

    fn volume_check(&self, latest: &AnnotatedCandle, history: &[AnnotatedCandle]) -> (bool, String) {
        if history.is_empty() {
            return (false, "no volume history".into());
        }
        let average =
            history.iter().map(|b| b.candle.volume as f64).sum::<f64>() / history.len() as f64;
        let volume = latest.candle.volume as f64;
        let ratio = if average > 0.0 { volume / average } else { 0.0 };
        (
            ratio >= self.volume_multiplier,
            format!("volume {:.2}x trailing average", ratio),
        )
    }

    fn volatility_check(&self, ind: &IndicatorSnapshot, history: &[AnnotatedCandle]) -> (bool, String) {
        let atrs: Vec<f64> = history
            .iter()
            .map(|b| b.indicators.atr)
            .filter(|a| *a > 0.0)
            .collect();
        if ind.atr <= 0.0 || atrs.is_empty() {
            return (false, "ATR not available".into());
        }
        let average = atrs.iter().sum::<f64>() / atrs.len() as f64;
        let ratio = ind.atr / average;
        let (low, high) = self.volatility_band;
        (
            (low..=high).contains(&ratio),
            format!("ATR {:.2}x trailing average", ratio),
        )
    }
}

fn trend_check(bar: &AnnotatedCandle, direction: Direction) -> (bool, String) {
    let weekly = bar
        .higher_timeframe(Timeframe::Weekly)
        .map(|w| &w.indicators)
        .filter(|w| w.sma_short > 0.0 && w.sma_medium > 0.0);
    let (source, ind) = match weekly {
        Some(w) => ("weekly", w),
        None => ("daily", &bar.indicators),
    };
    if ind.sma_short <= 0.0 || ind.sma_medium <= 0.0 {
        return (false, "moving averages not available".into());
    }
    let passed = match direction {
        Direction::Long => ind.sma_short > ind.sma_medium,
        Direction::Short => ind.sma_short < ind.sma_medium,
    };
    (
        passed,
        format!("{} SMA {:.2} vs {:.2}", source, ind.sma_short, ind.sma_medium),
    )
}

fn momentum_check(ind: &IndicatorSnapshot, direction: Direction) -> (bool, String) {
    let passed = match direction {
        Direction::Long => ind.rsi < RSI_OVERBOUGHT,
        Direction::Short => ind.rsi > RSI_OVERSOLD,
    };
    (passed && ind.warmed_up, format!("RSI {:.1}", ind.rsi))
}

fn macd_check(ind: &IndicatorSnapshot, direction: Direction) -> (bool, String) {
    let passed = match direction {
        Direction::Long => ind.macd_histogram > 0.0,
        Direction::Short => ind.macd_histogram < 0.0,
    };
    (passed, format!("MACD histogram {:.4}", ind.macd_histogram))
}

fn stochastic_check(ind: &IndicatorSnapshot, direction: Direction) -> (bool, String) {
    let passed = match direction {
        Direction::Long => ind.stoch_k < STOCH_OVERBOUGHT,
        Direction::Short => ind.stoch_k > STOCH_OVERSOLD,
    };
    (passed && ind.warmed_up, format!("%K {:.1}", ind.stoch_k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Candle;
    use crate::domain::orchestrator::HigherTimeframeBar;
    use chrono::{Duration, NaiveDate};
    use std::collections::BTreeMap;

    fn bar(i: i64, volume: i64, ind: IndicatorSnapshot) -> AnnotatedCandle {
        AnnotatedCandle {
            candle: Candle {
                symbol: "BHP".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + Duration::days(i),
                open: 50.0,
                high: 51.0,
                low: 49.0,
                close: 50.5,
                volume,
                timeframe: Timeframe::Daily,
            },
            indicators: ind,
            higher: BTreeMap::new(),
        }
    }

    fn bullish() -> IndicatorSnapshot {
        IndicatorSnapshot {
            sma_short: 52.0,
            sma_medium: 50.0,
            rsi: 55.0,
            atr: 1.0,
            macd_histogram: 0.2,
            stoch_k: 60.0,
            warmed_up: true,
            ..Default::default()
        }
    }

    fn series(latest_volume: i64, latest: IndicatorSnapshot) -> Vec<AnnotatedCandle> {
        let mut bars: Vec<_> = (0..20).map(|i| bar(i, 1_000, bullish())).collect();
        bars.push(bar(20, latest_volume, latest));
        bars
    }

    #[test]
    fn all_checks_pass_for_long() {
        let eval = SignalEvaluator::default()
            .evaluate(&series(1_500, bullish()), Direction::Long)
            .unwrap();
        assert_eq!(eval.passed_count(), 6);
        assert!((eval.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_weighted_fraction() {
        // low volume fails (0.15), bearish MACD fails (0.15)
        let latest = IndicatorSnapshot {
            macd_histogram: -0.1,
            ..bullish()
        };
        let eval = SignalEvaluator::default()
            .evaluate(&series(1_000, latest), Direction::Long)
            .unwrap();
        assert!(!eval.passed(CheckKind::Volume));
        assert!(!eval.passed(CheckKind::Macd));
        assert!((eval.score - 0.70).abs() < 1e-9);
    }

    #[test]
    fn short_direction_flips_thresholds() {
        let latest = IndicatorSnapshot {
            sma_short: 48.0,
            macd_histogram: -0.3,
            ..bullish()
        };
        let eval = SignalEvaluator::default()
            .evaluate(&series(1_500, latest), Direction::Short)
            .unwrap();
        assert!(eval.passed(CheckKind::Trend));
        assert!(eval.passed(CheckKind::Macd));
        assert!(eval.passed(CheckKind::Momentum));
    }

    #[test]
    fn weekly_trend_takes_precedence() {
        let mut bars = series(1_500, bullish());
        let weekly = IndicatorSnapshot {
            sma_short: 45.0,
            sma_medium: 50.0,
            warmed_up: true,
            ..Default::default()
        };
        let last = bars.len() - 1;
        let candle = bars[last].candle.clone();
        bars[last].higher.insert(
            Timeframe::Weekly,
            HigherTimeframeBar {
                candle,
                indicators: weekly,
            },
        );
        let eval = SignalEvaluator::default().evaluate(&bars, Direction::Long).unwrap();
        assert!(!eval.passed(CheckKind::Trend));
    }

    #[test]
    fn volatility_outside_band_fails() {
        let latest = IndicatorSnapshot {
            atr: 2.5,
            ..bullish()
        };
        let eval = SignalEvaluator::default()
            .evaluate(&series(1_500, latest), Direction::Long)
            .unwrap();
        assert!(!eval.passed(CheckKind::Volatility));
    }

    #[test]
    fn single_bar_fails_history_checks() {
        let eval = SignalEvaluator::default()
            .evaluate(&[bar(0, 1_000, bullish())], Direction::Long)
            .unwrap();
        assert!(!eval.passed(CheckKind::Volume));
        assert!(!eval.passed(CheckKind::Volatility));
        assert!(SignalEvaluator::default().evaluate(&[], Direction::Long).is_none());
    }
}
