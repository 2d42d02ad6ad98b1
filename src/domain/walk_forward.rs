//! Walk-forward analysis.
//!
//! Windows are generated over bar indices. Each window optimizes on its
//! in-sample slice, replays the best parameters on the following
//! out-of-sample slice, and measures how much of the in-sample Sharpe
//! survived. Windows run one after another; each grid search is itself
//! parallel.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::domain::backtest::{BacktestConfig, BacktestEngine, BacktestEngineResult};
use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::StratbenchError;
use crate::domain::metrics::PerformanceCalculator;
use crate::domain::optimizer::{
    GridSearchConfig, GridSearchOptimizer, ParameterSet, ParameterSpace, panic_message,
};
use crate::domain::orchestrator::{AnnotatedCandle, IndicatorOrchestrator};
use crate::domain::portfolio::EquityPoint;
use crate::domain::snapshot::IndicatorSettings;
use crate::domain::strategy::{StrategyDefinition, apply_parameters};

const GOOD_OVERFITTING_LIMIT: f64 = 0.30;
const WARNING_OVERFITTING_LIMIT: f64 = 0.50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowMode {
    /// Fixed-length in-sample window sliding by the out-of-sample length.
    #[default]
    Rolling,
    /// In-sample always starts at bar 0 and grows by the out-of-sample length.
    Anchored,
}

impl FromStr for WindowMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rolling" | "sliding" => Ok(WindowMode::Rolling),
            "anchored" | "expanding" => Ok(WindowMode::Anchored),
            other => Err(format!("unknown walk-forward mode '{}'", other)),
        }
    }
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowMode::Rolling => write!(f, "rolling"),
            WindowMode::Anchored => write!(f, "anchored"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverfittingGrade {
    Good,
    Warning,
    Overfitted,
}

impl OverfittingGrade {
    /// Grade an average overfitting score given as a fraction.
    pub fn from_score(score: f64) -> Self {
        if score < GOOD_OVERFITTING_LIMIT {
            OverfittingGrade::Good
        } else if score < WARNING_OVERFITTING_LIMIT {
            OverfittingGrade::Warning
        } else {
            OverfittingGrade::Overfitted
        }
    }
}

impl fmt::Display for OverfittingGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverfittingGrade::Good => "Good",
            OverfittingGrade::Warning => "Warning",
            OverfittingGrade::Overfitted => "Overfitted",
        };
        write!(f, "{}", s)
    }
}

/// In-sample and out-of-sample bar ranges of one window (half-open).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBounds {
    pub in_sample: Range<usize>,
    pub out_of_sample: Range<usize>,
}

/// Window layout over `total_bars` bars. Only windows whose out-of-sample
/// slice fits entirely are produced.
pub fn generate_windows(
    total_bars: usize,
    in_sample_bars: usize,
    out_of_sample_bars: usize,
    mode: WindowMode,
) -> Vec<WindowBounds> {
    if in_sample_bars == 0 || out_of_sample_bars == 0 {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut k = 0usize;
    loop {
        let (is_start, is_end) = match mode {
            WindowMode::Rolling => {
                let start = k * out_of_sample_bars;
                (start, start + in_sample_bars)
            }
            WindowMode::Anchored => (0, in_sample_bars + k * out_of_sample_bars),
        };
        let oos_end = is_end + out_of_sample_bars;
        if oos_end > total_bars {
            break;
        }
        windows.push(WindowBounds {
            in_sample: is_start..is_end,
            out_of_sample: is_end..oos_end,
        });
        k += 1;
    }
    windows
}

/// (is - oos) / |is| and oos / |is|; both zero when the in-sample Sharpe
/// is zero.
pub fn overfitting_and_efficiency(in_sample_sharpe: f64, out_of_sample_sharpe: f64) -> (f64, f64) {
    if in_sample_sharpe == 0.0 {
        return (0.0, 0.0);
    }
    let denom = in_sample_sharpe.abs();
    (
        (in_sample_sharpe - out_of_sample_sharpe) / denom,
        out_of_sample_sharpe / denom,
    )
}

/// Backtests a parameter set over a slice of one symbol's daily bars.
pub trait RangeRunner: Sync {
    fn bar_count(&self) -> usize;

    fn date_at(&self, index: usize) -> Option<NaiveDate>;

    fn run_range(
        &self,
        params: &ParameterSet,
        range: Range<usize>,
    ) -> Result<BacktestEngineResult, StratbenchError>;
}

/// Indicators are computed over the full history, so the first bars of a
/// slice are already warmed up; trading is restricted to the slice.
///
/// Annotated history is cached per distinct indicator settings, so only
/// parameters that change a period trigger a fresh pass.
pub struct StrategyRangeRunner<'a> {
    series: &'a HashMap<Timeframe, Vec<Candle>>,
    strategy: &'a StrategyDefinition,
    config: &'a BacktestConfig,
    dates: Vec<NaiveDate>,
    annotated: Mutex<Vec<(IndicatorSettings, Arc<Vec<AnnotatedCandle>>)>>,
}

impl<'a> StrategyRangeRunner<'a> {
    pub fn new(
        series: &'a HashMap<Timeframe, Vec<Candle>>,
        strategy: &'a StrategyDefinition,
        config: &'a BacktestConfig,
    ) -> Self {
        let dates = series
            .get(&Timeframe::Daily)
            .map(|bars| bars.iter().map(|c| c.date).collect())
            .unwrap_or_default();
        Self {
            series,
            strategy,
            config,
            dates,
            annotated: Mutex::new(Vec::new()),
        }
    }

    fn annotated_bars(
        &self,
        settings: &IndicatorSettings,
    ) -> Result<Arc<Vec<AnnotatedCandle>>, StratbenchError> {
        let cached = self
            .annotated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(s, _)| s == settings)
            .map(|(_, bars)| Arc::clone(bars));
        if let Some(bars) = cached {
            return Ok(bars);
        }

        // Annotate outside the lock; a racing duplicate is dropped below.
        let bars = Arc::new(IndicatorOrchestrator::new(settings.clone()).annotate(self.series)?);
        let mut cache = self.annotated.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, existing)) = cache.iter().find(|(s, _)| s == settings) {
            return Ok(Arc::clone(existing));
        }
        cache.push((settings.clone(), Arc::clone(&bars)));
        Ok(bars)
    }
}

impl RangeRunner for StrategyRangeRunner<'_> {
    fn bar_count(&self) -> usize {
        self.dates.len()
    }

    fn date_at(&self, index: usize) -> Option<NaiveDate> {
        self.dates.get(index).copied()
    }

    fn run_range(
        &self,
        params: &ParameterSet,
        range: Range<usize>,
    ) -> Result<BacktestEngineResult, StratbenchError> {
        let strategy = apply_parameters(self.strategy, params)?;
        let bars = self.annotated_bars(&strategy.indicators)?;
        let end = range.end.min(bars.len());
        let start = range.start.min(end);
        Ok(BacktestEngine::new(&strategy, self.config).run(&bars[start..end]))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardConfig {
    pub mode: WindowMode,
    pub in_sample_bars: usize,
    pub out_of_sample_bars: usize,
    pub grid: GridSearchConfig,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            mode: WindowMode::Rolling,
            in_sample_bars: 252,
            out_of_sample_bars: 63,
            grid: GridSearchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRange {
    /// Inclusive bar indices.
    pub start: usize,
    pub end: usize,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    pub index: usize,
    pub in_sample: BarRange,
    pub out_of_sample: BarRange,
    pub best_parameters: ParameterSet,
    pub in_sample_sharpe: f64,
    pub out_of_sample_sharpe: f64,
    pub overfitting_score: f64,
    pub efficiency: f64,
    pub out_of_sample_trades: usize,
    pub out_of_sample_return: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub mode: WindowMode,
    pub total_bars: usize,
    pub windows: Vec<WalkForwardWindow>,
    pub average_overfitting: f64,
    pub average_efficiency: f64,
    pub average_in_sample_sharpe: f64,
    pub average_out_of_sample_sharpe: f64,
    /// `None` when no window completed.
    pub grade: Option<OverfittingGrade>,
    /// Parameters of the window with the highest out-of-sample Sharpe.
    pub blessed_parameters: Option<ParameterSet>,
    /// Out-of-sample equity curves appended in window order, not re-based.
    pub out_of_sample_curve: Vec<EquityPoint>,
    pub warnings: Vec<String>,
}

pub struct WalkForwardAnalyzer {
    config: WalkForwardConfig,
}

impl WalkForwardAnalyzer {
    pub fn new(config: WalkForwardConfig) -> Self {
        Self { config }
    }

    pub fn run<R: RangeRunner>(&self, space: &ParameterSpace, runner: &R) -> WalkForwardResult {
        let cfg = &self.config;
        let total_bars = runner.bar_count();
        let bounds = generate_windows(total_bars, cfg.in_sample_bars, cfg.out_of_sample_bars, cfg.mode);
        let mut result = WalkForwardResult {
            mode: cfg.mode,
            total_bars,
            ..Default::default()
        };

        if bounds.is_empty() {
            let message = format!(
                "insufficient data for walk-forward: {} bars, need at least {} ({} in-sample + {} out-of-sample)",
                total_bars,
                cfg.in_sample_bars + cfg.out_of_sample_bars,
                cfg.in_sample_bars,
                cfg.out_of_sample_bars
            );
            warn!("{}", message);
            result.warnings.push(message);
            return result;
        }
        info!(windows = bounds.len(), mode = %cfg.mode, "walk-forward starting");

        let calculator = PerformanceCalculator::new(cfg.grid.risk_free_rate);
        let optimizer = GridSearchOptimizer::new(cfg.grid.clone());

        for (index, window) in bounds.into_iter().enumerate() {
            let is_range = window.in_sample.clone();
            let in_sample_runner =
                |params: &ParameterSet| runner.run_range(params, is_range.clone());
            let search = optimizer.run(space, &in_sample_runner);
            result.warnings.extend(
                search
                    .warnings
                    .iter()
                    .map(|w| format!("window {}: {}", index, w)),
            );

            let Some(best) = search.best() else {
                let message = format!("window {}: no successful in-sample trial", index);
                warn!("{}", message);
                result.warnings.push(message);
                continue;
            };

            let oos_range = window.out_of_sample.clone();
            let outcome =
                catch_unwind(AssertUnwindSafe(|| runner.run_range(&best.parameters, oos_range)));
            let oos = match outcome {
                Ok(Ok(oos)) => oos,
                Ok(Err(e)) => {
                    let message = format!("window {}: out-of-sample run failed: {}", index, e);
                    warn!("{}", message);
                    result.warnings.push(message);
                    continue;
                }
                Err(payload) => {
                    let message = format!(
                        "window {}: out-of-sample run {}",
                        index,
                        panic_message(payload.as_ref())
                    );
                    warn!("{}", message);
                    result.warnings.push(message);
                    continue;
                }
            };
            let oos_metrics = calculator.from_result(&oos);
            let (overfitting_score, efficiency) =
                overfitting_and_efficiency(best.score, oos_metrics.sharpe_ratio);
            info!(
                window = index,
                is_sharpe = best.score,
                oos_sharpe = oos_metrics.sharpe_ratio,
                overfitting_score,
                "walk-forward window complete"
            );

            result.out_of_sample_curve.extend(oos.equity_curve.iter().copied());
            result.windows.push(WalkForwardWindow {
                index,
                in_sample: bar_range(runner, &window.in_sample),
                out_of_sample: bar_range(runner, &window.out_of_sample),
                best_parameters: best.parameters.clone(),
                in_sample_sharpe: best.score,
                out_of_sample_sharpe: oos_metrics.sharpe_ratio,
                overfitting_score,
                efficiency,
                out_of_sample_trades: oos.trades.len(),
                out_of_sample_return: oos_metrics.total_return,
            });
        }

        summarize(&mut result);
        result
    }
}

fn bar_range<R: RangeRunner>(runner: &R, range: &Range<usize>) -> BarRange {
    let end = range.end.saturating_sub(1);
    BarRange {
        start: range.start,
        end,
        start_date: runner.date_at(range.start),
        end_date: runner.date_at(end),
    }
}

fn summarize(result: &mut WalkForwardResult) {
    let windows = &result.windows;
    if windows.is_empty() {
        return;
    }
    let n = windows.len() as f64;
    let avg = |f: fn(&WalkForwardWindow) -> f64| windows.iter().map(f).sum::<f64>() / n;
    result.average_overfitting = avg(|w| w.overfitting_score);
    result.average_efficiency = avg(|w| w.efficiency);
    result.average_in_sample_sharpe = avg(|w| w.in_sample_sharpe);
    result.average_out_of_sample_sharpe = avg(|w| w.out_of_sample_sharpe);
    result.grade = Some(OverfittingGrade::from_score(result.average_overfitting));

    let mut blessed = &windows[0];
    for window in &windows[1..] {
        if window.out_of_sample_sharpe > blessed.out_of_sample_sharpe {
            blessed = window;
        }
    }
    result.blessed_parameters = Some(blessed.best_parameters.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::optimizer::ParameterDefinition;
    use chrono::Duration;

    #[test]
    fn rolling_windows_over_800_bars() {
        let windows = generate_windows(800, 300, 100, WindowMode::Rolling);
        assert_eq!(windows.len(), 5);
        assert_eq!(windows[0].in_sample, 0..300);
        assert_eq!(windows[0].out_of_sample, 300..400);
        assert_eq!(windows[4].out_of_sample, 700..800);
        assert!(windows.iter().all(|w| w.in_sample.len() == 300));
    }

    #[test]
    fn anchored_in_sample_grows() {
        let windows = generate_windows(800, 300, 100, WindowMode::Anchored);
        assert_eq!(windows.len(), 5);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].in_sample.start, 0);
            assert!(pair[1].in_sample.end > pair[0].in_sample.end);
        }
    }

    #[test]
    fn too_few_bars_yields_no_windows() {
        assert!(generate_windows(350, 300, 100, WindowMode::Rolling).is_empty());
        assert!(generate_windows(800, 0, 100, WindowMode::Rolling).is_empty());
    }

    #[test]
    fn overfitting_formula() {
        let (o, e) = overfitting_and_efficiency(2.0, 1.0);
        assert!((o - 0.5).abs() < f64::EPSILON);
        assert!((e - 0.5).abs() < f64::EPSILON);
        assert_eq!(overfitting_and_efficiency(0.0, 1.0), (0.0, 0.0));
        let (o, e) = overfitting_and_efficiency(-1.0, -2.0);
        assert!((o - 1.0).abs() < f64::EPSILON);
        assert!((e + 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn grade_thresholds() {
        assert_eq!(OverfittingGrade::from_score(0.29), OverfittingGrade::Good);
        assert_eq!(OverfittingGrade::from_score(0.30), OverfittingGrade::Warning);
        assert_eq!(OverfittingGrade::from_score(0.49), OverfittingGrade::Warning);
        assert_eq!(OverfittingGrade::from_score(0.50), OverfittingGrade::Overfitted);
        assert_eq!(OverfittingGrade::from_score(-0.2), OverfittingGrade::Good);
    }

    /// Growth per bar is `g / 1000` in sample and rises with the window's
    /// start index out of sample.
    struct SyntheticRunner {
        bars: usize,
    }

    impl SyntheticRunner {
        fn day(i: usize) -> NaiveDate {
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(i as i64)
        }
    }

    impl RangeRunner for SyntheticRunner {
        fn bar_count(&self) -> usize {
            self.bars
        }

        fn date_at(&self, index: usize) -> Option<NaiveDate> {
            (index < self.bars).then(|| Self::day(index))
        }

        fn run_range(
            &self,
            params: &ParameterSet,
            range: Range<usize>,
        ) -> Result<BacktestEngineResult, StratbenchError> {
            let g = params.get("g").unwrap_or(0.0);
            let growth = if range.start == 0 || range.len() > 50 {
                g / 1000.0
            } else {
                range.start as f64 / 1_000_000.0
            };
            let mut equity = 10_000.0;
            let curve = range
                .clone()
                .map(|i| {
                    equity *= 1.0 + growth + if i % 2 == 0 { 0.002 } else { -0.002 };
                    EquityPoint {
                        date: Self::day(i),
                        equity,
                    }
                })
                .collect();
            Ok(BacktestEngineResult {
                equity_curve: curve,
                initial_capital: 10_000.0,
                final_equity: equity,
                ..Default::default()
            })
        }
    }

    fn config() -> WalkForwardConfig {
        WalkForwardConfig {
            mode: WindowMode::Rolling,
            in_sample_bars: 100,
            out_of_sample_bars: 20,
            grid: GridSearchConfig {
                top_k: 3,
                parallel: false,
                risk_free_rate: 0.0,
            },
        }
    }

    #[test]
    fn analyzer_runs_each_window() {
        let space = ParameterSpace::new(vec![ParameterDefinition::new("g", 1.0, 3.0, 1.0)]);
        let runner = SyntheticRunner { bars: 160 };
        let result = WalkForwardAnalyzer::new(config()).run(&space, &runner);

        assert_eq!(result.windows.len(), 3);
        assert!(result.warnings.is_empty());
        for w in &result.windows {
            assert_eq!(w.best_parameters.get("g"), Some(3.0));
            assert!(w.in_sample_sharpe > w.out_of_sample_sharpe);
        }
        assert_eq!(result.windows[0].in_sample.end, 99);
        assert_eq!(result.windows[0].out_of_sample.start, 100);
        assert_eq!(result.windows[0].out_of_sample.start_date, Some(SyntheticRunner::day(100)));
        assert_eq!(result.out_of_sample_curve.len(), 60);
        assert!(result.grade.is_some());
    }

    #[test]
    fn blessed_parameters_come_from_best_out_of_sample_window() {
        let space = ParameterSpace::new(vec![ParameterDefinition::new("g", 1.0, 3.0, 1.0)]);
        let runner = SyntheticRunner { bars: 160 };
        let result = WalkForwardAnalyzer::new(config()).run(&space, &runner);
        let best_oos = result
            .windows
            .iter()
            .map(|w| w.out_of_sample_sharpe)
            .fold(f64::MIN, f64::max);
        assert!((result.windows[2].out_of_sample_sharpe - best_oos).abs() < f64::EPSILON);
        assert_eq!(result.blessed_parameters, Some(result.windows[2].best_parameters.clone()));
    }

    #[test]
    fn insufficient_bars_is_a_warning() {
        let space = ParameterSpace::new(vec![ParameterDefinition::new("g", 1.0, 2.0, 1.0)]);
        let runner = SyntheticRunner { bars: 50 };
        let result = WalkForwardAnalyzer::new(config()).run(&space, &runner);
        assert!(result.windows.is_empty());
        assert_eq!(result.grade, None);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("insufficient data"));
    }

    #[test]
    fn empty_space_skips_every_window() {
        let runner = SyntheticRunner { bars: 160 };
        let result = WalkForwardAnalyzer::new(config()).run(&ParameterSpace::default(), &runner);
        assert!(result.windows.is_empty());
        assert_eq!(result.warnings.len(), 3);
        assert!(result.blessed_parameters.is_none());
    }

    struct PanicsOnRange {
        inner: SyntheticRunner,
        broken: Range<usize>,
    }

    impl RangeRunner for PanicsOnRange {
        fn bar_count(&self) -> usize {
            self.inner.bar_count()
        }

        fn date_at(&self, index: usize) -> Option<NaiveDate> {
            self.inner.date_at(index)
        }

        fn run_range(
            &self,
            params: &ParameterSet,
            range: Range<usize>,
        ) -> Result<BacktestEngineResult, StratbenchError> {
            if range == self.broken {
                panic!("corrupt slice");
            }
            self.inner.run_range(params, range)
        }
    }

    #[test]
    fn out_of_sample_panic_skips_only_that_window() {
        let space = ParameterSpace::new(vec![ParameterDefinition::new("g", 1.0, 3.0, 1.0)]);
        let runner = PanicsOnRange {
            inner: SyntheticRunner { bars: 160 },
            broken: 120..140,
        };
        let result = WalkForwardAnalyzer::new(config()).run(&space, &runner);

        let indices: Vec<usize> = result.windows.iter().map(|w| w.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("window 1: out-of-sample run panicked"));
        assert!(result.warnings[0].contains("corrupt slice"));
        assert_eq!(result.out_of_sample_curve.len(), 40);
        assert!(result.grade.is_some());
    }

    fn daily_series(n: usize) -> HashMap<Timeframe, Vec<Candle>> {
        let bars = (0..n)
            .map(|i| {
                let close = 100.0 + 5.0 * (i as f64 / 5.0).sin();
                Candle {
                    symbol: "WF".into(),
                    date: SyntheticRunner::day(i),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000,
                    timeframe: Timeframe::Daily,
                }
            })
            .collect();
        HashMap::from([(Timeframe::Daily, bars)])
    }

    #[test]
    fn range_runner_annotates_once_per_indicator_settings() {
        let series = daily_series(120);
        let strategy = StrategyDefinition::default();
        let config = BacktestConfig::default();
        let runner = StrategyRangeRunner::new(&series, &strategy, &config);

        let mut stop = ParameterSet::default();
        stop.insert("stop_multiplier", 3.0);
        let first = runner.run_range(&stop, 0..60).unwrap();
        let again = runner.run_range(&stop, 0..60).unwrap();
        assert_eq!(first, again);
        runner.run_range(&ParameterSet::default(), 60..120).unwrap();
        assert_eq!(runner.annotated.lock().unwrap().len(), 1);

        let mut period = ParameterSet::default();
        period.insert("rsi_period", 7.0);
        let cached = runner.run_range(&period, 0..60).unwrap();
        assert_eq!(runner.annotated.lock().unwrap().len(), 2);

        let strategy7 = apply_parameters(&strategy, &period).unwrap();
        let fresh = IndicatorOrchestrator::new(strategy7.indicators.clone())
            .annotate(&series)
            .unwrap();
        let direct = BacktestEngine::new(&strategy7, &config).run(&fresh[0..60]);
        assert_eq!(cached, direct);
    }
}
