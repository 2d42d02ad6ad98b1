//! Grid search over a parameter space.
//!
//! Every combination runs through an injected [`TrialRunner`] and the
//! performance calculator, and trials are ranked by Sharpe ratio. Parallel
//! mode gives each rayon worker its own top-K and merges them in a reduce
//! step, so no collection is shared across threads. Ties on score are broken
//! by enumeration order, which makes sequential and parallel results equal.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::backtest::{BacktestConfig, BacktestEngineResult, run_backtest};
use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::StratbenchError;
use crate::domain::metrics::{PerformanceCalculator, PerformanceMetrics};
use crate::domain::strategy::{StrategyDefinition, apply_parameters};

/// Combination counts above this still run but produce a warning.
pub const LARGE_SPACE_WARNING: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            step,
        }
    }

    /// `min, min + step, ...` up to and including `max`. A non-positive step
    /// yields `min` alone; `max < min` yields nothing.
    pub fn values(&self) -> Vec<f64> {
        if self.max < self.min {
            return Vec::new();
        }
        if self.step <= 0.0 {
            return vec![self.min];
        }
        let count = ((self.max - self.min) / self.step + 1e-9).floor() as usize + 1;
        (0..count).map(|k| self.min + k as f64 * self.step).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub parameters: Vec<ParameterDefinition>,
}

impl ParameterSpace {
    pub fn new(parameters: Vec<ParameterDefinition>) -> Self {
        Self { parameters }
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn total_combinations(&self) -> usize {
        if self.parameters.is_empty() {
            return 0;
        }
        self.parameters
            .iter()
            .map(|p| p.values().len())
            .fold(1usize, usize::saturating_mul)
    }

    pub fn combinations(&self) -> Combinations {
        let values: Vec<Vec<f64>> = self.parameters.iter().map(|p| p.values()).collect();
        let exhausted = values.is_empty() || values.iter().any(Vec::is_empty);
        Combinations {
            names: self.parameters.iter().map(|p| p.name.clone()).collect(),
            indices: vec![0; values.len()],
            values,
            exhausted,
        }
    }
}

/// Odometer over a parameter space; the rightmost parameter moves fastest.
pub struct Combinations {
    names: Vec<String>,
    values: Vec<Vec<f64>>,
    indices: Vec<usize>,
    exhausted: bool,
}

impl Iterator for Combinations {
    type Item = ParameterSet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let mut set = ParameterSet::default();
        for ((name, values), &idx) in self.names.iter().zip(&self.values).zip(&self.indices) {
            set.insert(name.as_str(), values[idx]);
        }

        let mut pos = self.indices.len();
        loop {
            if pos == 0 {
                self.exhausted = true;
                break;
            }
            pos -= 1;
            self.indices[pos] += 1;
            if self.indices[pos] < self.values[pos].len() {
                break;
            }
            self.indices[pos] = 0;
        }
        Some(set)
    }
}

/// Named parameter values for one trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, f64>);

impl ParameterSet {
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Runs one backtest for a parameter combination.
pub trait TrialRunner: Sync {
    fn run_trial(&self, params: &ParameterSet) -> Result<BacktestEngineResult, StratbenchError>;
}

impl<F> TrialRunner for F
where
    F: Fn(&ParameterSet) -> Result<BacktestEngineResult, StratbenchError> + Sync,
{
    fn run_trial(&self, params: &ParameterSet) -> Result<BacktestEngineResult, StratbenchError> {
        self(params)
    }
}

/// Applies each parameter set to a base strategy and backtests it over
/// pre-loaded series.
pub struct StrategyRunner<'a> {
    pub series: &'a HashMap<Timeframe, Vec<Candle>>,
    pub strategy: &'a StrategyDefinition,
    pub config: &'a BacktestConfig,
}

impl TrialRunner for StrategyRunner<'_> {
    fn run_trial(&self, params: &ParameterSet) -> Result<BacktestEngineResult, StratbenchError> {
        let strategy = apply_parameters(self.strategy, params)?;
        run_backtest(self.series, &strategy, self.config)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridSearchConfig {
    pub top_k: usize,
    pub parallel: bool,
    pub risk_free_rate: f64,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            parallel: true,
            risk_free_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationTrial {
    pub parameters: ParameterSet,
    pub metrics: PerformanceMetrics,
    /// Sharpe ratio of the trial.
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridSearchResult {
    /// Best first, at most `top_k`.
    pub trials: Vec<OptimizationTrial>,
    pub total_combinations: usize,
    pub completed_combinations: usize,
    pub failed_combinations: usize,
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
    pub cancelled: bool,
}

impl GridSearchResult {
    pub fn best(&self) -> Option<&OptimizationTrial> {
        self.trials.first()
    }
}

/// Per-worker accumulator merged in the reduce step.
#[derive(Default)]
struct TrialAccumulator {
    top: Vec<(usize, OptimizationTrial)>,
    completed: usize,
    failed: usize,
    failures: Vec<(usize, String)>,
    skipped: usize,
}

impl TrialAccumulator {
    fn offer(&mut self, index: usize, trial: OptimizationTrial, top_k: usize) {
        self.top.push((index, trial));
        rank(&mut self.top);
        self.top.truncate(top_k);
    }

    fn merge(mut self, other: Self, top_k: usize) -> Self {
        self.top.extend(other.top);
        rank(&mut self.top);
        self.top.truncate(top_k);
        self.completed += other.completed;
        self.failed += other.failed;
        self.failures.extend(other.failures);
        self.skipped += other.skipped;
        self
    }
}

fn rank(trials: &mut [(usize, OptimizationTrial)]) {
    trials.sort_by(|(ia, a), (ib, b)| b.score.total_cmp(&a.score).then(ia.cmp(ib)));
}

pub struct GridSearchOptimizer {
    config: GridSearchConfig,
    cancel: Arc<AtomicBool>,
}

impl GridSearchOptimizer {
    pub fn new(config: GridSearchConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a cancellation flag. Checked before each trial starts.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run<R: TrialRunner + ?Sized>(
        &self,
        space: &ParameterSpace,
        runner: &R,
    ) -> GridSearchResult {
        let started = Instant::now();
        let total = space.total_combinations();
        let mut warnings = Vec::new();
        if total > LARGE_SPACE_WARNING {
            let message = format!(
                "large parameter space: {} combinations (over {})",
                total, LARGE_SPACE_WARNING
            );
            warn!("{}", message);
            warnings.push(message);
        }
        info!(total, parallel = self.config.parallel, "grid search starting");

        let top_k = self.config.top_k.max(1);
        let calculator = PerformanceCalculator::new(self.config.risk_free_rate);
        let step = |mut acc: TrialAccumulator, (index, params): (usize, ParameterSet)| {
            if self.cancel.load(Ordering::Relaxed) {
                acc.skipped += 1;
                return acc;
            }
            acc.completed += 1;
            match evaluate_trial(runner, &calculator, &params) {
                Ok(trial) => acc.offer(index, trial, top_k),
                Err(reason) => {
                    warn!(params = %params, %reason, "trial failed");
                    acc.failed += 1;
                    acc.failures.push((index, format!("trial {{{}}} failed: {}", params, reason)));
                }
            }
            acc
        };

        let acc = if self.config.parallel {
            let combos: Vec<(usize, ParameterSet)> = space.combinations().enumerate().collect();
            combos
                .into_par_iter()
                .fold(TrialAccumulator::default, step)
                .reduce(TrialAccumulator::default, |a, b| a.merge(b, top_k))
        } else {
            space
                .combinations()
                .enumerate()
                .fold(TrialAccumulator::default(), step)
        };

        let mut failures = acc.failures;
        failures.sort_by_key(|(index, _)| *index);
        warnings.extend(failures.into_iter().map(|(_, message)| message));
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            completed = acc.completed,
            failed = acc.failed,
            elapsed_ms,
            "grid search finished"
        );

        GridSearchResult {
            trials: acc.top.into_iter().map(|(_, trial)| trial).collect(),
            total_combinations: total,
            completed_combinations: acc.completed,
            failed_combinations: acc.failed,
            warnings,
            elapsed_ms,
            cancelled: acc.skipped > 0,
        }
    }
}

fn evaluate_trial<R: TrialRunner + ?Sized>(
    runner: &R,
    calculator: &PerformanceCalculator,
    params: &ParameterSet,
) -> Result<OptimizationTrial, String> {
    let outcome = catch_unwind(AssertUnwindSafe(|| runner.run_trial(params)));
    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return Err(e.to_string()),
        Err(payload) => return Err(panic_message(payload.as_ref())),
    };
    let metrics = calculator.from_result(&result);
    debug!(params = %params, sharpe = metrics.sharpe_ratio, "trial complete");
    Ok(OptimizationTrial {
        parameters: params.clone(),
        score: metrics.sharpe_ratio,
        metrics,
    })
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::EquityPoint;
    use chrono::{Duration, NaiveDate};

    type Outcome = Result<BacktestEngineResult, StratbenchError>;

    fn space(defs: &[(&str, f64, f64, f64)]) -> ParameterSpace {
        ParameterSpace::new(
            defs.iter()
                .map(|(n, min, max, step)| ParameterDefinition::new(*n, *min, *max, *step))
                .collect(),
        )
    }

    /// Equity rises by `growth` per bar with a small wobble so Sharpe is
    /// finite and ordered by `growth`.
    fn synthetic_result(growth: f64) -> BacktestEngineResult {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut equity = 10_000.0;
        let curve = (0..30)
            .map(|i| {
                equity *= 1.0 + growth + if i % 2 == 0 { 0.001 } else { -0.001 };
                EquityPoint {
                    date: start + Duration::days(i),
                    equity,
                }
            })
            .collect();
        BacktestEngineResult {
            equity_curve: curve,
            initial_capital: 10_000.0,
            final_equity: equity,
            ..Default::default()
        }
    }

    #[test]
    fn values_include_max() {
        let def = ParameterDefinition::new("p", 10.0, 30.0, 10.0);
        assert_eq!(def.values(), vec![10.0, 20.0, 30.0]);
        let frac = ParameterDefinition::new("p", 0.5, 1.0, 0.1);
        assert_eq!(frac.values().len(), 6);
    }

    #[test]
    fn empty_space_has_no_combinations() {
        let s = ParameterSpace::default();
        assert_eq!(s.total_combinations(), 0);
        assert_eq!(s.combinations().count(), 0);
    }

    #[test]
    fn odometer_moves_rightmost_fastest() {
        let s = space(&[("a", 1.0, 2.0, 1.0), ("b", 10.0, 30.0, 10.0)]);
        assert_eq!(s.total_combinations(), 6);
        let combos: Vec<(f64, f64)> = s
            .combinations()
            .map(|p| (p.get("a").unwrap(), p.get("b").unwrap()))
            .collect();
        assert_eq!(
            combos,
            vec![
                (1.0, 10.0),
                (1.0, 20.0),
                (1.0, 30.0),
                (2.0, 10.0),
                (2.0, 20.0),
                (2.0, 30.0)
            ]
        );
    }

    #[test]
    fn ranks_by_sharpe_and_keeps_top_k() {
        let s = space(&[("g", 1.0, 5.0, 1.0)]);
        let runner = |p: &ParameterSet| -> Outcome { Ok(synthetic_result(p.get("g").unwrap_or(0.0) / 1000.0)) };
        let optimizer = GridSearchOptimizer::new(GridSearchConfig {
            top_k: 3,
            parallel: false,
            risk_free_rate: 0.0,
        });
        let result = optimizer.run(&s, &runner);
        assert_eq!(result.total_combinations, 5);
        assert_eq!(result.completed_combinations, 5);
        assert_eq!(result.trials.len(), 3);
        assert_eq!(result.best().unwrap().parameters.get("g"), Some(5.0));
        assert!(result.trials[0].score >= result.trials[1].score);
    }

    #[test]
    fn parallel_matches_sequential() {
        let s = space(&[("a", 1.0, 3.0, 1.0), ("b", 1.0, 3.0, 1.0)]);
        // a and b only matter through their sum, so scores tie
        let runner = |p: &ParameterSet| -> Outcome {
            let g = p.get("a").unwrap_or(0.0) + p.get("b").unwrap_or(0.0);
            Ok(synthetic_result(g / 1000.0))
        };
        let seq = GridSearchOptimizer::new(GridSearchConfig {
            top_k: 9,
            parallel: false,
            risk_free_rate: 0.0,
        })
        .run(&s, &runner);
        let par = GridSearchOptimizer::new(GridSearchConfig {
            top_k: 9,
            parallel: true,
            risk_free_rate: 0.0,
        })
        .run(&s, &runner);
        assert_eq!(seq.completed_combinations, 9);
        let seq_params: Vec<_> = seq.trials.iter().map(|t| t.parameters.clone()).collect();
        let par_params: Vec<_> = par.trials.iter().map(|t| t.parameters.clone()).collect();
        assert_eq!(seq_params, par_params);
    }

    #[test]
    fn failing_and_panicking_trials_are_counted() {
        let s = space(&[("g", 1.0, 4.0, 1.0)]);
        let runner = |p: &ParameterSet| -> Outcome {
            match p.get("g") {
            Some(g) if g == 2.0 => Err(StratbenchError::TrialFailed {
                reason: "boom".into(),
            }),
            Some(g) if g == 3.0 => panic!("bad combination"),
            Some(g) => Ok(synthetic_result(g / 1000.0)),
            None => Ok(synthetic_result(0.0)),
            }
        };
        let result = GridSearchOptimizer::new(GridSearchConfig::default()).run(&s, &runner);
        assert_eq!(result.completed_combinations, 4);
        assert_eq!(result.failed_combinations, 2);
        assert_eq!(result.trials.len(), 2);
        assert!(result.warnings.iter().any(|w| w.contains("boom")));
        assert!(result.warnings.iter().any(|w| w.contains("bad combination")));
    }

    #[test]
    fn cancelled_before_start_runs_nothing() {
        let s = space(&[("g", 1.0, 3.0, 1.0)]);
        let runner = |_: &ParameterSet| -> Outcome { Ok(synthetic_result(0.001)) };
        let optimizer = GridSearchOptimizer::new(GridSearchConfig::default());
        optimizer.cancel_flag().store(true, Ordering::Relaxed);
        let result = optimizer.run(&s, &runner);
        assert!(result.cancelled);
        assert_eq!(result.completed_combinations, 0);
        assert!(result.trials.is_empty());
    }

    #[test]
    fn large_space_warns() {
        let s = space(&[("a", 1.0, 200.0, 1.0), ("b", 1.0, 60.0, 1.0)]);
        assert_eq!(s.total_combinations(), 12_000);
        let runner = |_: &ParameterSet| -> Outcome { Ok(BacktestEngineResult::default()) };
        let result = GridSearchOptimizer::new(GridSearchConfig {
            top_k: 1,
            parallel: true,
            risk_free_rate: 0.0,
        })
        .run(&s, &runner);
        assert_eq!(result.completed_combinations, 12_000);
        assert!(result.warnings[0].contains("large parameter space"));
    }

    #[test]
    fn parameter_set_display_is_sorted() {
        let mut set = ParameterSet::default();
        set.insert("rsi_period", 14.0);
        set.insert("atr_period", 10.0);
        assert_eq!(set.to_string(), "atr_period=10, rsi_period=14");
    }
}
