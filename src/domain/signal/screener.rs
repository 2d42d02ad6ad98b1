//! Universe screener.
//!
//! For every symbol the latest bar must pass the strategy's filters and fire
//! its entry conditions. Candidates are evaluated, graded on their
//! stop/target geometry, and the best `top_n` at or above `min_grade` are
//! returned. Symbols are independent, so the scan runs on rayon.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, info, warn};

use super::Direction;
use super::evaluator::{SignalEvaluation, SignalEvaluator};
use super::grader::{ConfidenceGrader, ConfidenceScore, Grade};
use crate::domain::condition_eval::evaluate;
use crate::domain::execution::{RejectionReason, stop_loss_price, take_profit_price};
use crate::domain::optimizer::panic_message;
use crate::domain::orchestrator::AnnotatedCandle;
use crate::domain::strategy::StrategyDefinition;

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenerConfig {
    pub direction: Direction,
    pub top_n: usize,
    pub min_grade: Grade,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Long,
            top_n: 20,
            min_grade: Grade::F,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedSignal {
    pub symbol: String,
    pub date: NaiveDate,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    /// Zero when the strategy sets no target.
    pub take_profit: f64,
    pub risk_reward: f64,
    pub evaluation: SignalEvaluation,
    pub confidence: ConfidenceScore,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenerRunResult {
    /// Best confidence first.
    pub signals: Vec<ScreenedSignal>,
    pub symbols_scanned: usize,
    pub candidates: usize,
    /// `symbol: reason` for symbols that never reached grading.
    pub skipped: Vec<String>,
}

enum Outcome {
    Signal(Box<ScreenedSignal>),
    Skipped(String),
    NoEntry,
}

pub struct ScreenerEngine<'a> {
    strategy: &'a StrategyDefinition,
    config: ScreenerConfig,
    evaluator: SignalEvaluator,
    grader: ConfidenceGrader,
}

impl<'a> ScreenerEngine<'a> {
    pub fn new(strategy: &'a StrategyDefinition, config: ScreenerConfig) -> Self {
        Self {
            strategy,
            config,
            evaluator: SignalEvaluator::default(),
            grader: ConfidenceGrader,
        }
    }

    pub fn with_evaluator(mut self, evaluator: SignalEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// `win_rates` maps symbol to a historical win rate fraction.
    pub fn scan(
        &self,
        universe: &HashMap<String, Vec<AnnotatedCandle>>,
        win_rates: &HashMap<String, f64>,
    ) -> ScreenerRunResult {
        let mut symbols: Vec<&String> = universe.keys().collect();
        symbols.sort();

        let outcomes: Vec<Outcome> = symbols
            .par_iter()
            .map(|symbol| {
                let bars = universe.get(*symbol).map(Vec::as_slice).unwrap_or_default();
                let win_rate = win_rates.get(*symbol).copied();
                catch_unwind(AssertUnwindSafe(|| self.screen_symbol(symbol, bars, win_rate)))
                    .unwrap_or_else(|payload| {
                        let reason = panic_message(payload.as_ref());
                        warn!(symbol = %symbol, %reason, "screening failed");
                        Outcome::Skipped(format!("{}: {}", symbol, reason))
                    })
            })
            .collect();

        let mut result = ScreenerRunResult {
            symbols_scanned: symbols.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Signal(signal) => {
                    result.candidates += 1;
                    if signal.confidence.grade >= self.config.min_grade {
                        result.signals.push(*signal);
                    }
                }
                Outcome::Skipped(reason) => result.skipped.push(reason),
                Outcome::NoEntry => {}
            }
        }

        result.signals.sort_by(|a, b| {
            b.confidence
                .score
                .total_cmp(&a.confidence.score)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        result.signals.truncate(self.config.top_n);
        info!(
            scanned = result.symbols_scanned,
            candidates = result.candidates,
            returned = result.signals.len(),
            "screen complete"
        );
        result
    }

    fn screen_symbol(&self, symbol: &str, bars: &[AnnotatedCandle], win_rate: Option<f64>) -> Outcome {
        let Some((latest, history)) = bars.split_last() else {
            return Outcome::Skipped(format!("{}: no bars", symbol));
        };
        let candle = &latest.candle;

        if let Some(reason) = self.strategy.filters.check(candle.close, candle.volume) {
            debug!(symbol, %reason, "filtered");
            return Outcome::Skipped(format!("{}: {}", symbol, reason));
        }
        if !evaluate(&self.strategy.entry, latest, history.last()) {
            return Outcome::NoEntry;
        }

        let entry = candle.close;
        let long_stop = stop_loss_price(&self.strategy.stop_loss, entry, latest.indicators.atr);
        let long_target = take_profit_price(&self.strategy.take_profit, entry, long_stop);
        let (stop_loss, take_profit) = match self.config.direction {
            Direction::Long => (long_stop, long_target),
            Direction::Short => (
                2.0 * entry - long_stop,
                if long_target > 0.0 { 2.0 * entry - long_target } else { 0.0 },
            ),
        };
        let risk = (entry - stop_loss).abs();
        if risk <= 0.0 {
            debug!(symbol, entry, stop_loss, "stop does not bound risk");
            return Outcome::Skipped(format!("{}: {}", symbol, RejectionReason::InvalidStop));
        }
        let risk_reward = if take_profit > 0.0 {
            (take_profit - entry).abs() / risk
        } else {
            0.0
        };

        let Some(evaluation) = self.evaluator.evaluate(bars, self.config.direction) else {
            return Outcome::Skipped(format!("{}: no bars", symbol));
        };
        let confidence = self.grader.grade(&evaluation, risk_reward, win_rate);
        debug!(symbol, score = confidence.score, grade = %confidence.grade, "graded");

        Outcome::Signal(Box::new(ScreenedSignal {
            symbol: symbol.to_string(),
            date: candle.date,
            direction: self.config.direction,
            entry_price: entry,
            stop_loss,
            take_profit,
            risk_reward,
            evaluation,
            confidence,
        }))
    }
}
