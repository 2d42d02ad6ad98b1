#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use stratbench::domain::backtest::BacktestConfig;
use stratbench::domain::candle::{Candle, Timeframe, resample};
use stratbench::domain::condition::{Comparator, Condition, ConditionGroup, Target};
use stratbench::domain::error::StratbenchError;
use stratbench::domain::snapshot::IndicatorKind;
use stratbench::domain::strategy::StrategyDefinition;
use stratbench::ports::data_port::DataPort;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Candle>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Candle>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Candle>, StratbenchError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(StratbenchError::DataSource {
                reason: reason.clone(),
            });
        }
        if timeframe != Timeframe::Daily {
            return Ok(Vec::new());
        }
        Ok(self
            .data
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|c| c.date >= start && c.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, StratbenchError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Deterministic oscillating series: a slow sine swing on a gentle uptrend,
/// one bar per calendar day from 2022-01-01.
pub fn wave_bars(symbol: &str, count: usize, base: f64) -> Vec<Candle> {
    let start = date(2022, 1, 1);
    let mut prev_close = base;
    (0..count)
        .map(|i| {
            let t = i as f64;
            let close = base + 10.0 * (t / 8.0).sin() + 0.05 * t;
            let open = prev_close;
            prev_close = close;
            Candle {
                symbol: symbol.to_string(),
                date: start + Duration::days(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1_000 + (i as i64 % 7) * 100,
                timeframe: Timeframe::Daily,
            }
        })
        .collect()
}

/// Daily bars plus resampled weekly and monthly series.
pub fn series_of(daily: Vec<Candle>) -> HashMap<Timeframe, Vec<Candle>> {
    let weekly = resample(&daily, Timeframe::Weekly);
    let monthly = resample(&daily, Timeframe::Monthly);
    HashMap::from([
        (Timeframe::Daily, daily),
        (Timeframe::Weekly, weekly),
        (Timeframe::Monthly, monthly),
    ])
}

fn rsi_condition(comparator: Comparator, level: f64) -> ConditionGroup {
    ConditionGroup::single(Condition::new(
        IndicatorKind::Rsi,
        comparator,
        Target::Constant(level),
    ))
}

/// Buy RSI dips, sell RSI strength.
pub fn rsi_swing_strategy() -> StrategyDefinition {
    StrategyDefinition {
        name: "RSI Swing".into(),
        entry: vec![rsi_condition(Comparator::LessThan, 45.0)],
        exit: vec![rsi_condition(Comparator::GreaterThan, 55.0)],
        ..Default::default()
    }
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig {
        initial_capital: 100_000.0,
        commission_per_trade: 5.0,
        commission_pct: 0.05,
        slippage_pct: 0.02,
        ..Default::default()
    }
}

pub fn write_csv(dir: &Path, file_stem: &str, bars: &[Candle]) {
    let mut content = String::from("date,open,high,low,close,volume\n");
    for c in bars {
        content.push_str(&format!(
            "{},{:.4},{:.4},{:.4},{:.4},{}\n",
            c.date.format("%Y-%m-%d"),
            c.open,
            c.high,
            c.low,
            c.close,
            c.volume
        ));
    }
    fs::write(dir.join(format!("{}.csv", file_stem)), content).unwrap();
}
