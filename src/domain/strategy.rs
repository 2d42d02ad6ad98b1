//! Strategy definition and parameter application.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::condition::{ConditionGroup, Target};
use crate::domain::error::StratbenchError;
use crate::domain::execution::RejectionReason;
use crate::domain::optimizer::ParameterSet;
use crate::domain::snapshot::IndicatorSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopLossKind {
    /// entry - ATR x multiplier
    Atr,
    /// entry x (1 - multiplier / 100)
    FixedPercent,
}

impl FromStr for StopLossKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atr" => Ok(StopLossKind::Atr),
            "fixed_percent" | "fixed" | "percent" => Ok(StopLossKind::FixedPercent),
            other => Err(format!("unknown stop loss type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TakeProfitKind {
    /// entry + (entry - stop) x multiplier
    RMultiple,
    /// entry x (1 + multiplier / 100)
    FixedPercent,
    None,
}

impl TakeProfitKind {
    /// Unrecognised names mean "no target".
    pub fn from_name(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "r_multiple" | "rmultiple" | "r" => TakeProfitKind::RMultiple,
            "fixed_percent" | "fixed" | "percent" => TakeProfitKind::FixedPercent,
            _ => TakeProfitKind::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopLossSpec {
    pub kind: StopLossKind,
    pub multiplier: f64,
}

impl Default for StopLossSpec {
    fn default() -> Self {
        Self {
            kind: StopLossKind::Atr,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitSpec {
    pub kind: TakeProfitKind,
    pub multiplier: f64,
}

impl Default for TakeProfitSpec {
    fn default() -> Self {
        Self {
            kind: TakeProfitKind::RMultiple,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSizing {
    pub risk_percent: f64,
    pub max_positions: usize,
    pub max_portfolio_heat_percent: f64,
    /// Drawdown that trips the circuit breaker. Zero disables it.
    pub max_drawdown_percent: f64,
    pub drawdown_recovery_percent: f64,
}

impl Default for PositionSizing {
    fn default() -> Self {
        Self {
            risk_percent: 1.0,
            max_positions: 5,
            max_portfolio_heat_percent: 6.0,
            max_drawdown_percent: 20.0,
            drawdown_recovery_percent: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeFilters {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_volume: Option<i64>,
}

impl TradeFilters {
    /// First filter the bar fails, if any.
    pub fn check(&self, close: f64, volume: i64) -> Option<RejectionReason> {
        if self.min_price.is_some_and(|min| close < min) {
            return Some(RejectionReason::FilterMinPrice);
        }
        if self.max_price.is_some_and(|max| close > max) {
            return Some(RejectionReason::FilterMaxPrice);
        }
        if self.min_volume.is_some_and(|min| volume < min) {
            return Some(RejectionReason::FilterMinVolume);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum OrderType {
    #[default]
    Market,
    /// Buy limit placed `offset_percent` below the signal bar's close.
    Limit { offset_percent: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub name: String,
    pub description: String,
    /// AND across groups, OR within a group.
    pub entry: Vec<ConditionGroup>,
    pub exit: Vec<ConditionGroup>,
    pub stop_loss: StopLossSpec,
    pub take_profit: TakeProfitSpec,
    pub sizing: PositionSizing,
    pub filters: TradeFilters,
    pub order_type: OrderType,
    /// Bars an unfilled limit order stays live after the signal bar.
    pub order_validity_bars: usize,
    pub indicators: IndicatorSettings,
}

impl Default for StrategyDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            entry: Vec::new(),
            exit: Vec::new(),
            stop_loss: StopLossSpec::default(),
            take_profit: TakeProfitSpec::default(),
            sizing: PositionSizing::default(),
            filters: TradeFilters::default(),
            order_type: OrderType::Market,
            order_validity_bars: 1,
            indicators: IndicatorSettings::default(),
        }
    }
}

impl StrategyDefinition {
    fn groups(&self) -> impl Iterator<Item = &ConditionGroup> {
        self.entry.iter().chain(self.exit.iter())
    }

    /// Load-time diagnostics: unsupported indicator names and unresolved
    /// `$param` placeholders. Neither stops a run; both make the affected
    /// condition evaluate to false.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for group in self.groups() {
            for condition in &group.conditions {
                for name in condition.unknown_indicators() {
                    warnings.push(format!(
                        "unknown indicator '{}' in condition '{}' will never match",
                        name, condition
                    ));
                }
            }
            for param in group.parameters() {
                warnings.push(format!("parameter ${} has no value", param));
            }
        }
        warnings
    }
}

/// Produce a copy of `strategy` with every parameter in `params` applied.
///
/// A name is applied to any matching `$param` placeholder and to the
/// strategy field it names. A name that matches neither is an error.
pub fn apply_parameters(
    strategy: &StrategyDefinition,
    params: &ParameterSet,
) -> Result<StrategyDefinition, StratbenchError> {
    let mut out = strategy.clone();

    for (name, value) in params.iter() {
        let substituted = substitute_placeholder(&mut out, name, value);
        let applied = apply_field(&mut out, name, value)?;
        if !substituted && !applied {
            return Err(StratbenchError::UnknownParameter {
                name: name.to_string(),
            });
        }
    }

    Ok(out)
}

fn substitute_placeholder(strategy: &mut StrategyDefinition, name: &str, value: f64) -> bool {
    let mut found = false;
    for group in strategy.entry.iter_mut().chain(strategy.exit.iter_mut()) {
        for condition in &mut group.conditions {
            if matches!(&condition.target, Target::Parameter(p) if p == name) {
                condition.target = Target::Constant(value);
                found = true;
            }
        }
    }
    found
}

fn period(name: &str, value: f64) -> Result<usize, StratbenchError> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded < 1.0 {
        return Err(StratbenchError::ConfigInvalid {
            section: "parameters".into(),
            key: name.into(),
            reason: format!("period must be at least 1, got {}", value),
        });
    }
    Ok(rounded as usize)
}

fn apply_field(
    strategy: &mut StrategyDefinition,
    name: &str,
    value: f64,
) -> Result<bool, StratbenchError> {
    let ind = &mut strategy.indicators;
    match name {
        "sma_short" => ind.sma_short = period(name, value)?,
        "sma_medium" => ind.sma_medium = period(name, value)?,
        "sma_long" => ind.sma_long = period(name, value)?,
        "ema_fast" => ind.ema_fast = period(name, value)?,
        "ema_slow" => ind.ema_slow = period(name, value)?,
        "wma_period" => ind.wma_period = period(name, value)?,
        "rsi_period" => ind.rsi_period = period(name, value)?,
        "atr_period" => ind.atr_period = period(name, value)?,
        "macd_fast" => ind.macd_fast = period(name, value)?,
        "macd_slow" => ind.macd_slow = period(name, value)?,
        "macd_signal" => ind.macd_signal = period(name, value)?,
        "bb_period" => ind.bb_period = period(name, value)?,
        "bb_multiplier" => ind.bb_multiplier = value,
        "stoch_k" => ind.stoch_k = period(name, value)?,
        "stoch_d" => ind.stoch_d = period(name, value)?,
        "volume_ma_period" => ind.volume_ma_period = period(name, value)?,
        "stop_multiplier" => strategy.stop_loss.multiplier = value,
        "target_multiplier" => strategy.take_profit.multiplier = value,
        "risk_percent" => strategy.sizing.risk_percent = value,
        "max_positions" => strategy.sizing.max_positions = period(name, value)?,
        "max_heat" => strategy.sizing.max_portfolio_heat_percent = value,
        "max_drawdown" => strategy.sizing.max_drawdown_percent = value,
        "drawdown_recovery" => strategy.sizing.drawdown_recovery_percent = value,
        _ => return Ok(false),
    }
    Ok(true)
}
