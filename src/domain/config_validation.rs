//! Configuration validation.
//!
//! Every numeric field is checked before a run starts. Missing keys fall back
//! to defaults; present keys must parse and fall inside their range.

use chrono::NaiveDate;
use tracing::error;

use crate::domain::condition::ConditionGroup;
use crate::domain::condition_parser::parse_group;
use crate::domain::error::StratbenchError;
use crate::domain::optimizer::ParameterDefinition;
use crate::domain::signal::{Direction, Grade};
use crate::domain::strategy::{StopLossKind, TakeProfitKind};
use crate::domain::universe::parse_symbols;
use crate::domain::walk_forward::WindowMode;
use crate::ports::config_port::ConfigPort;

/// Period keys accepted in `[indicators]` and as optimizer parameters.
pub const INDICATOR_PERIOD_KEYS: [&str; 15] = [
    "sma_short",
    "sma_medium",
    "sma_long",
    "ema_fast",
    "ema_slow",
    "wma_period",
    "rsi_period",
    "macd_fast",
    "macd_slow",
    "macd_signal",
    "atr_period",
    "bb_period",
    "stoch_k",
    "stoch_d",
    "volume_ma_period",
];

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> StratbenchError {
    StratbenchError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// `Ok(None)` when the key is absent.
pub fn optional_number(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, StratbenchError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(section, key, format!("expected a number, got '{}'", raw))),
    }
}

fn check(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    valid: impl Fn(f64) -> bool,
    requirement: &str,
) -> Result<(), StratbenchError> {
    match optional_number(config, section, key)? {
        Some(v) if !valid(v) => Err(invalid(section, key, format!("{} must be {}", key, requirement))),
        _ => Ok(()),
    }
}

fn check_count(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    minimum: f64,
) -> Result<(), StratbenchError> {
    match optional_number(config, section, key)? {
        Some(v) if v.fract() != 0.0 || v < minimum => Err(invalid(
            section,
            key,
            format!("{} must be a whole number of at least {}", key, minimum),
        )),
        _ => Ok(()),
    }
}

fn check_parse<T>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<(), StratbenchError> {
    match config.get_string(section, key) {
        Some(raw) => parse(&raw).map(|_| ()).map_err(|reason| invalid(section, key, reason)),
        None => Ok(()),
    }
}

pub fn parse_date(section: &str, key: &str, value: &str) -> Result<NaiveDate, StratbenchError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| invalid(section, key, format!("invalid {} format, expected YYYY-MM-DD", key)))
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), StratbenchError> {
    const S: &str = "backtest";
    check(config, S, "initial_capital", |v| v > 0.0, "positive")?;
    check(config, S, "commission_per_trade", |v| v >= 0.0, "non-negative")?;
    check(config, S, "commission_pct", |v| v >= 0.0, "non-negative")?;
    check(config, S, "slippage_pct", |v| v >= 0.0, "non-negative")?;
    check(config, S, "risk_free_rate", |v| (0.0..1.0).contains(&v), "between 0 and 1")?;
    validate_dates(config)
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), StratbenchError> {
    let start = config
        .get_string("backtest", "start_date")
        .map(|s| parse_date("backtest", "start_date", &s))
        .transpose()?;
    let end = config
        .get_string("backtest", "end_date")
        .map(|s| parse_date("backtest", "end_date", &s))
        .transpose()?;

    match (start, end) {
        (Some(s), Some(e)) if s >= e => Err(invalid(
            "backtest",
            "start_date",
            "start_date must be before end_date",
        )),
        _ => Ok(()),
    }
}

/// `data_dir` and a symbol are needed for any run that loads bars. A
/// command-line symbol override satisfies the latter.
pub fn validate_data_source(
    config: &dyn ConfigPort,
    symbol_override: Option<&str>,
) -> Result<(), StratbenchError> {
    match config.get_string("backtest", "data_dir") {
        Some(d) if !d.trim().is_empty() => {}
        _ => {
            return Err(StratbenchError::ConfigMissing {
                section: "backtest".into(),
                key: "data_dir".into(),
            });
        }
    }
    let configured = config
        .get_string("backtest", "symbol")
        .filter(|s| !s.trim().is_empty());
    if symbol_override.is_none() && configured.is_none() {
        return Err(StratbenchError::ConfigMissing {
            section: "backtest".into(),
            key: "symbol".into(),
        });
    }
    Ok(())
}

/// `(key, line)` pairs for `<prefix>_1`, `<prefix>_2`, ... ordered by their
/// numeric suffix.
pub fn numbered_lines(config: &dyn ConfigPort, prefix: &str) -> Vec<(String, String)> {
    let marker = format!("{}_", prefix);
    let mut numbered: Vec<(usize, String)> = config
        .keys("strategy")
        .into_iter()
        .filter_map(|key| {
            let n = key.strip_prefix(&marker)?.parse::<usize>().ok()?;
            Some((n, key))
        })
        .collect();
    numbered.sort();
    numbered
        .into_iter()
        .filter_map(|(_, key)| {
            let line = config.get_string("strategy", &key)?;
            Some((key, line))
        })
        .collect()
}

/// Parse every `<prefix>_N` line of `[strategy]` into a condition group.
/// Parse errors are logged with a caret under the offending character.
pub fn parse_condition_lines(
    config: &dyn ConfigPort,
    prefix: &str,
) -> Result<Vec<ConditionGroup>, StratbenchError> {
    numbered_lines(config, prefix)
        .into_iter()
        .map(|(key, line)| {
            parse_group(&line).map_err(|e| {
                error!(key = %key, "condition parse failed\n{}", e.display_with_context(&line));
                StratbenchError::from(e)
            })
        })
        .collect()
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), StratbenchError> {
    const S: &str = "strategy";
    if numbered_lines(config, "entry").is_empty() {
        return Err(StratbenchError::ConfigMissing {
            section: S.into(),
            key: "entry_1".into(),
        });
    }
    parse_condition_lines(config, "entry")?;
    parse_condition_lines(config, "exit")?;

    check_parse(config, S, "stop_loss", |s| s.parse::<StopLossKind>())?;
    check_parse(config, S, "take_profit", |s| {
        match TakeProfitKind::from_name(s) {
            TakeProfitKind::None if !s.trim().eq_ignore_ascii_case("none") => {
                Err(format!("unknown take profit type '{}'", s.trim()))
            }
            kind => Ok(kind),
        }
    })?;
    check_parse(config, S, "order_type", |s| {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" | "limit" => Ok(()),
            other => Err(format!("unknown order type '{}'", other)),
        }
    })?;

    check(config, S, "stop_multiplier", |v| v > 0.0, "positive")?;
    check(config, S, "target_multiplier", |v| v > 0.0, "positive")?;
    check(config, S, "risk_percent", |v| v > 0.0 && v <= 100.0, "in (0, 100]")?;
    check_count(config, S, "max_positions", 1.0)?;
    check(config, S, "max_heat", |v| v > 0.0 && v <= 100.0, "in (0, 100]")?;
    check(config, S, "max_drawdown", |v| (0.0..100.0).contains(&v), "in [0, 100)")?;
    check(config, S, "drawdown_recovery", |v| v >= 0.0, "non-negative")?;
    check(config, S, "min_price", |v| v >= 0.0, "non-negative")?;
    check(config, S, "max_price", |v| v > 0.0, "positive")?;
    check_count(config, S, "min_volume", 0.0)?;
    check(config, S, "limit_offset_pct", |v| (0.0..100.0).contains(&v), "in [0, 100)")?;
    check_count(config, S, "order_validity_bars", 1.0)?;

    let min = optional_number(config, S, "min_price")?;
    let max = optional_number(config, S, "max_price")?;
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(invalid(S, "min_price", "min_price must not exceed max_price"));
        }
    }

    validate_indicator_config(config)
}

pub fn validate_indicator_config(config: &dyn ConfigPort) -> Result<(), StratbenchError> {
    const S: &str = "indicators";
    for key in config.keys(S) {
        if key == "bb_multiplier" {
            check(config, S, &key, |v| v > 0.0, "positive")?;
        } else if INDICATOR_PERIOD_KEYS.contains(&key.as_str()) {
            check_count(config, S, &key, 1.0)?;
        } else {
            return Err(invalid(S, &key, format!("unknown indicator setting '{}'", key)));
        }
    }
    Ok(())
}

/// Parse `name = min, max, step` lines from `[parameters]`.
pub fn parse_parameter_definitions(
    config: &dyn ConfigPort,
) -> Result<Vec<ParameterDefinition>, StratbenchError> {
    const S: &str = "parameters";
    let mut definitions = Vec::new();
    for key in config.keys(S) {
        let raw = config.get_string(S, &key).unwrap_or_default();
        let values: Vec<f64> = raw
            .split(',')
            .map(|t| t.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid(S, &key, format!("expected 'min, max, step', got '{}'", raw)))?;
        let &[min, max, step] = values.as_slice() else {
            return Err(invalid(S, &key, format!("expected 'min, max, step', got '{}'", raw)));
        };
        if !(min.is_finite() && max.is_finite() && step.is_finite()) {
            return Err(invalid(S, &key, "bounds and step must be finite"));
        }
        if max < min {
            return Err(invalid(S, &key, "max must not be below min"));
        }
        if step <= 0.0 {
            return Err(invalid(S, &key, "step must be positive"));
        }
        definitions.push(ParameterDefinition::new(key, min, max, step));
    }
    Ok(definitions)
}

pub fn validate_optimize_config(config: &dyn ConfigPort) -> Result<(), StratbenchError> {
    check_count(config, "optimize", "top_k", 1.0)?;
    if parse_parameter_definitions(config)?.is_empty() {
        return Err(StratbenchError::ConfigMissing {
            section: "parameters".into(),
            key: "<name> = min, max, step".into(),
        });
    }
    Ok(())
}

pub fn validate_walk_forward_config(config: &dyn ConfigPort) -> Result<(), StratbenchError> {
    const S: &str = "walk_forward";
    check_parse(config, S, "mode", |s| s.parse::<WindowMode>())?;
    check_count(config, S, "in_sample_bars", 1.0)?;
    check_count(config, S, "out_of_sample_bars", 1.0)?;
    validate_optimize_config(config)
}

pub fn validate_screener_config(config: &dyn ConfigPort) -> Result<(), StratbenchError> {
    const S: &str = "screener";
    match config.get_string(S, "symbols") {
        Some(list) => {
            parse_symbols(&list)?;
        }
        None => {
            return Err(StratbenchError::ConfigMissing {
                section: S.into(),
                key: "symbols".into(),
            });
        }
    }
    check_parse(config, S, "direction", |s| s.parse::<Direction>())?;
    check_parse(config, S, "min_grade", |s| s.parse::<Grade>())?;
    check_count(config, S, "top_n", 1.0)?;
    check_count(config, S, "lookback", 2.0)?;
    check(config, S, "volume_multiplier", |v| v > 0.0, "positive")?;
    Ok(())
}
