//! Crossover, swing point and divergence detection over aligned series.
//!
//! All detectors skip positions where either input still holds the warmup
//! zero sentinel.

use serde::{Deserialize, Serialize};

use crate::domain::error::IndicatorError;
use crate::domain::indicator::{require_period, require_same_len};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossKind {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossEvent {
    pub index: usize,
    pub kind: CrossKind,
}

/// Two swing points on the price series that disagree with the oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub kind: CrossKind,
    pub first: usize,
    pub second: usize,
}

/// Detect where `fast` crosses `slow`.
///
/// Bullish when `fast - slow` moves from `<= 0` to `> 0`, bearish when it
/// moves from `>= 0` to `< 0`. The event index is the bar on which the new
/// sign is first observed.
pub fn detect_crossovers(fast: &[f64], slow: &[f64]) -> Result<Vec<CrossEvent>, IndicatorError> {
    require_same_len("CROSSOVER", fast.len(), slow.len())?;

    let mut events = Vec::new();
    for i in 1..fast.len() {
        if fast[i - 1] == 0.0 || slow[i - 1] == 0.0 || fast[i] == 0.0 || slow[i] == 0.0 {
            continue;
        }
        let prev_diff = fast[i - 1] - slow[i - 1];
        let diff = fast[i] - slow[i];
        if prev_diff <= 0.0 && diff > 0.0 {
            events.push(CrossEvent {
                index: i,
                kind: CrossKind::Bullish,
            });
        } else if prev_diff >= 0.0 && diff < 0.0 {
            events.push(CrossEvent {
                index: i,
                kind: CrossKind::Bearish,
            });
        }
    }
    Ok(events)
}

/// Indices whose value is strictly greater than the `strength` values on
/// each side.
pub fn swing_highs(values: &[f64], strength: usize) -> Result<Vec<usize>, IndicatorError> {
    swing_points(values, strength, |candidate, neighbour| candidate > neighbour)
}

/// Indices whose value is strictly less than the `strength` values on each
/// side.
pub fn swing_lows(values: &[f64], strength: usize) -> Result<Vec<usize>, IndicatorError> {
    swing_points(values, strength, |candidate, neighbour| candidate < neighbour)
}

fn swing_points<F>(values: &[f64], strength: usize, dominates: F) -> Result<Vec<usize>, IndicatorError>
where
    F: Fn(f64, f64) -> bool,
{
    require_period("SWING", strength)?;

    let mut points = Vec::new();
    if values.len() < 2 * strength + 1 {
        return Ok(points);
    }

    for i in strength..values.len() - strength {
        let candidate = values[i];
        if candidate == 0.0 {
            continue;
        }
        let window = values[i - strength..=i + strength]
            .iter()
            .enumerate()
            .filter(|(offset, _)| *offset != strength);
        let mut is_swing = true;
        for (_, &neighbour) in window {
            if neighbour == 0.0 || !dominates(candidate, neighbour) {
                is_swing = false;
                break;
            }
        }
        if is_swing {
            points.push(i);
        }
    }
    Ok(points)
}

/// Regular divergences between price and an oscillator.
///
/// Bullish: price prints a lower swing low while the oscillator prints a
/// higher low. Bearish: price prints a higher swing high while the
/// oscillator prints a lower high. Only consecutive swing points are paired.
pub fn detect_divergences(
    price: &[f64],
    oscillator: &[f64],
    strength: usize,
) -> Result<Vec<Divergence>, IndicatorError> {
    require_same_len("DIVERGENCE", price.len(), oscillator.len())?;

    let mut divergences = Vec::new();

    let lows = swing_lows(price, strength)?;
    for pair in lows.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if oscillator[a] == 0.0 || oscillator[b] == 0.0 {
            continue;
        }
        if price[b] < price[a] && oscillator[b] > oscillator[a] {
            divergences.push(Divergence {
                kind: CrossKind::Bullish,
                first: a,
                second: b,
            });
        }
    }

    let highs = swing_highs(price, strength)?;
    for pair in highs.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if oscillator[a] == 0.0 || oscillator[b] == 0.0 {
            continue;
        }
        if price[b] > price[a] && oscillator[b] < oscillator[a] {
            divergences.push(Divergence {
                kind: CrossKind::Bearish,
                first: a,
                second: b,
            });
        }
    }

    divergences.sort_by_key(|d| d.second);
    Ok(divergences)
}
