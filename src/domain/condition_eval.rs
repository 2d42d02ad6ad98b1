//! Condition evaluation over annotated bars.
//!
//! # Evaluation Semantics
//!
//! - Empty group list: `false`
//! - Groups: all must pass (AND); conditions in a group: any may pass (OR)
//! - `CrossAbove`/`CrossBelow`: need the previous bar, `false` without it
//! - `Between`: inclusive on both bounds, needs a range target
//! - An indicator still at its warmup zero, an unknown indicator name, an
//!   unresolved `$param`, or a higher timeframe with no completed bar all make
//!   the condition `false`

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::condition::{Comparator, Condition, ConditionGroup, Target};
use crate::domain::orchestrator::AnnotatedCandle;
use crate::domain::snapshot::{IndicatorKind, IndicatorSnapshot};

pub fn evaluate(
    groups: &[ConditionGroup],
    bar: &AnnotatedCandle,
    prev: Option<&AnnotatedCandle>,
) -> bool {
    if groups.is_empty() {
        return false;
    }
    groups.iter().all(|group| evaluate_group(group, bar, prev))
}

pub fn evaluate_group(
    group: &ConditionGroup,
    bar: &AnnotatedCandle,
    prev: Option<&AnnotatedCandle>,
) -> bool {
    group
        .conditions
        .iter()
        .any(|condition| evaluate_condition(condition, bar, prev))
}

pub fn evaluate_condition(
    condition: &Condition,
    bar: &AnnotatedCandle,
    prev: Option<&AnnotatedCandle>,
) -> bool {
    let tf = condition.timeframe;
    match condition.comparator {
        Comparator::GreaterThan | Comparator::LessThan => {
            let Some(value) = resolve(&condition.indicator, tf, bar) else {
                return false;
            };
            let Some(target) = resolve_target(&condition.target, tf, bar) else {
                return false;
            };
            if condition.comparator == Comparator::GreaterThan {
                value > target
            } else {
                value < target
            }
        }
        Comparator::Between => {
            let Target::Range { lower, upper } = condition.target else {
                return false;
            };
            resolve(&condition.indicator, tf, bar).is_some_and(|v| v >= lower && v <= upper)
        }
        Comparator::CrossAbove | Comparator::CrossBelow => {
            let Some(prev) = prev else {
                return false;
            };
            let diffs = spread(condition, prev).zip(spread(condition, bar));
            match (condition.comparator, diffs) {
                (Comparator::CrossAbove, Some((before, curr))) => before <= 0.0 && curr > 0.0,
                (Comparator::CrossBelow, Some((before, curr))) => before >= 0.0 && curr < 0.0,
                _ => false,
            }
        }
    }
}

/// `value - target` on one bar.
fn spread(condition: &Condition, bar: &AnnotatedCandle) -> Option<f64> {
    let tf = condition.timeframe;
    Some(resolve(&condition.indicator, tf, bar)? - resolve_target(&condition.target, tf, bar)?)
}

fn resolve_target(target: &Target, tf: Option<Timeframe>, bar: &AnnotatedCandle) -> Option<f64> {
    match target {
        Target::Constant(v) => Some(*v),
        Target::Indicator(kind) => resolve(kind, tf, bar),
        Target::Range { .. } | Target::Parameter(_) => None,
    }
}

/// Value of `kind` on the requested timeframe, or `None` when it cannot be
/// used as a signal.
pub fn resolve(kind: &IndicatorKind, tf: Option<Timeframe>, bar: &AnnotatedCandle) -> Option<f64> {
    let (candle, snapshot) = source(tf, bar)?;
    match kind {
        IndicatorKind::Open => Some(candle.open),
        IndicatorKind::High => Some(candle.high),
        IndicatorKind::Low => Some(candle.low),
        IndicatorKind::Close => Some(candle.close),
        IndicatorKind::Volume => Some(candle.volume as f64),
        IndicatorKind::Unknown(_) => None,
        _ => {
            let value = snapshot.value(kind)?;
            if value == 0.0 && !snapshot.warmed_up {
                None
            } else {
                Some(value)
            }
        }
    }
}

fn source(tf: Option<Timeframe>, bar: &AnnotatedCandle) -> Option<(&Candle, &IndicatorSnapshot)> {
    match tf {
        None | Some(Timeframe::Daily) => Some((&bar.candle, &bar.indicators)),
        Some(higher) => bar
            .higher_timeframe(higher)
            .map(|h| (&h.candle, &h.indicators)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::orchestrator::HigherTimeframeBar;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn bar(close: f64, snapshot: IndicatorSnapshot) -> AnnotatedCandle {
        AnnotatedCandle {
            candle: Candle {
                symbol: "TEST".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000,
                timeframe: Timeframe::Daily,
            },
            indicators: snapshot,
            higher: BTreeMap::new(),
        }
    }

    fn warm(rsi: f64, sma_short: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi,
            sma_short,
            warmed_up: true,
            ..Default::default()
        }
    }

    fn cond(kind: IndicatorKind, cmp: Comparator, target: Target) -> Condition {
        Condition::new(kind, cmp, target)
    }

    #[test]
    fn empty_groups_is_false() {
        let b = bar(100.0, warm(25.0, 0.0));
        assert!(!evaluate(&[], &b, None));
    }

    #[test]
    fn and_across_groups_or_within() {
        let b = bar(100.0, warm(25.0, 90.0));
        let rsi_low = cond(IndicatorKind::Rsi, Comparator::LessThan, Target::Constant(30.0));
        let rsi_high = cond(IndicatorKind::Rsi, Comparator::GreaterThan, Target::Constant(70.0));
        let above_sma = cond(
            IndicatorKind::Close,
            Comparator::GreaterThan,
            Target::Indicator(IndicatorKind::SmaShort),
        );

        let groups = vec![
            ConditionGroup::new(vec![rsi_high.clone(), rsi_low.clone()]),
            ConditionGroup::single(above_sma),
        ];
        assert!(evaluate(&groups, &b, None));

        let groups = vec![
            ConditionGroup::single(rsi_low),
            ConditionGroup::single(rsi_high),
        ];
        assert!(!evaluate(&groups, &b, None));
    }

    #[test]
    fn between_is_inclusive() {
        let b = bar(100.0, warm(30.0, 0.0));
        let c = cond(
            IndicatorKind::Rsi,
            Comparator::Between,
            Target::Range {
                lower: 30.0,
                upper: 40.0,
            },
        );
        assert!(evaluate_condition(&c, &b, None));

        let missing_bounds = cond(IndicatorKind::Rsi, Comparator::Between, Target::Constant(30.0));
        assert!(!evaluate_condition(&missing_bounds, &b, None));
    }

    #[test]
    fn cross_requires_previous_bar() {
        let b = bar(101.0, warm(50.0, 100.0));
        let c = cond(
            IndicatorKind::Close,
            Comparator::CrossAbove,
            Target::Indicator(IndicatorKind::SmaShort),
        );
        assert!(!evaluate_condition(&c, &b, None));

        let prev = bar(99.0, warm(50.0, 100.0));
        assert!(evaluate_condition(&c, &b, Some(&prev)));

        let equal_prev = bar(100.0, warm(50.0, 100.0));
        assert!(evaluate_condition(&c, &b, Some(&equal_prev)));

        let already_above = bar(100.5, warm(50.0, 100.0));
        assert!(!evaluate_condition(&c, &b, Some(&already_above)));
    }

    #[test]
    fn cross_below_sign_change() {
        let c = cond(IndicatorKind::Rsi, Comparator::CrossBelow, Target::Constant(30.0));
        let prev = bar(100.0, warm(31.0, 0.0));
        let curr = bar(100.0, warm(29.0, 0.0));
        assert!(evaluate_condition(&c, &curr, Some(&prev)));
        assert!(!evaluate_condition(&c, &prev, Some(&curr)));
    }

    #[test]
    fn warmup_zero_never_signals() {
        let cold = IndicatorSnapshot::default();
        let b = bar(100.0, cold);
        let c = cond(IndicatorKind::Rsi, Comparator::LessThan, Target::Constant(30.0));
        assert!(!evaluate_condition(&c, &b, None));
    }

    #[test]
    fn unknown_indicator_fails_condition() {
        let b = bar(100.0, warm(25.0, 0.0));
        let c = cond(
            IndicatorKind::Unknown("ichimoku".into()),
            Comparator::LessThan,
            Target::Constant(30.0),
        );
        assert!(!evaluate_condition(&c, &b, None));
    }

    #[test]
    fn unresolved_parameter_fails_condition() {
        let b = bar(100.0, warm(25.0, 0.0));
        let c = cond(
            IndicatorKind::Rsi,
            Comparator::LessThan,
            Target::Parameter("rsi_entry".into()),
        );
        assert!(!evaluate_condition(&c, &b, None));
    }

    #[test]
    fn higher_timeframe_lookup() {
        let mut b = bar(100.0, warm(50.0, 0.0));
        let c = cond(IndicatorKind::Rsi, Comparator::GreaterThan, Target::Constant(60.0))
            .on(Timeframe::Weekly);
        assert!(!evaluate_condition(&c, &b, None));

        b.higher.insert(
            Timeframe::Weekly,
            HigherTimeframeBar {
                candle: b.candle.clone(),
                indicators: warm(65.0, 0.0),
            },
        );
        assert!(evaluate_condition(&c, &b, None));
    }
}
