//! Condition data structures.
//!
//! - `Condition`: one comparison of an indicator against a target
//! - `ConditionGroup`: conditions joined by OR
//! - A strategy's entry and exit rules are lists of groups joined by AND

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::candle::Timeframe;
use crate::domain::snapshot::IndicatorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    GreaterThan,
    LessThan,
    Between,
    CrossAbove,
    CrossBelow,
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::GreaterThan => ">",
            Comparator::LessThan => "<",
            Comparator::Between => "between",
            Comparator::CrossAbove => "cross_above",
            Comparator::CrossBelow => "cross_below",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Constant(f64),
    Indicator(IndicatorKind),
    Range { lower: f64, upper: f64 },
    /// Optimizer placeholder, replaced by `apply_parameters` before a run.
    Parameter(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Constant(v) => write!(f, "{}", v),
            Target::Indicator(kind) => write!(f, "{}", kind),
            Target::Range { lower, upper } => write!(f, "{} {}", lower, upper),
            Target::Parameter(name) => write!(f, "${}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub indicator: IndicatorKind,
    pub comparator: Comparator,
    pub target: Target,
    /// `None` reads the bar's own timeframe.
    pub timeframe: Option<Timeframe>,
}

impl Condition {
    pub fn new(indicator: IndicatorKind, comparator: Comparator, target: Target) -> Self {
        Self {
            indicator,
            comparator,
            target,
            timeframe: None,
        }
    }

    pub fn on(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = Some(timeframe);
        self
    }

    /// Unsupported indicator names referenced by this condition.
    pub fn unknown_indicators(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let IndicatorKind::Unknown(name) = &self.indicator {
            names.push(name.as_str());
        }
        if let Target::Indicator(IndicatorKind::Unknown(name)) = &self.target {
            names.push(name.as_str());
        }
        names
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.indicator, self.comparator, self.target)?;
        if let Some(tf) = self.timeframe {
            write!(f, " @{}", tf)?;
        }
        Ok(())
    }
}

/// Conditions joined by OR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }

    pub fn single(condition: Condition) -> Self {
        Self {
            conditions: vec![condition],
        }
    }

    /// Names of `$param` placeholders still present in this group.
    pub fn parameters(&self) -> Vec<&str> {
        self.conditions
            .iter()
            .filter_map(|c| match &c.target {
                Target::Parameter(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for ConditionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.conditions.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}
