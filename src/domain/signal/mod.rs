//! Live-candidate scoring: weighted confirmation checks, a 0-100 confidence
//! grade, and a universe screener built on both.

pub mod evaluator;
pub mod grader;
pub mod screener;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use evaluator::{CheckKind, SignalCheck, SignalEvaluation, SignalEvaluator, SignalWeights};
pub use grader::{ConfidenceGrader, ConfidenceScore, Grade, risk_reward_score};
pub use screener::{ScreenedSignal, ScreenerConfig, ScreenerEngine, ScreenerRunResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Long,
    Short,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Direction::Long),
            "short" | "sell" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}
