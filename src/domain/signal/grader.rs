//! Confidence grading.
//!
//! Score (0-100) = 25% evaluator score + 25% trend + 15% volume
//! + 15% risk:reward + 10% historical win rate + 10% volatility.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::evaluator::{CheckKind, SignalEvaluation};

const NEUTRAL_WIN_RATE_SCORE: f64 = 50.0;

/// Letter grade. Ordered so that `Grade::A > Grade::F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    F,
    D,
    C,
    B,
    A,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Grade::A
        } else if score >= 75.0 {
            Grade::B
        } else if score >= 60.0 {
            Grade::C
        } else if score >= 40.0 {
            Grade::D
        } else {
            Grade::F
        }
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Grade::A),
            "B" => Ok(Grade::B),
            "C" => Ok(Grade::C),
            "D" => Ok(Grade::D),
            "F" => Ok(Grade::F),
            other => Err(format!("unknown grade '{}'", other)),
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        };
        write!(f, "{}", s)
    }
}

/// Stepped score for a reward:risk ratio.
pub fn risk_reward_score(ratio: f64) -> f64 {
    if ratio < 1.0 {
        25.0
    } else if ratio < 1.5 {
        40.0
    } else if ratio < 2.0 {
        60.0
    } else if ratio < 2.5 {
        75.0
    } else if ratio < 3.0 {
        85.0
    } else {
        100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub score: f64,
    pub grade: Grade,
    pub signal_component: f64,
    pub trend_component: f64,
    pub volume_component: f64,
    pub risk_reward_component: f64,
    pub win_rate_component: f64,
    pub volatility_component: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfidenceGrader;

impl ConfidenceGrader {
    /// `win_rate` is a fraction; `None` scores as neutral.
    pub fn grade(
        &self,
        evaluation: &SignalEvaluation,
        risk_reward: f64,
        win_rate: Option<f64>,
    ) -> ConfidenceScore {
        let pass = |kind: CheckKind| if evaluation.passed(kind) { 100.0 } else { 0.0 };

        let signal_component = evaluation.score * 100.0 * 0.25;
        let trend_component = pass(CheckKind::Trend) * 0.25;
        let volume_component = pass(CheckKind::Volume) * 0.15;
        let risk_reward_component = risk_reward_score(risk_reward) * 0.15;
        let win_rate_component = win_rate
            .map(|w| (w * 100.0).clamp(0.0, 100.0))
            .unwrap_or(NEUTRAL_WIN_RATE_SCORE)
            * 0.10;
        let volatility_component = pass(CheckKind::Volatility) * 0.10;

        let score = (signal_component
            + trend_component
            + volume_component
            + risk_reward_component
            + win_rate_component
            + volatility_component)
            .clamp(0.0, 100.0);

        ConfidenceScore {
            score,
            grade: Grade::from_score(score),
            signal_component,
            trend_component,
            volume_component,
            risk_reward_component,
            win_rate_component,
            volatility_component,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::Direction;
    use crate::domain::signal::evaluator::SignalCheck;

    fn evaluation(passed: &[CheckKind], score: f64) -> SignalEvaluation {
        let all = [
            CheckKind::Trend,
            CheckKind::Momentum,
            CheckKind::Volume,
            CheckKind::Volatility,
            CheckKind::Macd,
            CheckKind::Stochastic,
        ];
        SignalEvaluation {
            direction: Direction::Long,
            checks: all
                .iter()
                .map(|&kind| SignalCheck {
                    kind,
                    passed: passed.contains(&kind),
                    weight: 1.0,
                    detail: String::new(),
                })
                .collect(),
            score,
        }
    }

    #[test]
    fn grade_boundaries() {
        assert_eq!(Grade::from_score(90.0), Grade::A);
        assert_eq!(Grade::from_score(89.99), Grade::B);
        assert_eq!(Grade::from_score(75.0), Grade::B);
        assert_eq!(Grade::from_score(60.0), Grade::C);
        assert_eq!(Grade::from_score(40.0), Grade::D);
        assert_eq!(Grade::from_score(39.99), Grade::F);
        assert!(Grade::A > Grade::B && Grade::D > Grade::F);
    }

    #[test]
    fn risk_reward_steps() {
        assert_eq!(risk_reward_score(0.5), 25.0);
        assert_eq!(risk_reward_score(1.0), 40.0);
        assert_eq!(risk_reward_score(1.5), 60.0);
        assert_eq!(risk_reward_score(2.0), 75.0);
        assert_eq!(risk_reward_score(2.5), 85.0);
        assert_eq!(risk_reward_score(3.0), 100.0);
    }

    #[test]
    fn perfect_signal_scores_a() {
        let eval = evaluation(
            &[CheckKind::Trend, CheckKind::Volume, CheckKind::Volatility],
            1.0,
        );
        let conf = ConfidenceGrader.grade(&eval, 3.0, Some(1.0));
        assert!((conf.score - 100.0).abs() < 1e-9);
        assert_eq!(conf.grade, Grade::A);
    }

    #[test]
    fn missing_win_rate_is_neutral() {
        let eval = evaluation(&[], 0.0);
        let conf = ConfidenceGrader.grade(&eval, 0.5, None);
        // 25 * 0.15 + 50 * 0.10
        assert!((conf.score - 8.75).abs() < 1e-9);
        assert_eq!(conf.grade, Grade::F);
    }

    #[test]
    fn components_sum_to_score() {
        let eval = evaluation(&[CheckKind::Trend], 0.5);
        let conf = ConfidenceGrader.grade(&eval, 2.0, Some(0.6));
        // 12.5 + 25 + 0 + 11.25 + 6 + 0
        assert!((conf.score - 54.75).abs() < 1e-9);
        assert_eq!(conf.grade, Grade::D);
    }
}
