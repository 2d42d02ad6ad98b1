//! Drawdown circuit breaker.
//!
//! Blocks new entries once equity falls `max_drawdown_percent` below its
//! running peak and re-opens them when equity climbs back to within
//! `recovery_percent` of that same peak. Open positions are never touched.
//! The peak moves only on new equity highs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BreakerTransition {
    Activated { drawdown_percent: f64 },
    Deactivated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreaker {
    max_drawdown_percent: f64,
    recovery_percent: f64,
    peak: f64,
    active: bool,
}

impl CircuitBreaker {
    /// A non-positive `max_drawdown_percent` disables the breaker.
    pub fn new(initial_equity: f64, max_drawdown_percent: f64, recovery_percent: f64) -> Self {
        Self {
            max_drawdown_percent,
            recovery_percent,
            peak: initial_equity,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }

    pub fn drawdown_percent(&self, equity: f64) -> f64 {
        if self.peak <= 0.0 {
            return 0.0;
        }
        (self.peak - equity) / self.peak * 100.0
    }

    /// Feed the latest equity value and report any state change.
    pub fn update(&mut self, equity: f64) -> Option<BreakerTransition> {
        if equity > self.peak {
            self.peak = equity;
        }
        if self.max_drawdown_percent <= 0.0 {
            return None;
        }

        if self.active {
            let recovery_level = self.peak * (1.0 - self.recovery_percent / 100.0);
            if equity >= recovery_level {
                self.active = false;
                return Some(BreakerTransition::Deactivated);
            }
        } else {
            let drawdown_percent = self.drawdown_percent(equity);
            if drawdown_percent >= self.max_drawdown_percent {
                self.active = true;
                return Some(BreakerTransition::Activated { drawdown_percent });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activates_at_threshold() {
        let mut breaker = CircuitBreaker::new(10_000.0, 5.0, 2.0);
        assert_eq!(breaker.update(11_000.0), None);
        match breaker.update(10_400.0) {
            Some(BreakerTransition::Activated { drawdown_percent }) => {
                assert!((drawdown_percent - 5.454545).abs() < 1e-4);
            }
            other => panic!("expected activation, got {:?}", other),
        }
        assert!(breaker.is_active());
        assert!((breaker.peak() - 11_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn recovery_within_threshold_deactivates() {
        let mut breaker = CircuitBreaker::new(11_000.0, 5.0, 2.0);
        breaker.update(10_400.0);
        assert!(breaker.is_active());
        // 11000 * 0.98 = 10780
        assert_eq!(breaker.update(10_700.0), None);
        assert_eq!(breaker.update(10_790.0), Some(BreakerTransition::Deactivated));
        assert!(!breaker.is_active());
    }

    #[test]
    fn tight_recovery_threshold_keeps_breaker_on() {
        let mut breaker = CircuitBreaker::new(11_000.0, 5.0, 1.0);
        breaker.update(10_400.0);
        // needs 10890
        assert_eq!(breaker.update(10_780.0), None);
        assert!(breaker.is_active());
    }

    #[test]
    fn disabled_with_zero_threshold() {
        let mut breaker = CircuitBreaker::new(10_000.0, 0.0, 5.0);
        assert_eq!(breaker.update(1_000.0), None);
        assert!(!breaker.is_active());
    }

    #[test]
    fn peak_not_reset_on_activation() {
        let mut breaker = CircuitBreaker::new(10_000.0, 10.0, 5.0);
        breaker.update(8_900.0);
        assert!(breaker.is_active());
        assert!((breaker.peak() - 10_000.0).abs() < f64::EPSILON);
        breaker.update(9_000.0);
        assert!(breaker.is_active());
        assert!((breaker.peak() - 10_000.0).abs() < f64::EPSILON);
    }
}
