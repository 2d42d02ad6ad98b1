//! Open positions and closed trade records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An open long position. Owned by the engine's portfolio until it closes.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub shares: i64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    pub stop_loss: f64,
    /// Zero when the strategy sets no target.
    pub take_profit: f64,
    pub entry_commission: f64,
    /// Stop at entry, used for the trade's R-multiple.
    pub initial_stop: f64,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.shares as f64 * price
    }

    /// Amount lost if the stop is hit from the entry price.
    pub fn open_risk(&self) -> f64 {
        (self.shares as f64 * (self.entry_price - self.stop_loss)).max(0.0)
    }

    pub fn should_stop_loss(&self, low: f64) -> bool {
        self.stop_loss > 0.0 && low <= self.stop_loss
    }

    pub fn should_take_profit(&self, high: f64) -> bool {
        self.take_profit > 0.0 && high >= self.take_profit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
    EndOfBacktest,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "StopLoss",
            ExitReason::TakeProfit => "TakeProfit",
            ExitReason::Signal => "Signal",
            ExitReason::EndOfBacktest => "EndOfBacktest",
        };
        write!(f, "{}", s)
    }
}

/// Immutable record of a closed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub entry_price: f64,
    pub exit_date: NaiveDate,
    pub exit_price: f64,
    pub shares: i64,
    /// Net of entry and exit commissions.
    pub pnl: f64,
    pub pnl_percent: f64,
    pub commission: f64,
    pub holding_days: i64,
    pub exit_reason: ExitReason,
    /// P&L per share over initial risk per share. Zero when the initial risk
    /// was zero.
    pub r_multiple: f64,
}

impl TradeRecord {
    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }
}
