//! Trade execution and fill simulation.
//!
//! Implements entry/exit fills with slippage, risk-based share sizing,
//! commissions, stop/target pricing and intrabar trigger checks.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::candle::Candle;
use super::portfolio::Portfolio;
use super::position::{ExitReason, Position, TradeRecord};
use super::strategy::{StopLossKind, StopLossSpec, TakeProfitKind, TakeProfitSpec};

/// Fallback stop distance when ATR is not yet available.
const ATR_FALLBACK_STOP_PCT: f64 = 5.0;

/// Configuration for fill costs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionConfig {
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    pub slippage_pct: f64,
}

/// Calculate commission: flat_fee + (trade_value * pct / 100).
pub fn calculate_commission(trade_value: f64, config: &ExecutionConfig) -> f64 {
    config.commission_per_trade + (trade_value * config.commission_pct / 100.0)
}

/// Long entry (buy): execution_price = market_price * (1 + slippage_pct / 100)
pub fn apply_slippage_long_entry(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + slippage_pct / 100.0)
}

/// Long exit (sell): execution_price = market_price * (1 - slippage_pct / 100)
pub fn apply_slippage_long_exit(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - slippage_pct / 100.0)
}

/// Stop price for a long entry at `price`.
///
/// `Atr` falls back to a fixed 5% stop while ATR is still in warmup.
pub fn stop_loss_price(spec: &StopLossSpec, price: f64, atr: f64) -> f64 {
    match spec.kind {
        StopLossKind::Atr if atr > 0.0 => price - atr * spec.multiplier,
        StopLossKind::Atr => price * (1.0 - ATR_FALLBACK_STOP_PCT / 100.0),
        StopLossKind::FixedPercent => price * (1.0 - spec.multiplier / 100.0),
    }
}

/// Target price for a long entry at `price` with stop `stop`. Zero means no
/// target.
pub fn take_profit_price(spec: &TakeProfitSpec, price: f64, stop: f64) -> f64 {
    match spec.kind {
        TakeProfitKind::RMultiple => price + (price - stop) * spec.multiplier,
        TakeProfitKind::FixedPercent => price * (1.0 + spec.multiplier / 100.0),
        TakeProfitKind::None => 0.0,
    }
}

/// Why an entry signal did not become an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    CircuitBreakerActive,
    AlreadyHolding,
    MaxPositions,
    PortfolioHeat,
    FilterMinPrice,
    FilterMaxPrice,
    FilterMinVolume,
    InsufficientCash,
    InvalidStop,
    ZeroShares,
    LimitExpired,
}

impl RejectionReason {
    /// Stable token used in log lines.
    pub fn token(&self) -> &'static str {
        match self {
            RejectionReason::CircuitBreakerActive => "circuit_breaker_active",
            RejectionReason::AlreadyHolding => "already_holding",
            RejectionReason::MaxPositions => "max_positions",
            RejectionReason::PortfolioHeat => "portfolio_heat",
            RejectionReason::FilterMinPrice => "filter_min_price",
            RejectionReason::FilterMaxPrice => "filter_max_price",
            RejectionReason::FilterMinVolume => "filter_min_volume",
            RejectionReason::InsufficientCash => "insufficient_cash",
            RejectionReason::InvalidStop => "invalid_stop",
            RejectionReason::ZeroShares => "zero_shares",
            RejectionReason::LimitExpired => "limit_expired",
        }
    }

    /// Filter rejections are skips: the signal was never eligible.
    pub fn is_filter(&self) -> bool {
        matches!(
            self,
            RejectionReason::FilterMinPrice
                | RejectionReason::FilterMaxPrice
                | RejectionReason::FilterMinVolume
        )
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Risk-based share count.
///
/// shares = floor(equity * risk_percent / 100 / (price - stop)), then
/// reduced until shares * price plus commission fits in `cash`.
pub fn size_position(
    equity: f64,
    cash: f64,
    price: f64,
    stop: f64,
    risk_percent: f64,
    config: &ExecutionConfig,
) -> Result<i64, RejectionReason> {
    if stop >= price || price <= 0.0 {
        return Err(RejectionReason::InvalidStop);
    }

    let risk_amount = equity * risk_percent / 100.0;
    let shares = (risk_amount / (price - stop)).floor() as i64;
    if shares <= 0 {
        return Err(RejectionReason::ZeroShares);
    }

    let shares = affordable_shares(cash, price, shares, config);
    if shares <= 0 {
        return Err(RejectionReason::InsufficientCash);
    }

    Ok(shares)
}

/// Largest share count up to `wanted` whose notional plus commission fits in
/// `cash`.
pub fn affordable_shares(cash: f64, price: f64, wanted: i64, config: &ExecutionConfig) -> i64 {
    let cost = |n: i64| {
        let notional = n as f64 * price;
        notional + calculate_commission(notional, config)
    };
    if cost(wanted) <= cash {
        return wanted;
    }
    let per_share = price * (1.0 + config.commission_pct / 100.0);
    let mut shares = (((cash - config.commission_per_trade) / per_share).floor() as i64).min(wanted);
    while shares > 0 && cost(shares) > cash {
        shares -= 1;
    }
    shares.max(0)
}

/// Open a long position at an already slipped `fill_price`.
///
/// Deducts notional plus commission from cash and returns the commission.
#[allow(clippy::too_many_arguments)]
pub fn enter_long(
    portfolio: &mut Portfolio,
    symbol: &str,
    fill_price: f64,
    date: NaiveDate,
    shares: i64,
    stop_loss: f64,
    take_profit: f64,
    config: &ExecutionConfig,
) -> f64 {
    let notional = shares as f64 * fill_price;
    let commission = calculate_commission(notional, config);
    portfolio.cash -= notional + commission;

    portfolio.add_position(Position {
        symbol: symbol.to_string(),
        shares,
        entry_price: fill_price,
        entry_date: date,
        stop_loss,
        take_profit,
        entry_commission: commission,
        initial_stop: stop_loss,
    });

    commission
}

/// Close the position in `symbol` at `market_price` less slippage.
///
/// PnL includes both entry and exit commissions.
pub fn exit_position(
    portfolio: &mut Portfolio,
    symbol: &str,
    market_price: f64,
    exit_date: NaiveDate,
    reason: ExitReason,
    config: &ExecutionConfig,
) -> Option<TradeRecord> {
    let position = portfolio.remove_position(symbol)?;

    let exit_price = apply_slippage_long_exit(market_price, config.slippage_pct);
    let shares = position.shares as f64;
    let exit_value = shares * exit_price;
    let exit_commission = calculate_commission(exit_value, config);

    let pnl = shares * (exit_price - position.entry_price)
        - position.entry_commission
        - exit_commission;
    let entry_value = shares * position.entry_price;
    let pnl_percent = if entry_value > 0.0 {
        pnl / entry_value * 100.0
    } else {
        0.0
    };
    let risk_per_share = position.entry_price - position.initial_stop;
    let r_multiple = if risk_per_share > 0.0 {
        (exit_price - position.entry_price) / risk_per_share
    } else {
        0.0
    };

    portfolio.cash += exit_value - exit_commission;

    let trade = TradeRecord {
        symbol: position.symbol,
        entry_date: position.entry_date,
        entry_price: position.entry_price,
        exit_date,
        exit_price,
        shares: position.shares,
        pnl,
        pnl_percent,
        commission: position.entry_commission + exit_commission,
        holding_days: (exit_date - position.entry_date).num_days(),
        exit_reason: reason,
        r_multiple,
    };
    portfolio.record_trade(trade.clone());
    Some(trade)
}

/// Intrabar stop/target check. The stop is checked first.
///
/// A bar that gaps through the level fills at the open: stops at
/// `min(open, stop)`, targets at `max(open, target)`.
pub fn exit_trigger(position: &Position, bar: &Candle) -> Option<(f64, ExitReason)> {
    if position.should_stop_loss(bar.low) {
        return Some((bar.open.min(position.stop_loss), ExitReason::StopLoss));
    }
    if position.should_take_profit(bar.high) {
        return Some((bar.open.max(position.take_profit), ExitReason::TakeProfit));
    }
    None
}
