//! Backtest engine and event loop.
//!
//! Per bar `i` in `1..N` (bar 0 only seeds the "previous bar"):
//! 1. fill pending orders at this bar's open
//! 2. check stops then targets against this bar's low/high
//! 3. exit conditions close every open position at this bar's close
//! 4. entry conditions queue an order for the next bar, subject to the
//!    capital-preservation gates
//! 5. record equity and update the circuit breaker
//!
//! Remaining positions are closed at the last close with reason
//! `EndOfBacktest`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::circuit_breaker::{BreakerTransition, CircuitBreaker};
use crate::domain::condition_eval::evaluate;
use crate::domain::error::StratbenchError;
use crate::domain::execution::{
    affordable_shares, apply_slippage_long_entry, enter_long, exit_position, exit_trigger,
    size_position, stop_loss_price, take_profit_price, ExecutionConfig, RejectionReason,
};
use crate::domain::orchestrator::{AnnotatedCandle, IndicatorOrchestrator};
use crate::domain::portfolio::{EquityPoint, Portfolio};
use crate::domain::position::{ExitReason, TradeRecord};
use crate::domain::strategy::{OrderType, StrategyDefinition};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub commission_per_trade: f64,
    pub commission_pct: f64,
    pub slippage_pct: f64,
    pub risk_free_rate: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::MIN,
            end_date: NaiveDate::MAX,
            initial_capital: 100_000.0,
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            slippage_pct: 0.0,
            risk_free_rate: 0.0,
        }
    }
}

impl BacktestConfig {
    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            commission_per_trade: self.commission_per_trade,
            commission_pct: self.commission_pct,
            slippage_pct: self.slippage_pct,
        }
    }
}

/// An entry signal waiting for a later bar's open.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub symbol: String,
    pub signal_date: NaiveDate,
    pub signal_price: f64,
    /// ATR on the signal bar, used to re-price the stop from the fill.
    pub signal_atr: f64,
    pub shares: i64,
    /// Stop estimated from the signal price, used for heat accounting.
    pub estimated_stop: f64,
    pub limit_price: Option<f64>,
    /// Last bar index on which the order may fill.
    pub expires_after: usize,
}

impl PendingOrder {
    pub fn risk(&self) -> f64 {
        (self.shares as f64 * (self.signal_price - self.estimated_stop)).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRejection {
    pub date: NaiveDate,
    pub symbol: String,
    pub reason: RejectionReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestEngineResult {
    pub symbol: String,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub log: Vec<String>,
    pub rejections: Vec<OrderRejection>,
    pub warnings: Vec<String>,
    pub initial_capital: f64,
    pub final_equity: f64,
}

impl BacktestEngineResult {
    pub fn rejection_count(&self, reason: RejectionReason) -> usize {
        self.rejections.iter().filter(|r| r.reason == reason).count()
    }
}

/// All mutable state of one run. Never shared across runs.
struct SimulationContext {
    portfolio: Portfolio,
    breaker: CircuitBreaker,
    pending: Vec<PendingOrder>,
    log: Vec<String>,
    rejections: Vec<OrderRejection>,
}

impl SimulationContext {
    fn reject(&mut self, date: NaiveDate, symbol: &str, reason: RejectionReason, detail: String) {
        debug!(%date, symbol, reason = reason.token(), "order rejected");
        self.log
            .push(format!("REJECT {} {} {}: {}", reason.token(), date, symbol, detail));
        self.rejections.push(OrderRejection {
            date,
            symbol: symbol.to_string(),
            reason,
        });
    }

    fn close(
        &mut self,
        symbol: &str,
        price: f64,
        date: NaiveDate,
        reason: ExitReason,
        execution: &ExecutionConfig,
    ) {
        if let Some(trade) =
            exit_position(&mut self.portfolio, symbol, price, date, reason, execution)
        {
            self.log.push(format!(
                "EXIT {} {} {} shares @ {:.4} ({}) pnl={:.2}",
                date, symbol, trade.shares, trade.exit_price, reason, trade.pnl
            ));
        }
    }

    fn pending_risk(&self) -> f64 {
        self.pending.iter().map(PendingOrder::risk).sum()
    }

    fn is_holding(&self, symbol: &str) -> bool {
        self.portfolio.has_position(symbol) || self.pending.iter().any(|p| p.symbol == symbol)
    }
}

pub struct BacktestEngine<'a> {
    strategy: &'a StrategyDefinition,
    config: &'a BacktestConfig,
    execution: ExecutionConfig,
}

impl<'a> BacktestEngine<'a> {
    pub fn new(strategy: &'a StrategyDefinition, config: &'a BacktestConfig) -> Self {
        Self {
            strategy,
            config,
            execution: config.execution(),
        }
    }

    /// Simulate the strategy over one symbol's annotated daily bars.
    pub fn run(&self, bars: &[AnnotatedCandle]) -> BacktestEngineResult {
        let symbol = bars
            .first()
            .map(|b| b.candle.symbol.clone())
            .unwrap_or_default();
        let capital = self.config.initial_capital;

        if bars.len() < 2 {
            let message = format!(
                "{}: need at least 2 bars to backtest, have {}",
                symbol,
                bars.len()
            );
            warn!("{}", message);
            return BacktestEngineResult {
                symbol,
                warnings: vec![message],
                initial_capital: capital,
                final_equity: capital,
                ..Default::default()
            };
        }

        let sizing = &self.strategy.sizing;
        let mut ctx = SimulationContext {
            portfolio: Portfolio::new(capital),
            breaker: CircuitBreaker::new(
                capital,
                sizing.max_drawdown_percent,
                sizing.drawdown_recovery_percent,
            ),
            pending: Vec::new(),
            log: Vec::new(),
            rejections: Vec::new(),
        };
        let warnings = self.strategy.warnings();
        for w in &warnings {
            warn!("{}", w);
        }

        for i in 1..bars.len() {
            let bar = &bars[i];
            let prev = &bars[i - 1];
            let candle = &bar.candle;

            self.fill_pending(&mut ctx, i, candle);
            self.check_stops(&mut ctx, candle);

            if ctx.portfolio.position_count() > 0
                && evaluate(&self.strategy.exit, bar, Some(prev))
            {
                for sym in ctx.portfolio.open_symbols() {
                    ctx.close(&sym, candle.close, candle.date, ExitReason::Signal, &self.execution);
                }
            }

            if evaluate(&self.strategy.entry, bar, Some(prev)) {
                self.try_enter(&mut ctx, i, bar);
            }

            let prices = HashMap::from([(candle.symbol.clone(), candle.close)]);
            let equity = ctx.portfolio.total_equity(&prices);
            ctx.portfolio.record_equity(candle.date, equity);
            match ctx.breaker.update(equity) {
                Some(BreakerTransition::Activated { drawdown_percent }) => {
                    info!(date = %candle.date, drawdown_percent, "circuit breaker activated");
                    ctx.log.push(format!(
                        "BREAKER ON {} drawdown={:.2}% peak={:.2} equity={:.2}",
                        candle.date,
                        drawdown_percent,
                        ctx.breaker.peak(),
                        equity
                    ));
                }
                Some(BreakerTransition::Deactivated) => {
                    info!(date = %candle.date, "circuit breaker deactivated");
                    ctx.log.push(format!(
                        "BREAKER OFF {} peak={:.2} equity={:.2}",
                        candle.date,
                        ctx.breaker.peak(),
                        equity
                    ));
                }
                None => {}
            }
        }

        if let Some(last) = bars.last() {
            let candle = &last.candle;
            for sym in ctx.portfolio.open_symbols() {
                ctx.close(
                    &sym,
                    candle.close,
                    candle.date,
                    ExitReason::EndOfBacktest,
                    &self.execution,
                );
            }
            for order in std::mem::take(&mut ctx.pending) {
                ctx.log.push(format!(
                    "CANCEL {} {}: order from {} unfilled at end of data",
                    candle.date, order.symbol, order.signal_date
                ));
            }
        }

        let SimulationContext {
            portfolio,
            log,
            rejections,
            ..
        } = ctx;

        info!(
            symbol = %symbol,
            trades = portfolio.trades.len(),
            rejections = rejections.len(),
            final_equity = portfolio.cash,
            "backtest complete"
        );

        BacktestEngineResult {
            symbol,
            final_equity: portfolio.cash,
            trades: portfolio.trades,
            equity_curve: portfolio.equity_curve,
            log,
            rejections,
            warnings,
            initial_capital: capital,
        }
    }

    fn fill_pending(&self, ctx: &mut SimulationContext, i: usize, candle: &Candle) {
        for order in std::mem::take(&mut ctx.pending) {
            let fill_price = match order.limit_price {
                None => Some(apply_slippage_long_entry(candle.open, self.execution.slippage_pct)),
                Some(limit) if candle.low <= limit => Some(candle.open.min(limit)),
                Some(_) => None,
            };

            let Some(fill_price) = fill_price else {
                if i >= order.expires_after {
                    let detail = format!(
                        "limit {:.4} from {} not reached",
                        order.limit_price.unwrap_or_default(),
                        order.signal_date
                    );
                    ctx.reject(candle.date, &order.symbol, RejectionReason::LimitExpired, detail);
                } else {
                    ctx.pending.push(order);
                }
                continue;
            };

            let stop = stop_loss_price(&self.strategy.stop_loss, fill_price, order.signal_atr);
            if stop >= fill_price {
                let detail = format!("stop {:.4} not below fill {:.4}", stop, fill_price);
                ctx.reject(candle.date, &order.symbol, RejectionReason::InvalidStop, detail);
                continue;
            }
            let target = take_profit_price(&self.strategy.take_profit, fill_price, stop);

            let shares =
                affordable_shares(ctx.portfolio.cash, fill_price, order.shares, &self.execution);
            if shares <= 0 {
                let detail = format!(
                    "cash {:.2} cannot cover {} @ {:.4}",
                    ctx.portfolio.cash, order.shares, fill_price
                );
                ctx.reject(candle.date, &order.symbol, RejectionReason::InsufficientCash, detail);
                continue;
            }

            enter_long(
                &mut ctx.portfolio,
                &order.symbol,
                fill_price,
                candle.date,
                shares,
                stop,
                target,
                &self.execution,
            );
            debug!(date = %candle.date, symbol = %order.symbol, shares, fill_price, "order filled");
            ctx.log.push(format!(
                "FILL {} {} {} shares @ {:.4} stop={:.4} target={:.4}",
                candle.date, order.symbol, shares, fill_price, stop, target
            ));
        }
    }

    fn check_stops(&self, ctx: &mut SimulationContext, candle: &Candle) {
        for sym in ctx.portfolio.open_symbols() {
            let trigger = ctx
                .portfolio
                .get_position(&sym)
                .and_then(|pos| exit_trigger(pos, candle));
            if let Some((price, reason)) = trigger {
                ctx.close(&sym, price, candle.date, reason, &self.execution);
            }
        }
    }

    fn try_enter(&self, ctx: &mut SimulationContext, i: usize, bar: &AnnotatedCandle) {
        let candle = &bar.candle;
        let symbol = candle.symbol.as_str();
        let date = candle.date;
        let sizing = &self.strategy.sizing;

        if ctx.breaker.is_active() {
            let detail = format!(
                "drawdown {:.2}% from peak {:.2}",
                ctx.breaker.drawdown_percent(current_equity(ctx, candle)),
                ctx.breaker.peak()
            );
            ctx.reject(date, symbol, RejectionReason::CircuitBreakerActive, detail);
            return;
        }
        if ctx.is_holding(symbol) {
            ctx.reject(
                date,
                symbol,
                RejectionReason::AlreadyHolding,
                "position or order already open".into(),
            );
            return;
        }
        let open_count = ctx.portfolio.position_count() + ctx.pending.len();
        if open_count >= sizing.max_positions {
            let detail = format!("{} open of {} allowed", open_count, sizing.max_positions);
            ctx.reject(date, symbol, RejectionReason::MaxPositions, detail);
            return;
        }

        let equity = current_equity(ctx, candle);
        let heat = if equity > 0.0 {
            (ctx.portfolio.open_risk() + ctx.pending_risk()) / equity * 100.0
        } else {
            f64::INFINITY
        };
        if heat >= sizing.max_portfolio_heat_percent {
            let detail = format!(
                "heat {:.2}% at limit {:.2}%",
                heat, sizing.max_portfolio_heat_percent
            );
            ctx.reject(date, symbol, RejectionReason::PortfolioHeat, detail);
            return;
        }

        if let Some(reason) = self.strategy.filters.check(candle.close, candle.volume) {
            let detail = format!("close {:.4} volume {}", candle.close, candle.volume);
            ctx.reject(date, symbol, reason, detail);
            return;
        }

        let atr = bar.indicators.atr;
        let (limit_price, reference_price) = match self.strategy.order_type {
            OrderType::Market => (None, candle.close),
            OrderType::Limit { offset_percent } => {
                let limit = candle.close * (1.0 - offset_percent / 100.0);
                (Some(limit), limit)
            }
        };
        let stop = stop_loss_price(&self.strategy.stop_loss, reference_price, atr);
        let shares = match size_position(
            equity,
            ctx.portfolio.cash,
            reference_price,
            stop,
            sizing.risk_percent,
            &self.execution,
        ) {
            Ok(shares) => shares,
            Err(reason) => {
                let detail = format!("price {:.4} stop {:.4}", reference_price, stop);
                ctx.reject(date, symbol, reason, detail);
                return;
            }
        };

        let validity = match self.strategy.order_type {
            OrderType::Market => 1,
            OrderType::Limit { .. } => self.strategy.order_validity_bars.max(1),
        };
        ctx.log.push(format!(
            "SIGNAL {} {} {} shares ref={:.4} stop={:.4}",
            date, symbol, shares, reference_price, stop
        ));
        ctx.pending.push(PendingOrder {
            symbol: symbol.to_string(),
            signal_date: date,
            signal_price: reference_price,
            signal_atr: atr,
            shares,
            estimated_stop: stop,
            limit_price,
            expires_after: i + validity,
        });
    }
}

fn current_equity(ctx: &SimulationContext, candle: &Candle) -> f64 {
    let prices = HashMap::from([(candle.symbol.clone(), candle.close)]);
    ctx.portfolio.total_equity(&prices)
}

/// Annotate `series` with the strategy's indicator settings and run the
/// engine over the daily bars inside the configured date range. Bars before
/// the range still feed indicator warmup.
pub fn run_backtest(
    series: &HashMap<Timeframe, Vec<Candle>>,
    strategy: &StrategyDefinition,
    config: &BacktestConfig,
) -> Result<BacktestEngineResult, StratbenchError> {
    let window = config.start_date..=config.end_date;
    let bars: Vec<AnnotatedCandle> = IndicatorOrchestrator::new(strategy.indicators.clone())
        .annotate(series)?
        .into_iter()
        .filter(|bar| window.contains(&bar.candle.date))
        .collect();
    Ok(BacktestEngine::new(strategy, config).run(&bars))
}
