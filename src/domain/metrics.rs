//! Performance metrics over an equity curve and trade list.
//!
//! Everything here is a pure function of its inputs. Ratios that would be
//! unbounded are reported as `f64::MAX` so the JSON output stays finite.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::backtest::BacktestEngineResult;
use super::portfolio::EquityPoint;
use super::position::TradeRecord;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const DAYS_PER_YEAR: f64 = 365.25;

const RED_FLAG_MIN_SHARPE: f64 = 1.0;
const RED_FLAG_MAX_DRAWDOWN: f64 = -0.30;
const RED_FLAG_MIN_PROFIT_FACTOR: f64 = 1.0;
const RED_FLAG_MIN_WIN_RATE: f64 = 0.30;

/// Compounded return over one calendar month or year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReturn {
    /// `YYYY-MM` for months, `YYYY` for years.
    pub period: String,
    pub return_pct: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Fractions, not percentages: 0.10 is a 10% gain.
    pub total_return: f64,
    pub cagr: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Zero or negative: -0.25 is a 25% drawdown.
    pub max_drawdown: f64,
    pub max_drawdown_duration_days: i64,
    pub calmar_ratio: f64,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub benchmark_cagr: Option<f64>,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_holding_days: f64,
    pub avg_r_multiple: f64,
    pub expectancy: f64,
    pub monthly_returns: Vec<PeriodReturn>,
    pub yearly_returns: Vec<PeriodReturn>,
    pub red_flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceCalculator {
    /// Annual rate as a fraction.
    pub risk_free_rate: f64,
}

impl PerformanceCalculator {
    pub fn new(risk_free_rate: f64) -> Self {
        Self { risk_free_rate }
    }

    pub fn from_result(&self, result: &BacktestEngineResult) -> PerformanceMetrics {
        self.calculate(&result.equity_curve, &result.trades, None)
    }

    pub fn calculate(
        &self,
        equity_curve: &[EquityPoint],
        trades: &[TradeRecord],
        benchmark: Option<&[EquityPoint]>,
    ) -> PerformanceMetrics {
        let rf = self.risk_free_rate;
        let daily_rf = rf / TRADING_DAYS_PER_YEAR;

        let total_return = match (equity_curve.first(), equity_curve.last()) {
            (Some(first), Some(last)) if first.equity > 0.0 => {
                (last.equity - first.equity) / first.equity
            }
            _ => 0.0,
        };
        let cagr = compute_cagr(equity_curve);
        let returns = daily_returns(equity_curve);
        let annualized_volatility = sample_stddev(&returns) * TRADING_DAYS_PER_YEAR.sqrt();
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(&returns, daily_rf);
        let (max_drawdown, max_drawdown_duration_days) = compute_drawdown(equity_curve);
        let calmar_ratio = if max_drawdown < 0.0 {
            cagr / max_drawdown.abs()
        } else {
            0.0
        };

        let (alpha, beta, benchmark_cagr) = match benchmark {
            Some(bench) if !bench.is_empty() => {
                let (alpha, beta) = compute_alpha_beta(equity_curve, bench, rf);
                (Some(alpha), Some(beta), Some(compute_cagr(bench)))
            }
            _ => (None, None, None),
        };

        let mut metrics = PerformanceMetrics {
            total_return,
            cagr,
            annualized_volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration_days,
            calmar_ratio,
            alpha,
            beta,
            benchmark_cagr,
            monthly_returns: period_returns(equity_curve, |d| format!("{:04}-{:02}", d.year(), d.month())),
            yearly_returns: period_returns(equity_curve, |d| format!("{:04}", d.year())),
            ..Default::default()
        };
        apply_trade_stats(&mut metrics, trades);
        metrics.red_flags = red_flags(&metrics);
        metrics
    }
}

fn apply_trade_stats(metrics: &mut PerformanceMetrics, trades: &[TradeRecord]) {
    let mut total_wins = 0.0_f64;
    let mut total_losses = 0.0_f64;
    let mut holding_days = 0i64;
    let mut r_total = 0.0_f64;

    for trade in trades {
        let pnl = trade.pnl;
        if pnl > 0.0 {
            metrics.winning_trades += 1;
            total_wins += pnl;
            metrics.largest_win = metrics.largest_win.max(pnl);
        } else if pnl < 0.0 {
            metrics.losing_trades += 1;
            total_losses += pnl.abs();
            metrics.largest_loss = metrics.largest_loss.max(pnl.abs());
        } else {
            metrics.breakeven_trades += 1;
        }
        holding_days += trade.holding_days;
        r_total += trade.r_multiple;
    }

    let total = trades.len();
    metrics.total_trades = total;
    if total == 0 {
        return;
    }

    metrics.win_rate = metrics.winning_trades as f64 / total as f64;
    metrics.profit_factor = if total_losses > 0.0 {
        total_wins / total_losses
    } else if total_wins > 0.0 {
        f64::MAX
    } else {
        0.0
    };
    if metrics.winning_trades > 0 {
        metrics.avg_win = total_wins / metrics.winning_trades as f64;
    }
    if metrics.losing_trades > 0 {
        metrics.avg_loss = total_losses / metrics.losing_trades as f64;
    }
    metrics.avg_holding_days = holding_days as f64 / total as f64;
    metrics.avg_r_multiple = r_total / total as f64;
    metrics.expectancy = (total_wins - total_losses) / total as f64;
}

fn red_flags(m: &PerformanceMetrics) -> Vec<String> {
    let mut flags = Vec::new();
    if m.sharpe_ratio < RED_FLAG_MIN_SHARPE {
        flags.push(format!(
            "Sharpe ratio {:.2} is below {:.1}",
            m.sharpe_ratio, RED_FLAG_MIN_SHARPE
        ));
    }
    if let Some(bench) = m.benchmark_cagr.filter(|b| m.cagr < *b) {
        flags.push(format!(
            "CAGR {:.2}% underperforms benchmark {:.2}%",
            m.cagr * 100.0,
            bench * 100.0
        ));
    }
    if m.max_drawdown < RED_FLAG_MAX_DRAWDOWN {
        flags.push(format!(
            "max drawdown {:.1}% exceeds {:.0}%",
            m.max_drawdown * 100.0,
            RED_FLAG_MAX_DRAWDOWN * 100.0
        ));
    }
    if m.total_trades > 0 {
        if m.profit_factor < RED_FLAG_MIN_PROFIT_FACTOR {
            flags.push(format!("profit factor {:.2} is below 1.0", m.profit_factor));
        }
        if m.win_rate < RED_FLAG_MIN_WIN_RATE {
            flags.push(format!(
                "win rate {:.1}% is below {:.0}%",
                m.win_rate * 100.0,
                RED_FLAG_MIN_WIN_RATE * 100.0
            ));
        }
    }
    flags
}

/// (end/start)^(1/years) - 1 with years measured in calendar days.
fn compute_cagr(curve: &[EquityPoint]) -> f64 {
    let (Some(first), Some(last)) = (curve.first(), curve.last()) else {
        return 0.0;
    };
    let years = (last.date - first.date).num_days() as f64 / DAYS_PER_YEAR;
    if first.equity <= 0.0 || last.equity <= 0.0 || years <= 0.0 {
        return 0.0;
    }
    (last.equity / first.equity).powf(1.0 / years) - 1.0
}

fn daily_returns(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev > 0.0 {
                (w[1].equity - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn compute_risk_adjusted(returns: &[f64], daily_rf: f64) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let excess_mean = mean(&excess);
    let annualize = TRADING_DAYS_PER_YEAR.sqrt();

    let stddev = sample_stddev(&excess);
    let sharpe = if stddev > 0.0 {
        excess_mean / stddev * annualize
    } else {
        0.0
    };

    let negatives: Vec<f64> = excess.iter().copied().filter(|r| *r < 0.0).collect();
    let sortino = if negatives.is_empty() {
        if excess_mean > 0.0 { f64::MAX } else { 0.0 }
    } else {
        let downside = (negatives.iter().map(|r| r * r).sum::<f64>() / negatives.len() as f64).sqrt();
        if downside > 0.0 {
            excess_mean / downside * annualize
        } else {
            0.0
        }
    };

    (sharpe, sortino)
}

/// Deepest (trough - peak) / peak and its duration in calendar days, from the
/// preceding peak until equity exceeds that peak again or the series ends.
fn compute_drawdown(curve: &[EquityPoint]) -> (f64, i64) {
    let Some(first) = curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut peak_date = first.date;
    let mut max_dd = 0.0_f64;
    let mut deepest: Option<(usize, f64, NaiveDate)> = None;

    for (i, point) in curve.iter().enumerate() {
        if point.equity > peak {
            peak = point.equity;
            peak_date = point.date;
        } else if peak > 0.0 {
            let dd = (point.equity - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
                deepest = Some((i, peak, peak_date));
            }
        }
    }

    let Some((trough, dd_peak, dd_peak_date)) = deepest else {
        return (0.0, 0);
    };
    let end_date = curve[trough..]
        .iter()
        .find(|p| p.equity > dd_peak)
        .or(curve.last())
        .map(|p| p.date)
        .unwrap_or(dd_peak_date);

    (max_dd, (end_date - dd_peak_date).num_days())
}

/// Beta and Jensen's alpha over the dates both curves share.
fn compute_alpha_beta(strategy: &[EquityPoint], benchmark: &[EquityPoint], rf: f64) -> (f64, f64) {
    let bench_by_date: HashMap<NaiveDate, f64> =
        benchmark.iter().map(|p| (p.date, p.equity)).collect();
    let aligned: Vec<(EquityPoint, EquityPoint)> = strategy
        .iter()
        .filter_map(|p| {
            bench_by_date.get(&p.date).map(|&equity| {
                (
                    *p,
                    EquityPoint {
                        date: p.date,
                        equity,
                    },
                )
            })
        })
        .collect();
    if aligned.len() < 3 {
        return (0.0, 0.0);
    }

    let (strat_curve, bench_curve): (Vec<EquityPoint>, Vec<EquityPoint>) =
        aligned.into_iter().unzip();
    let strat_returns = daily_returns(&strat_curve);
    let bench_returns = daily_returns(&bench_curve);

    let s_mean = mean(&strat_returns);
    let b_mean = mean(&bench_returns);
    let n = (strat_returns.len() - 1) as f64;
    let covariance = strat_returns
        .iter()
        .zip(&bench_returns)
        .map(|(s, b)| (s - s_mean) * (b - b_mean))
        .sum::<f64>()
        / n;
    let variance = bench_returns.iter().map(|b| (b - b_mean).powi(2)).sum::<f64>() / n;

    let beta = if variance > 0.0 {
        covariance / variance
    } else {
        0.0
    };
    let alpha = compute_cagr(&strat_curve) - (rf + beta * (compute_cagr(&bench_curve) - rf));
    (alpha, beta)
}

/// Chain returns between consecutive period-end equity values. The first
/// period is measured from its own first value.
fn period_returns<F>(curve: &[EquityPoint], key: F) -> Vec<PeriodReturn>
where
    F: Fn(NaiveDate) -> String,
{
    let mut periods: Vec<(String, f64, f64)> = Vec::new();
    for point in curve {
        let k = key(point.date);
        match periods.last_mut() {
            Some((last_key, _, end)) if *last_key == k => *end = point.equity,
            _ => periods.push((k, point.equity, point.equity)),
        }
    }

    let mut out = Vec::with_capacity(periods.len());
    let mut prev_end: Option<f64> = None;
    for (period, start, end) in periods {
        let base = prev_end.unwrap_or(start);
        let return_pct = if base > 0.0 { end / base - 1.0 } else { 0.0 };
        out.push(PeriodReturn { period, return_pct });
        prev_end = Some(end);
    }
    out
}
