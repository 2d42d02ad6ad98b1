//! Portfolio state and equity tracking.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::position::{Position, TradeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: HashMap<String, Position>,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: HashMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn add_position(&mut self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn remove_position(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Symbols of open positions in a stable order.
    pub fn open_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.positions.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn record_trade(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
    }

    pub fn record_equity(&mut self, date: NaiveDate, equity: f64) {
        self.equity_curve.push(EquityPoint { date, equity });
    }

    /// Sum of open risk across positions.
    pub fn open_risk(&self) -> f64 {
        self.positions.values().map(Position::open_risk).sum()
    }

    /// Cash plus positions marked at `price_map`; a position with no price
    /// is marked at its entry price.
    pub fn total_equity(&self, price_map: &HashMap<String, f64>) -> f64 {
        let position_value: f64 = self
            .positions
            .values()
            .map(|pos| {
                let price = price_map
                    .get(&pos.symbol)
                    .copied()
                    .unwrap_or(pos.entry_price);
                pos.market_value(price)
            })
            .sum();
        self.cash + position_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_position(symbol: &str, shares: i64, stop: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            shares,
            entry_price: 100.0,
            entry_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            stop_loss: stop,
            take_profit: 0.0,
            entry_commission: 0.0,
            initial_stop: stop,
        }
    }

    #[test]
    fn new_portfolio() {
        let portfolio = Portfolio::new(100000.0);
        assert!((portfolio.cash - 100000.0).abs() < f64::EPSILON);
        assert!(portfolio.positions.is_empty());
        assert!(portfolio.trades.is_empty());
        assert!(portfolio.equity_curve.is_empty());
    }

    #[test]
    fn add_get_remove_position() {
        let mut portfolio = Portfolio::new(100000.0);
        portfolio.add_position(sample_position("BHP", 100, 95.0));
        assert!(portfolio.has_position("BHP"));
        assert_eq!(portfolio.get_position("BHP").unwrap().shares, 100);
        assert_eq!(portfolio.position_count(), 1);

        assert!(portfolio.remove_position("BHP").is_some());
        assert!(!portfolio.has_position("BHP"));
        assert!(portfolio.remove_position("BHP").is_none());
    }

    #[test]
    fn total_equity_marks_to_market() {
        let mut portfolio = Portfolio::new(50000.0);
        portfolio.add_position(sample_position("BHP", 100, 95.0));
        portfolio.add_position(sample_position("CBA", 50, 90.0));

        let mut prices = HashMap::new();
        prices.insert("BHP".to_string(), 110.0);
        let equity = portfolio.total_equity(&prices);
        // CBA falls back to its entry price
        assert!((equity - (50000.0 + 11000.0 + 5000.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn open_risk_sums_positions() {
        let mut portfolio = Portfolio::new(50000.0);
        portfolio.add_position(sample_position("BHP", 100, 95.0));
        portfolio.add_position(sample_position("CBA", 50, 90.0));
        assert!((portfolio.open_risk() - 1000.0).abs() < f64::EPSILON);
        assert_eq!(portfolio.open_symbols(), vec!["BHP", "CBA"]);
    }
}
