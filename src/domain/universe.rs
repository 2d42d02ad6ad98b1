//! Symbol universe for screening and multi-symbol runs.
//!
//! Parses symbol lists from configuration and loads each symbol's series,
//! skipping symbols with no data or too few bars.

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::StratbenchError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{info, warn};

pub const MIN_BARS: usize = 30;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
}

impl From<UniverseError> for StratbenchError {
    fn from(e: UniverseError) -> Self {
        StratbenchError::ConfigInvalid {
            section: "screener".into(),
            key: "symbols".into(),
            reason: e.to_string(),
        }
    }
}

pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let symbol = trimmed.to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    NoData,
    InsufficientBars { bars: usize },
    Error(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoData => write!(f, "no data found"),
            SkipReason::InsufficientBars { bars } => {
                write!(f, "only {} bars, minimum {} required", bars, MIN_BARS)
            }
            SkipReason::Error(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: SkipReason,
}

pub struct Universe {
    /// Sorted by symbol.
    pub series: BTreeMap<String, HashMap<Timeframe, Vec<Candle>>>,
    pub skipped: Vec<SkippedSymbol>,
}

impl Universe {
    pub fn count(&self) -> usize {
        self.series.len()
    }
}

/// Load every symbol, recording failures as skips. Errors only when no
/// symbol survives.
pub fn load_universe(
    data_port: &dyn DataPort,
    symbols: Vec<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Universe, StratbenchError> {
    let mut series = BTreeMap::new();
    let mut skipped = Vec::new();
    let requested = symbols.len();

    for symbol in symbols {
        let reason = match data_port.load_series(&symbol, start_date, end_date) {
            Ok(loaded) => {
                let bars = loaded.get(&Timeframe::Daily).map_or(0, Vec::len);
                if bars >= MIN_BARS {
                    info!(symbol = %symbol, bars, "loaded");
                    series.insert(symbol, loaded);
                    continue;
                }
                SkipReason::InsufficientBars { bars }
            }
            Err(StratbenchError::NoData { .. }) => SkipReason::NoData,
            Err(e) => SkipReason::Error(e.to_string()),
        };
        warn!(symbol = %symbol, %reason, "skipping symbol");
        skipped.push(SkippedSymbol { symbol, reason });
    }

    if series.is_empty() {
        return Err(StratbenchError::InsufficientData {
            symbol: "all".to_string(),
            bars: 0,
            minimum: MIN_BARS,
        });
    }
    if !skipped.is_empty() {
        info!(
            loaded = series.len(),
            requested, "universe loaded with skips"
        );
    }

    Ok(Universe { series, skipped })
}
