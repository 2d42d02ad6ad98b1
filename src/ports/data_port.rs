//! Data access port trait.

use chrono::NaiveDate;
use std::collections::HashMap;

use crate::domain::candle::{Candle, Timeframe, resample};
use crate::domain::error::StratbenchError;

pub trait DataPort {
    /// Candles for `symbol` on `timeframe` within `[start, end]`, oldest
    /// first. An empty vector means the source has no series for that
    /// timeframe.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Candle>, StratbenchError>;

    fn list_symbols(&self) -> Result<Vec<String>, StratbenchError>;

    /// Daily candles plus weekly and monthly series. Higher timeframes the
    /// source does not supply are resampled from the daily bars.
    fn load_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<Timeframe, Vec<Candle>>, StratbenchError> {
        let daily = self.fetch_candles(symbol, Timeframe::Daily, start, end)?;
        if daily.is_empty() {
            return Err(StratbenchError::NoData {
                symbol: symbol.to_string(),
            });
        }

        let mut series = HashMap::new();
        for timeframe in [Timeframe::Weekly, Timeframe::Monthly] {
            let mut bars = self.fetch_candles(symbol, timeframe, start, end)?;
            if bars.is_empty() {
                bars = resample(&daily, timeframe);
            }
            series.insert(timeframe, bars);
        }
        series.insert(Timeframe::Daily, daily);
        Ok(series)
    }
}
