//! CSV file data adapter.
//!
//! Layout: `<dir>/<SYMBOL>.csv` holds daily bars; `<SYMBOL>_weekly.csv` and
//! `<SYMBOL>_monthly.csv` are optional. Every file has the header
//! `date,open,high,low,close,volume` with ISO dates.

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::StratbenchError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use csv::StringRecord;
use std::fs;
use std::path::PathBuf;

const HIGHER_TIMEFRAME_SUFFIXES: [&str; 2] = ["_weekly", "_monthly"];

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        let file = match timeframe {
            Timeframe::Daily => format!("{}.csv", symbol),
            Timeframe::Weekly => format!("{}_weekly.csv", symbol),
            Timeframe::Monthly => format!("{}_monthly.csv", symbol),
        };
        self.base_path.join(file)
    }
}

fn source_error(reason: String) -> StratbenchError {
    StratbenchError::DataSource { reason }
}

fn field<T: std::str::FromStr>(record: &StringRecord, index: usize, name: &str, line: u64) -> Result<T, StratbenchError>
where
    T::Err: std::fmt::Display,
{
    record
        .get(index)
        .ok_or_else(|| source_error(format!("line {}: missing {} column", line, name)))?
        .trim()
        .parse()
        .map_err(|e| source_error(format!("line {}: invalid {} value: {}", line, name, e)))
}

impl DataPort for CsvAdapter {
    /// A missing daily file is an error; a missing weekly or monthly file
    /// yields an empty series.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Candle>, StratbenchError> {
        let path = self.csv_path(symbol, timeframe);
        if timeframe != Timeframe::Daily && !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| source_error(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut candles = Vec::new();

        for (i, result) in rdr.records().enumerate() {
            let line = i as u64 + 2;
            let record = result.map_err(|e| source_error(format!("CSV parse error: {}", e)))?;

            let date_str: String = field(&record, 0, "date", line)?;
            let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .map_err(|e| source_error(format!("line {}: invalid date format: {}", line, e)))?;
            if date < start || date > end {
                continue;
            }

            candles.push(Candle {
                symbol: symbol.to_string(),
                date,
                open: field(&record, 1, "open", line)?,
                high: field(&record, 2, "high", line)?,
                low: field(&record, 3, "low", line)?,
                close: field(&record, 4, "close", line)?,
                volume: field(&record, 5, "volume", line)?,
                timeframe,
            });
        }

        candles.sort_by_key(|c| c.date);
        Ok(candles)
    }

    fn list_symbols(&self) -> Result<Vec<String>, StratbenchError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            source_error(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| source_error(format!("directory entry error: {}", e)))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            let Some(stem) = name.strip_suffix(".csv") else {
                continue;
            };
            if !HIGHER_TIMEFRAME_SUFFIXES.iter().any(|s| stem.ends_with(s)) {
                symbols.push(stem.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "date,open,high,low,close,volume\n\
            2024-01-17,110.0,120.0,105.0,115.0,55000\n\
            2024-01-15,100.0,110.0,90.0,105.0,50000\n\
            2024-01-16,105.0,115.0,100.0,110.0,60000\n";

        fs::write(path.join("BHP.csv"), csv_content).unwrap();
        fs::write(path.join("CBA.csv"), "date,open,high,low,close,volume\n").unwrap();
        fs::write(
            path.join("CBA_weekly.csv"),
            "date,open,high,low,close,volume\n2024-01-15,1,2,0.5,1.5,10\n",
        )
        .unwrap();
        fs::write(path.join("notes.txt"), "ignored").unwrap();

        (dir, path)
    }

    fn jan(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn fetch_candles_sorted_and_parsed() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_candles("BHP", Timeframe::Daily, jan(1), jan(31)).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date, jan(15));
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50000);
        assert_eq!(bars[2].date, jan(17));
    }

    #[test]
    fn fetch_candles_filters_by_date() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let bars = adapter.fetch_candles("BHP", Timeframe::Daily, jan(16), jan(16)).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, jan(16));
    }

    #[test]
    fn missing_daily_file_is_an_error() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let result = adapter.fetch_candles("XYZ", Timeframe::Daily, jan(1), jan(31));
        assert!(matches!(result, Err(StratbenchError::DataSource { .. })));
    }

    #[test]
    fn missing_weekly_file_is_empty() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let bars = adapter.fetch_candles("BHP", Timeframe::Weekly, jan(1), jan(31)).unwrap();
        assert!(bars.is_empty());
        let weekly = adapter.fetch_candles("CBA", Timeframe::Weekly, jan(1), jan(31)).unwrap();
        assert_eq!(weekly.len(), 1);
        assert_eq!(weekly[0].timeframe, Timeframe::Weekly);
    }

    #[test]
    fn load_series_resamples_missing_timeframes() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let series = adapter.load_series("BHP", jan(1), jan(31)).unwrap();
        assert_eq!(series[&Timeframe::Daily].len(), 3);
        assert_eq!(series[&Timeframe::Weekly].len(), 1);
        assert_eq!(series[&Timeframe::Monthly].len(), 1);
        assert_eq!(series[&Timeframe::Weekly][0].close, 115.0);
    }

    #[test]
    fn load_series_without_daily_rows_is_no_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let result = adapter.load_series("CBA", jan(1), jan(31));
        assert!(matches!(result, Err(StratbenchError::NoData { .. })));
    }

    #[test]
    fn bad_value_reports_line() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("BAD.csv"),
            "date,open,high,low,close,volume\n2024-01-15,abc,1,1,1,1\n",
        )
        .unwrap();
        let adapter = CsvAdapter::new(dir.path().to_path_buf());
        let err = adapter
            .fetch_candles("BAD", Timeframe::Daily, jan(1), jan(31))
            .unwrap_err();
        assert!(err.to_string().contains("line 2: invalid open value"));
    }

    #[test]
    fn list_symbols_ignores_higher_timeframe_files() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert_eq!(adapter.list_symbols().unwrap(), vec!["BHP", "CBA"]);
    }
}
