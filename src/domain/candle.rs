//! Candle representation and timeframe resampling.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    Daily,
    Weekly,
    Monthly,
}

impl Timeframe {
    /// Last calendar day of the period containing `date`.
    ///
    /// Weekly periods end on the Sunday of the ISO week, monthly periods on
    /// the last day of the month. Daily periods end on the day itself.
    pub fn period_end(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Timeframe::Daily => date,
            Timeframe::Weekly => {
                let offset = 6 - date.weekday().num_days_from_monday() as i64;
                date + Duration::days(offset)
            }
            Timeframe::Monthly => {
                let (year, month) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .map(|first_of_next| first_of_next - Duration::days(1))
                    .unwrap_or(date)
            }
        }
    }

    fn period_key(&self, date: NaiveDate) -> (i32, u32) {
        match self {
            Timeframe::Daily => (date.year(), date.ordinal()),
            Timeframe::Weekly => {
                let week = date.iso_week();
                (week.year(), week.week())
            }
            Timeframe::Monthly => (date.year(), date.month()),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Daily => write!(f, "daily"),
            Timeframe::Weekly => write!(f, "weekly"),
            Timeframe::Monthly => write!(f, "monthly"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "d" | "1d" => Ok(Timeframe::Daily),
            "weekly" | "w" | "1w" => Ok(Timeframe::Weekly),
            "monthly" | "m" | "1m" => Ok(Timeframe::Monthly),
            other => Err(format!("unknown timeframe '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub timeframe: Timeframe,
}

impl Candle {
    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// Aggregate daily candles into a higher timeframe.
///
/// Each output candle is dated at the first daily bar of its period.
pub fn resample(daily: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    if timeframe == Timeframe::Daily {
        return daily.to_vec();
    }

    let mut out: Vec<Candle> = Vec::new();
    let mut current_key: Option<(i32, u32)> = None;

    for bar in daily {
        let key = timeframe.period_key(bar.date);
        match (current_key, out.last_mut()) {
            (Some(k), Some(agg)) if k == key => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
            }
            _ => {
                out.push(Candle {
                    timeframe,
                    ..bar.clone()
                });
                current_key = Some(key);
            }
        }
    }

    out
}
