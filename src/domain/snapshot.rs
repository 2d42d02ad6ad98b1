//! Per-bar indicator values, the names conditions use to reference them, and
//! the periods used to compute them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::indicator::{bollinger, macd, stochastic};

/// One bar's computed indicator values.
///
/// Every field is zero until its own warmup completes; `warmed_up` becomes
/// true once the longest configured indicator has enough history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub sma_short: f64,
    pub sma_medium: f64,
    pub sma_long: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub wma: f64,
    pub rsi: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub atr: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_percent_b: f64,
    pub bb_bandwidth: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub obv: f64,
    pub volume_ma: f64,
    pub relative_volume: f64,
    pub warmed_up: bool,
}

impl IndicatorSnapshot {
    /// Value of an indicator field. Price fields and unknown names have no
    /// snapshot value and return `None`.
    pub fn value(&self, kind: &IndicatorKind) -> Option<f64> {
        let v = match kind {
            IndicatorKind::SmaShort => self.sma_short,
            IndicatorKind::SmaMedium => self.sma_medium,
            IndicatorKind::SmaLong => self.sma_long,
            IndicatorKind::EmaFast => self.ema_fast,
            IndicatorKind::EmaSlow => self.ema_slow,
            IndicatorKind::Wma => self.wma,
            IndicatorKind::Rsi => self.rsi,
            IndicatorKind::MacdLine => self.macd_line,
            IndicatorKind::MacdSignal => self.macd_signal,
            IndicatorKind::MacdHistogram => self.macd_histogram,
            IndicatorKind::Atr => self.atr,
            IndicatorKind::BbUpper => self.bb_upper,
            IndicatorKind::BbMiddle => self.bb_middle,
            IndicatorKind::BbLower => self.bb_lower,
            IndicatorKind::BbPercentB => self.bb_percent_b,
            IndicatorKind::BbBandwidth => self.bb_bandwidth,
            IndicatorKind::StochK => self.stoch_k,
            IndicatorKind::StochD => self.stoch_d,
            IndicatorKind::Obv => self.obv,
            IndicatorKind::VolumeMa => self.volume_ma,
            IndicatorKind::RelativeVolume => self.relative_volume,
            IndicatorKind::Open
            | IndicatorKind::High
            | IndicatorKind::Low
            | IndicatorKind::Close
            | IndicatorKind::Volume
            | IndicatorKind::Unknown(_) => return None,
        };
        Some(v)
    }
}

/// Names a condition can reference, resolved once at strategy load time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorKind {
    Open,
    High,
    Low,
    Close,
    Volume,
    SmaShort,
    SmaMedium,
    SmaLong,
    EmaFast,
    EmaSlow,
    Wma,
    Rsi,
    MacdLine,
    MacdSignal,
    MacdHistogram,
    Atr,
    BbUpper,
    BbMiddle,
    BbLower,
    BbPercentB,
    BbBandwidth,
    StochK,
    StochD,
    Obv,
    VolumeMa,
    RelativeVolume,
    /// Unsupported name. Resolves to 0 and fails every condition using it.
    Unknown(String),
}

impl IndicatorKind {
    /// Case-insensitive lookup. Never fails: unrecognised names map to
    /// [`IndicatorKind::Unknown`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "open" => IndicatorKind::Open,
            "high" => IndicatorKind::High,
            "low" => IndicatorKind::Low,
            "close" | "price" => IndicatorKind::Close,
            "volume" => IndicatorKind::Volume,
            "sma_short" | "sma_fast" => IndicatorKind::SmaShort,
            "sma_medium" | "sma_mid" => IndicatorKind::SmaMedium,
            "sma_long" | "sma_slow" => IndicatorKind::SmaLong,
            "ema_fast" | "ema_short" => IndicatorKind::EmaFast,
            "ema_slow" | "ema_long" => IndicatorKind::EmaSlow,
            "wma" => IndicatorKind::Wma,
            "rsi" => IndicatorKind::Rsi,
            "macd" | "macd_line" => IndicatorKind::MacdLine,
            "macd_signal" => IndicatorKind::MacdSignal,
            "macd_histogram" | "macd_hist" => IndicatorKind::MacdHistogram,
            "atr" => IndicatorKind::Atr,
            "bb_upper" | "bollinger_upper" => IndicatorKind::BbUpper,
            "bb_middle" | "bollinger_middle" => IndicatorKind::BbMiddle,
            "bb_lower" | "bollinger_lower" => IndicatorKind::BbLower,
            "bb_percent_b" | "percent_b" => IndicatorKind::BbPercentB,
            "bb_bandwidth" | "bandwidth" => IndicatorKind::BbBandwidth,
            "stoch_k" | "stochastic_k" => IndicatorKind::StochK,
            "stoch_d" | "stochastic_d" => IndicatorKind::StochD,
            "obv" => IndicatorKind::Obv,
            "volume_ma" => IndicatorKind::VolumeMa,
            "relative_volume" | "rel_volume" | "rvol" => IndicatorKind::RelativeVolume,
            _ => IndicatorKind::Unknown(name.trim().to_string()),
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndicatorKind::Open => "open",
            IndicatorKind::High => "high",
            IndicatorKind::Low => "low",
            IndicatorKind::Close => "close",
            IndicatorKind::Volume => "volume",
            IndicatorKind::SmaShort => "sma_short",
            IndicatorKind::SmaMedium => "sma_medium",
            IndicatorKind::SmaLong => "sma_long",
            IndicatorKind::EmaFast => "ema_fast",
            IndicatorKind::EmaSlow => "ema_slow",
            IndicatorKind::Wma => "wma",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::MacdLine => "macd_line",
            IndicatorKind::MacdSignal => "macd_signal",
            IndicatorKind::MacdHistogram => "macd_histogram",
            IndicatorKind::Atr => "atr",
            IndicatorKind::BbUpper => "bb_upper",
            IndicatorKind::BbMiddle => "bb_middle",
            IndicatorKind::BbLower => "bb_lower",
            IndicatorKind::BbPercentB => "bb_percent_b",
            IndicatorKind::BbBandwidth => "bb_bandwidth",
            IndicatorKind::StochK => "stoch_k",
            IndicatorKind::StochD => "stoch_d",
            IndicatorKind::Obv => "obv",
            IndicatorKind::VolumeMa => "volume_ma",
            IndicatorKind::RelativeVolume => "relative_volume",
            IndicatorKind::Unknown(name) => name,
        };
        write!(f, "{}", name)
    }
}

/// Periods for every indicator in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSettings {
    pub sma_short: usize,
    pub sma_medium: usize,
    pub sma_long: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub wma_period: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr_period: usize,
    pub bb_period: usize,
    pub bb_multiplier: f64,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub volume_ma_period: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            sma_short: 20,
            sma_medium: 50,
            sma_long: 200,
            ema_fast: 12,
            ema_slow: 26,
            wma_period: 20,
            rsi_period: 14,
            macd_fast: macd::DEFAULT_FAST,
            macd_slow: macd::DEFAULT_SLOW,
            macd_signal: macd::DEFAULT_SIGNAL,
            atr_period: 14,
            bb_period: bollinger::DEFAULT_PERIOD,
            bb_multiplier: bollinger::DEFAULT_MULTIPLIER,
            stoch_k: stochastic::DEFAULT_K,
            stoch_d: stochastic::DEFAULT_D,
            volume_ma_period: 20,
        }
    }
}

impl IndicatorSettings {
    /// Number of bars before every indicator has produced a real value.
    pub fn warmup_bars(&self) -> usize {
        [
            self.sma_short,
            self.sma_medium,
            self.sma_long,
            self.ema_fast,
            self.ema_slow,
            self.wma_period,
            self.rsi_period + 1,
            self.macd_fast.max(self.macd_slow) + self.macd_signal - 1,
            self.atr_period + 1,
            self.bb_period,
            self.stoch_k + self.stoch_d - 1,
            self.volume_ma_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_lookup_is_case_insensitive() {
        assert_eq!(IndicatorKind::from_name("RSI"), IndicatorKind::Rsi);
        assert_eq!(IndicatorKind::from_name(" Sma_Long "), IndicatorKind::SmaLong);
        assert_eq!(IndicatorKind::from_name("rvol"), IndicatorKind::RelativeVolume);
    }

    #[test]
    fn unknown_kind_keeps_name() {
        let kind = IndicatorKind::from_name("ichimoku");
        assert_eq!(kind, IndicatorKind::Unknown("ichimoku".into()));
        assert_eq!(kind.to_string(), "ichimoku");
    }

    #[test]
    fn display_round_trips_through_from_name() {
        for kind in [
            IndicatorKind::SmaMedium,
            IndicatorKind::MacdHistogram,
            IndicatorKind::BbPercentB,
            IndicatorKind::StochD,
            IndicatorKind::Close,
        ] {
            assert_eq!(IndicatorKind::from_name(&kind.to_string()), kind);
        }
    }

    #[test]
    fn snapshot_value_for_price_is_none() {
        let snap = IndicatorSnapshot {
            rsi: 42.0,
            ..Default::default()
        };
        assert_eq!(snap.value(&IndicatorKind::Rsi), Some(42.0));
        assert_eq!(snap.value(&IndicatorKind::Close), None);
        assert_eq!(snap.value(&IndicatorKind::Unknown("x".into())), None);
    }

    #[test]
    fn default_warmup_is_longest_sma() {
        assert_eq!(IndicatorSettings::default().warmup_bars(), 200);
    }

    #[test]
    fn warmup_tracks_macd_when_longest() {
        let settings = IndicatorSettings {
            sma_short: 5,
            sma_medium: 10,
            sma_long: 20,
            ..Default::default()
        };
        // macd 26 + 9 - 1
        assert_eq!(settings.warmup_bars(), 34);
    }
}
