//! Indicator orchestration across timeframes.
//!
//! Computes an [`IndicatorSnapshot`] per candle on every supplied timeframe
//! and attaches the most recently *completed* weekly/monthly bar to each
//! daily bar. A higher-timeframe period counts as completed once its period
//! end lies strictly before the daily bar's date.

use std::collections::{BTreeMap, HashMap};

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::IndicatorError;
use crate::domain::indicator::{
    calculate_atr, calculate_bollinger, calculate_ema, calculate_macd, calculate_obv,
    calculate_relative_volume, calculate_rsi, calculate_sma, calculate_stochastic,
    calculate_volume_ma, calculate_wma,
};
use crate::domain::snapshot::{IndicatorSettings, IndicatorSnapshot};

/// A completed higher-timeframe bar as seen from a daily bar.
#[derive(Debug, Clone, PartialEq)]
pub struct HigherTimeframeBar {
    pub candle: Candle,
    pub indicators: IndicatorSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedCandle {
    pub candle: Candle,
    pub indicators: IndicatorSnapshot,
    /// Absent until the first higher-timeframe period has completed.
    pub higher: BTreeMap<Timeframe, HigherTimeframeBar>,
}

impl AnnotatedCandle {
    pub fn higher_timeframe(&self, timeframe: Timeframe) -> Option<&HigherTimeframeBar> {
        self.higher.get(&timeframe)
    }
}

/// Compute one snapshot per candle.
pub fn compute_snapshots(
    candles: &[Candle],
    settings: &IndicatorSettings,
) -> Result<Vec<IndicatorSnapshot>, IndicatorError> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume as f64).collect();

    let sma_short = calculate_sma(&closes, settings.sma_short)?;
    let sma_medium = calculate_sma(&closes, settings.sma_medium)?;
    let sma_long = calculate_sma(&closes, settings.sma_long)?;
    let ema_fast = calculate_ema(&closes, settings.ema_fast)?;
    let ema_slow = calculate_ema(&closes, settings.ema_slow)?;
    let wma = calculate_wma(&closes, settings.wma_period)?;
    let rsi = calculate_rsi(&closes, settings.rsi_period)?;
    let macd = calculate_macd(
        &closes,
        settings.macd_fast,
        settings.macd_slow,
        settings.macd_signal,
    )?;
    let atr = calculate_atr(&highs, &lows, &closes, settings.atr_period)?;
    let bands = calculate_bollinger(&closes, settings.bb_period, settings.bb_multiplier)?;
    let stoch = calculate_stochastic(&highs, &lows, &closes, settings.stoch_k, settings.stoch_d)?;
    let obv = calculate_obv(&closes, &volumes)?;
    let volume_ma = calculate_volume_ma(&volumes, settings.volume_ma_period)?;
    let relative_volume = calculate_relative_volume(&volumes, settings.volume_ma_period)?;

    let warmup = settings.warmup_bars();

    Ok((0..candles.len())
        .map(|i| IndicatorSnapshot {
            sma_short: sma_short[i],
            sma_medium: sma_medium[i],
            sma_long: sma_long[i],
            ema_fast: ema_fast[i],
            ema_slow: ema_slow[i],
            wma: wma[i],
            rsi: rsi[i],
            macd_line: macd.line[i],
            macd_signal: macd.signal[i],
            macd_histogram: macd.histogram[i],
            atr: atr[i],
            bb_upper: bands.upper[i],
            bb_middle: bands.middle[i],
            bb_lower: bands.lower[i],
            bb_percent_b: bands.percent_b[i],
            bb_bandwidth: bands.bandwidth[i],
            stoch_k: stoch.k[i],
            stoch_d: stoch.d[i],
            obv: obv[i],
            volume_ma: volume_ma[i],
            relative_volume: relative_volume[i],
            warmed_up: i + 1 >= warmup,
        })
        .collect())
}

/// Runs the indicator library per timeframe and aligns the results on the
/// daily bars.
#[derive(Debug, Clone, Default)]
pub struct IndicatorOrchestrator {
    settings: IndicatorSettings,
}

impl IndicatorOrchestrator {
    pub fn new(settings: IndicatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &IndicatorSettings {
        &self.settings
    }

    /// Annotate the daily series in `series` with its own indicators and
    /// forward-filled weekly/monthly values.
    ///
    /// Returns an empty vector when no daily candles are supplied.
    pub fn annotate(
        &self,
        series: &HashMap<Timeframe, Vec<Candle>>,
    ) -> Result<Vec<AnnotatedCandle>, IndicatorError> {
        let daily = match series.get(&Timeframe::Daily) {
            Some(d) if !d.is_empty() => d,
            _ => return Ok(Vec::new()),
        };

        let daily_snapshots = compute_snapshots(daily, &self.settings)?;

        let mut higher_series = Vec::new();
        for timeframe in [Timeframe::Weekly, Timeframe::Monthly] {
            let Some(candles) = series.get(&timeframe) else {
                continue;
            };
            if candles.is_empty() {
                continue;
            }
            let snapshots = compute_snapshots(candles, &self.settings)?;
            let period_ends: Vec<_> = candles
                .iter()
                .map(|c| timeframe.period_end(c.date))
                .collect();
            higher_series.push((timeframe, candles, snapshots, period_ends));
        }

        let mut out = Vec::with_capacity(daily.len());
        for (bar, snapshot) in daily.iter().zip(daily_snapshots) {
            let mut higher = BTreeMap::new();
            for (timeframe, candles, snapshots, period_ends) in &higher_series {
                let completed = period_ends.partition_point(|end| *end < bar.date);
                if completed == 0 {
                    continue;
                }
                let idx = completed - 1;
                higher.insert(
                    *timeframe,
                    HigherTimeframeBar {
                        candle: candles[idx].clone(),
                        indicators: snapshots[idx].clone(),
                    },
                );
            }
            out.push(AnnotatedCandle {
                candle: bar.clone(),
                indicators: snapshot,
                higher,
            });
        }

        Ok(out)
    }
}
