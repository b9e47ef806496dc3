//! Technical indicators
//!
//! True Range / Average True Range over a candle window, and the mapping from
//! ATR percent to the volatility-scaled add-on-buy threshold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Candle, Ticker};

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("insufficient candle history: need {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("ATR period must be at least 1")]
    ZeroPeriod,
}

/// Calculate Simple Moving Average over the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Calculate the True Range of every candle that has a predecessor.
///
/// The first candle has no previous close and produces no value, so the
/// result is one shorter than the input.
pub fn true_range_series(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|pair| {
            let (prev, cur) = (&pair[0], &pair[1]);
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev.close).abs();
            let lc = (cur.low - prev.close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Calculate Average True Range: the simple mean of the last `period` True
/// Range values. Needs `period + 1` candles.
pub fn atr(candles: &[Candle], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::ZeroPeriod);
    }
    let needed = period + 1;
    if candles.len() < needed {
        return Err(IndicatorError::InsufficientData {
            needed,
            got: candles.len(),
        });
    }

    let tr = true_range_series(candles);
    sma(&tr, period).ok_or(IndicatorError::InsufficientData {
        needed,
        got: candles.len(),
    })
}

/// ATR as a percentage of the current price; 0 for a non-positive price
pub fn atr_percent(atr: f64, current_price: f64) -> f64 {
    if current_price > 0.0 {
        atr / current_price * 100.0
    } else {
        0.0
    }
}

/// Linear interpolation bounds between ATR percent and the drop-ratio scale.
///
/// `min_scale` applies at or below `min_atr_percent`, `max_scale` at or
/// above `max_atr_percent`. With the defaults (0.98 at 3%, 0.90 at 12%) a
/// calmer market re-buys after a shallow dip and a volatile one waits for a
/// deeper drop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityBounds {
    pub min_atr_percent: f64,
    pub max_atr_percent: f64,
    pub min_scale: f64,
    pub max_scale: f64,
}

impl Default for VolatilityBounds {
    fn default() -> Self {
        VolatilityBounds {
            min_atr_percent: 3.0,
            max_atr_percent: 12.0,
            min_scale: 0.98,
            max_scale: 0.90,
        }
    }
}

/// Piecewise-linear scale for the given ATR percent, clamped to the bounds
pub fn scale_for_volatility(atr_percent: f64, bounds: &VolatilityBounds) -> f64 {
    let VolatilityBounds {
        min_atr_percent: min_atr,
        max_atr_percent: max_atr,
        min_scale,
        max_scale,
    } = *bounds;

    if atr_percent <= min_atr {
        min_scale
    } else if atr_percent >= max_atr {
        max_scale
    } else {
        min_scale - (atr_percent - min_atr) / (max_atr - min_atr) * (min_scale - max_scale)
    }
}

/// Multiplicative add-on-buy threshold: buy again when
/// `price <= reference * adjusted_drop_ratio`
pub fn adjusted_drop_ratio(atr_percent: f64, base_drop_ratio: f64, bounds: &VolatilityBounds) -> f64 {
    base_drop_ratio * scale_for_volatility(atr_percent, bounds)
}

/// One ATR evaluation for one ticker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtrReading {
    pub ticker: Ticker,
    /// ATR in price units
    pub value: f64,
    /// `value / current_price * 100`
    pub percent: f64,
    pub computed_at: DateTime<Utc>,
}

impl AtrReading {
    pub fn compute(
        ticker: &Ticker,
        candles: &[Candle],
        period: usize,
        current_price: f64,
    ) -> Result<Self, IndicatorError> {
        let value = atr(candles, period)?;
        Ok(AtrReading {
            ticker: ticker.clone(),
            value,
            percent: atr_percent(value, current_price),
            computed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn candle(i: i64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            datetime: Utc::now() + Duration::minutes(i),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_sma() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3), Some(4.0));
        assert_eq!(sma(&[1.0, 2.0], 3), None);
        assert_eq!(sma(&[1.0], 0), None);
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        let candles = vec![
            candle(0, 105.0, 95.0, 100.0),
            // gap up: |high - prev close| dominates
            candle(1, 120.0, 115.0, 118.0),
            // gap down: |low - prev close| dominates
            candle(2, 110.0, 100.0, 105.0),
            // inside bar: high - low dominates
            candle(3, 109.0, 101.0, 104.0),
        ];
        let tr = true_range_series(&candles);
        assert_eq!(tr, vec![20.0, 18.0, 8.0]);
    }

    #[test]
    fn test_true_range_single_candle_is_empty() {
        assert!(true_range_series(&[candle(0, 10.0, 9.0, 9.5)]).is_empty());
        assert!(true_range_series(&[]).is_empty());
    }

    #[test]
    fn test_atr_is_mean_of_last_period_values() {
        let candles = vec![
            candle(0, 105.0, 95.0, 100.0),
            candle(1, 120.0, 115.0, 118.0),
            candle(2, 110.0, 100.0, 105.0),
            candle(3, 109.0, 101.0, 104.0),
        ];
        assert_relative_eq!(atr(&candles, 3).unwrap(), (20.0 + 18.0 + 8.0) / 3.0);
        assert_relative_eq!(atr(&candles, 2).unwrap(), (18.0 + 8.0) / 2.0);
    }

    #[test]
    fn test_atr_insufficient_data() {
        let candles: Vec<Candle> = (0..5).map(|i| candle(i, 11.0, 9.0, 10.0)).collect();
        assert_eq!(
            atr(&candles, 5),
            Err(IndicatorError::InsufficientData { needed: 6, got: 5 })
        );
        assert!(atr(&candles, 4).is_ok());
        assert_eq!(atr(&candles, 0), Err(IndicatorError::ZeroPeriod));
    }

    #[test]
    fn test_atr_non_negative() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.7).sin() * 5.0;
                candle(i, base + 1.0, base - 1.0, base)
            })
            .collect();
        for period in 1..29 {
            assert!(atr(&candles, period).unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_atr_percent() {
        assert_relative_eq!(atr_percent(5.0, 200.0), 2.5);
        assert_eq!(atr_percent(5.0, 0.0), 0.0);
        assert_eq!(atr_percent(5.0, -1.0), 0.0);
    }

    #[test]
    fn test_scale_hits_bounds_exactly() {
        let b = VolatilityBounds::default();
        assert_eq!(scale_for_volatility(b.min_atr_percent, &b), b.min_scale);
        assert_eq!(scale_for_volatility(b.max_atr_percent, &b), b.max_scale);
        assert_eq!(scale_for_volatility(0.0, &b), b.min_scale);
        assert_eq!(scale_for_volatility(50.0, &b), b.max_scale);
    }

    #[test]
    fn test_scale_interpolates_linearly() {
        let b = VolatilityBounds::default();
        // midpoint of 3..12 is 7.5 -> midpoint of 0.98..0.90 is 0.94
        assert_relative_eq!(scale_for_volatility(7.5, &b), 0.94, epsilon = 1e-12);
    }

    #[test]
    fn test_scale_monotonic_and_bounded() {
        let b = VolatilityBounds::default();
        let lo = b.min_scale.min(b.max_scale);
        let hi = b.min_scale.max(b.max_scale);
        let mut prev = scale_for_volatility(0.0, &b);
        let mut x = 0.0;
        while x <= 20.0 {
            let s = scale_for_volatility(x, &b);
            assert!(s >= lo && s <= hi, "scale {} out of bounds at {}", s, x);
            assert!(s <= prev + 1e-12, "scale increased at {}", x);
            prev = s;
            x += 0.25;
        }
    }

    #[test]
    fn test_adjusted_drop_ratio_low_volatility() {
        let b = VolatilityBounds::default();
        assert_relative_eq!(adjusted_drop_ratio(3.0, 0.98, &b), 0.9604, epsilon = 1e-12);
        assert_relative_eq!(adjusted_drop_ratio(1.0, 0.99, &b), 0.99 * 0.98, epsilon = 1e-12);
    }

    #[test]
    fn test_atr_reading() {
        let t = Ticker::new("KRW-XLM");
        let candles = vec![candle(0, 105.0, 95.0, 100.0), candle(1, 104.0, 96.0, 100.0)];
        let reading = AtrReading::compute(&t, &candles, 1, 200.0).unwrap();
        assert_relative_eq!(reading.value, 8.0);
        assert_relative_eq!(reading.percent, 4.0);
        assert_eq!(reading.ticker, t);
    }
}
