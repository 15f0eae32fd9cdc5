//! Indicators: pure functions from bar history to numeric series.
//!
//! Indicators are precomputed once per symbol before the bar loop and fed
//! into the pipeline as an [`IndicatorValues`] bundle. No recomputation on
//! each bar, and no indicator value at bar t may depend on bar t+1 or later.

pub mod atr;
pub mod ema;
pub mod normalize;
pub mod swing;

pub use atr::{true_range, wilder_smooth, Atr};
pub use ema::{ema_of_series, Ema};

use crate::domain::Bar;
use std::collections::HashMap;

/// Trait for indicators.
///
/// Takes a full bar series, produces a numeric series of the same length.
/// The first `lookback()` values are `f64::NAN` (warmup).
pub trait Indicator: Send + Sync {
    /// Series name, e.g. "atr_14", "ema_21".
    fn name(&self) -> &str;

    /// Number of bars needed before the indicator produces valid output.
    fn lookback(&self) -> usize;

    /// Compute the series for the entire bar history.
    fn compute(&self, bars: &[Bar]) -> Vec<f64>;
}

/// Container for precomputed indicator values, queried by name + bar index.
#[derive(Debug, Clone, Default)]
pub struct IndicatorValues {
    series: HashMap<String, Vec<f64>>,
}

impl IndicatorValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.series.insert(name.into(), values);
    }

    /// Value at a specific bar index; None when the series or index is missing.
    pub fn get(&self, name: &str, bar_index: usize) -> Option<f64> {
        self.series.get(name).and_then(|v| v.get(bar_index).copied())
    }

    pub fn get_series(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Compute every indicator over the full bar history.
pub fn precompute(bars: &[Bar], indicators: &[Box<dyn Indicator>]) -> IndicatorValues {
    let mut values = IndicatorValues::new();
    for ind in indicators {
        values.insert(ind.name().to_string(), ind.compute(bars));
    }
    values
}

/// Largest lookback across a set of indicators.
pub fn max_lookback(indicators: &[Box<dyn Indicator>]) -> usize {
    indicators.iter().map(|i| i.lookback()).max().unwrap_or(0)
}

// -----------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------

#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    use crate::domain::Timeframe;
    use chrono::{Duration, TimeZone, Utc};

    let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            symbol: "TEST".to_string(),
            timeframe: Timeframe::H1,
            timestamp: base + Duration::hours(i as i64),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000,
        })
        .collect()
}

#[cfg(test)]
pub fn make_ohlc_bars(data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    use crate::domain::Timeframe;
    use chrono::{Duration, TimeZone, Utc};

    let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Bar {
            symbol: "TEST".to_string(),
            timeframe: Timeframe::H1,
            timestamp: base + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume: 1000,
        })
        .collect()
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "expected {expected}, got {actual} (epsilon {epsilon})"
    );
}
