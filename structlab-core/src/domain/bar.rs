//! Bar: the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OHLCV bar for a single symbol and timeframe.
///
/// Timestamps are UTC and must be monotonic, non-duplicated per
/// symbol+timeframe. The feed layer owns that ordering guarantee; the
/// core only re-checks per-bar shape via [`Bar::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Full shape check: low ≤ min(open, close) ≤ max(open, close) ≤ high,
    /// all fields finite and positive.
    pub fn validate(&self) -> Result<(), BarError> {
        if self.is_void()
            || !self.open.is_finite()
            || !self.high.is_finite()
            || !self.low.is_finite()
            || !self.close.is_finite()
        {
            return Err(BarError::NonFinite { symbol: self.symbol.clone() });
        }
        if self.open <= 0.0 || self.close <= 0.0 {
            return Err(BarError::NonPositive { symbol: self.symbol.clone() });
        }
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(BarError::OhlcOrdering {
                symbol: self.symbol.clone(),
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }
        Ok(())
    }

    /// Real body size, |close - open|.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Full candle range, high - low.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// True for a close above the open.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// True for a close below the open.
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Bar timeframe. Used in structure identity and threshold lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timeframe {
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Bar duration in minutes.
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// Number of bars in a 24h day at this timeframe.
    pub fn bars_per_day(&self) -> u32 {
        1440 / self.minutes()
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        };
        write!(f, "{s}")
    }
}

/// Malformed-bar errors. Detection passes skip the offending bar and log;
/// these never abort a run.
#[derive(Debug, Error)]
pub enum BarError {
    #[error("bar for '{symbol}' has NaN or non-finite OHLC fields")]
    NonFinite { symbol: String },

    #[error("bar for '{symbol}' has non-positive open/close")]
    NonPositive { symbol: String },

    #[error(
        "bar for '{symbol}' violates OHLC ordering: o={open} h={high} l={low} c={close}"
    )]
    OhlcOrdering { symbol: String, open: f64, high: f64, low: f64, close: f64 },
}
