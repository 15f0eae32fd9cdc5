//! Broker symbol constraints and point-in-time account state.
//!
//! Both are snapshots supplied by the execution-transport layer. Guards
//! treat them as possibly stale and fail closed when fields are missing.

use serde::{Deserialize, Serialize};

use super::session::InstrumentClass;

/// Broker-side constraints and metadata for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolSpec {
    pub symbol: String,
    pub class: InstrumentClass,
    /// Minimum price increment (one point).
    pub point: f64,
    /// Broker minimum stop/target distance, in points.
    pub stops_level_points: f64,
    /// Current spread, in points.
    pub spread_points: f64,
    /// Broker maximum stop distance, in points. None = unlimited.
    pub max_stop_points: Option<f64>,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    /// Account-currency value of one point for one lot.
    pub tick_value: f64,
    /// Margin required to open one lot.
    pub margin_per_lot: f64,
}

impl SymbolSpec {
    /// Price distance expressed in points.
    pub fn to_points(&self, price_distance: f64) -> f64 {
        price_distance / self.point
    }

    /// Points expressed as a price distance.
    pub fn to_price(&self, points: f64) -> f64 {
        points * self.point
    }

    /// Round volume down to the step grid, then clamp to [min, max].
    /// Returns None when the rounded volume falls below the minimum.
    pub fn normalize_volume(&self, volume: f64) -> Option<f64> {
        if !volume.is_finite() || volume <= 0.0 {
            return None;
        }
        // Epsilon guard: 0.03 / 0.01 is 2.999..96 in f64 and must floor to 3.
        let steps = (volume / self.volume_step + 1e-9).floor();
        let rounded = steps * self.volume_step;
        if rounded < self.volume_min - 1e-12 {
            return None;
        }
        Some(rounded.min(self.volume_max))
    }
}

/// One open position, as much as aggregate-risk math needs to know.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenPosition {
    pub symbol: String,
    /// Position volume in lots.
    pub size: f64,
    /// Distance from entry to stop, in points.
    pub stop_distance_points: f64,
    /// Account-currency value of one point for one lot of this symbol.
    pub tick_value: f64,
}

impl OpenPosition {
    /// Account-currency loss if the stop is hit.
    pub fn risk_amount(&self) -> f64 {
        self.size * self.stop_distance_points * self.tick_value
    }
}

/// Point-in-time account snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountState {
    pub equity: f64,
    pub balance: f64,
    pub free_margin: f64,
    /// Margin level in percent. None when the broker reports no positions
    /// (margin level is undefined at zero used margin).
    pub margin_level_pct: Option<f64>,
    pub open_positions: Vec<OpenPosition>,
}

impl AccountState {
    /// Sum of risk across open positions, in account currency.
    pub fn aggregate_open_risk(&self) -> f64 {
        self.open_positions.iter().map(|p| p.risk_amount()).sum()
    }
}
