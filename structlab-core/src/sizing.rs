//! Position sizing from account equity and stop distance.
//!
//! Pure arithmetic: the risked amount is a fixed equity fraction, the lot
//! count follows from the stop distance and per-point value, and the broker
//! volume grid does the rounding. Anything that cannot be sized honestly is
//! an error, never a minimum-volume fallback.

use thiserror::Error;
use tracing::debug;

use crate::config::CoreConfig;
use crate::domain::{AccountState, SymbolSpec};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    /// The computed volume rounds below the broker minimum.
    #[error("risk amount {risk_amount:.2} sizes below volume minimum {volume_min}")]
    BelowMinimumVolume { risk_amount: f64, volume_min: f64 },
    /// Equity, stop distance, or tick value unusable.
    #[error("unusable sizing inputs (equity {equity}, stop {stop_points} points, tick value {tick_value})")]
    InvalidInputs { equity: f64, stop_points: f64, tick_value: f64 },
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    /// Equity percentage risked per trade (1.0 = 1%).
    risk_per_trade_pct: f64,
}

impl PositionSizer {
    pub fn new(config: &CoreConfig) -> Self {
        Self { risk_per_trade_pct: config.sizing.risk_per_trade_pct }
    }

    /// Lots for one trade risking the configured equity fraction over the
    /// given stop distance (price units). Step-rounded and clamped.
    pub fn size(
        &self,
        account: &AccountState,
        spec: &SymbolSpec,
        stop_distance: f64,
    ) -> Result<f64, SizingError> {
        let stop_points = spec.to_points(stop_distance);
        let usable = account.equity > 0.0
            && stop_points.is_finite()
            && stop_points > 0.0
            && spec.tick_value > 0.0;
        if !usable {
            return Err(SizingError::InvalidInputs {
                equity: account.equity,
                stop_points,
                tick_value: spec.tick_value,
            });
        }

        let risk_amount = account.equity * self.risk_per_trade_pct / 100.0;
        let raw = risk_amount / (stop_points * spec.tick_value);
        match spec.normalize_volume(raw) {
            Some(volume) => {
                debug!(symbol = %spec.symbol, risk_amount, raw, volume, "sized position");
                Ok(volume)
            }
            None => Err(SizingError::BelowMinimumVolume {
                risk_amount,
                volume_min: spec.volume_min,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstrumentClass;

    const EPS: f64 = 1e-9;

    fn sizer(risk_pct: f64) -> PositionSizer {
        let mut config = CoreConfig::default();
        config.sizing.risk_per_trade_pct = risk_pct;
        PositionSizer::new(&config)
    }

    fn spec() -> SymbolSpec {
        SymbolSpec {
            symbol: "EURUSD".into(),
            class: InstrumentClass::Forex,
            point: 0.0001,
            stops_level_points: 20.0,
            spread_points: 2.0,
            max_stop_points: None,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            tick_value: 10.0,
            margin_per_lot: 3000.0,
        }
    }

    fn account(equity: f64) -> AccountState {
        AccountState {
            equity,
            balance: equity,
            free_margin: equity,
            margin_level_pct: None,
            open_positions: vec![],
        }
    }

    #[test]
    fn sizes_one_percent_risk() {
        // 100 risked over 50 points at 10/point: 0.2 lots.
        let size = sizer(1.0).size(&account(10_000.0), &spec(), 0.0050).unwrap();
        assert!((size - 0.2).abs() < EPS);
    }

    #[test]
    fn risk_fraction_scales_linearly() {
        let one = sizer(1.0).size(&account(10_000.0), &spec(), 0.0050).unwrap();
        let two = sizer(2.0).size(&account(10_000.0), &spec(), 0.0050).unwrap();
        assert!((two - 2.0 * one).abs() < EPS);
    }

    #[test]
    fn rounds_down_to_volume_step() {
        // 100 / (42 * 10) = 0.2380..: floors to 0.23, never rounds up.
        let size = sizer(1.0).size(&account(10_000.0), &spec(), 0.0042).unwrap();
        assert!((size - 0.23).abs() < EPS);
    }

    #[test]
    fn clamps_to_volume_max() {
        let size = sizer(1.0).size(&account(100_000_000.0), &spec(), 0.0050).unwrap();
        assert!((size - 100.0).abs() < EPS);
    }

    #[test]
    fn below_minimum_volume_is_an_error() {
        // 2 risked over 50 points: 0.004 lots, under the 0.01 minimum.
        let err = sizer(1.0).size(&account(200.0), &spec(), 0.0050).unwrap_err();
        match err {
            SizingError::BelowMinimumVolume { risk_amount, volume_min } => {
                assert!((risk_amount - 2.0).abs() < EPS);
                assert!((volume_min - 0.01).abs() < EPS);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_stop_distance_is_invalid() {
        let err = sizer(1.0).size(&account(10_000.0), &spec(), 0.0).unwrap_err();
        assert!(matches!(err, SizingError::InvalidInputs { .. }));
    }

    #[test]
    fn zero_equity_is_invalid() {
        let err = sizer(1.0).size(&account(0.0), &spec(), 0.0050).unwrap_err();
        assert!(matches!(err, SizingError::InvalidInputs { .. }));
    }
}
